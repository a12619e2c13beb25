/// Translate one of the subsystem's own glob patterns into a regex source
/// string. Deliberately hand-rolled rather than pulled from `globset`: this
/// crate's `**` must match across `/` boundaries the way the original
/// command-text pre-check does, which is not what most general-purpose glob
/// crates implement by default, and the two semantics diverging would be a
/// silent policy regression.
///
/// Translation table: `**/` -> `.*`, bare `**` -> `.*`, `*` -> `[^/]*`;
/// everything else is regex-escaped. The result is never anchored — callers
/// use it for substring search, matching how the rest of the pre-check
/// treats patterns as command-text fragments rather than full-path matches.
pub fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' {
            if chars.get(i + 1) == Some(&'*') {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str(".*");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            } else {
                out.push_str("[^/]*");
                i += 1;
            }
            continue;
        }

        let c = chars[i];
        if matches!(
            c,
            '.' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Compile a pattern to a `Regex`, or `None` if it somehow fails to compile
/// (the translator only ever emits valid regex fragments, so this is
/// defensive rather than expected).
pub fn compile(pattern: &str) -> Option<regex::Regex> {
    regex::Regex::new(&glob_to_regex(pattern)).ok()
}
