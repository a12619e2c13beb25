use std::collections::HashMap;

use indexmap::IndexSet;

use crate::policy::Policy;

/// Inputs needed to expand path tokens. Kept as a plain struct (rather than
/// reading `std::env` directly) so `build_policy` never touches the
/// filesystem or process environment implicitly — callers pass exactly what
/// they observed, which keeps the function pure and trivially testable.
#[derive(Debug, Clone, Default)]
pub struct ExpandContext<'a> {
    pub env: &'a HashMap<String, String>,
    pub home_dir: &'a str,
}

/// Expand `~`, `~/x`, and `$NAME` tokens in a single path/pattern entry.
/// `$NAME` that has no entry in `env` is left literal, per spec.
fn expand_token(entry: &str, ctx: &ExpandContext) -> String {
    let entry = if entry == "~" {
        ctx.home_dir.to_string()
    } else if let Some(rest) = entry.strip_prefix("~/") {
        format!("{}/{}", ctx.home_dir.trim_end_matches('/'), rest)
    } else {
        entry.to_string()
    };

    expand_env_vars(&entry, ctx)
}

/// Replace every `$NAME` occurrence (alnum + underscore) with its value from
/// `env`, leaving unset variables as the literal `$NAME` text.
fn expand_env_vars(input: &str, ctx: &ExpandContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after_dollar = &rest[dollar + 1..];
        let name_len = after_dollar
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after_dollar.len());

        if name_len == 0 {
            out.push('$');
            rest = after_dollar;
            continue;
        }

        let name = &after_dollar[..name_len];
        match ctx.env.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after_dollar[name_len..];
    }
    out.push_str(rest);
    out
}

fn expand_set(entries: &IndexSet<String>, ctx: &ExpandContext) -> IndexSet<String> {
    let mut out = IndexSet::with_capacity(entries.len());
    for entry in entries {
        out.insert(expand_token(entry, ctx));
    }
    out
}

/// Build the effective, path-expanded policy. Performs no filesystem I/O.
/// Deduplicates whitelist/blacklist entries, preserving first-seen order.
pub fn build_policy(policy: &Policy, ctx: &ExpandContext) -> Policy {
    Policy {
        filesystem: crate::policy::FilesystemPolicy {
            whitelist: expand_set(&policy.filesystem.whitelist, ctx),
            blacklist: expand_set(&policy.filesystem.blacklist, ctx),
        },
        network: policy.network,
    }
}
