use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use regex::Regex;
use synapse_sandbox_policy::Policy;

use crate::adapter::{CommandOutput, PlatformAdapter};
use crate::error::{PlatformError, Result};
use crate::glob::glob_to_regex;

const READ_ONLY_SUBPATHS: [&str; 7] = [
    "/usr/lib",
    "/usr/bin",
    "/bin",
    "/System",
    "/Library/Preferences",
    "/private/var/db",
    "/private/etc",
];

static VIOLATION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sandbox-exec:\s").expect("valid regex"));
static VIOLATION_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)operation not permitted|denied|prohibited|failed|error").expect("valid regex")
});
static KERNEL_DENY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bSandbox:\s[^\n]*\bdeny\([^)]+\)").expect("valid regex"));
static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"deny\s+([a-zA-Z0-9-]+)").expect("valid regex"));
static RESOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"path\s+"([^"]+)""#).expect("valid regex"));

fn escape_profile_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn subpath_clause(action: &str, path: &str) -> String {
    format!("(allow {} (subpath \"{}\"))", action, escape_profile_string(path))
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn unique_profile_path() -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    std::env::temp_dir().join(format!("synapse-sandbox-{millis}-{}.sb", random_suffix()))
}

/// Render the exact `.sb` profile body for `policy`. Ordering is
/// load-bearing: the final `deny` block must come after the whitelist
/// `allow` block so it actually overrides it for any overlapping path.
fn render_profile(policy: &Policy) -> String {
    let mut out = String::new();
    out.push_str("(version 1)\n");
    out.push_str("(deny default)\n");
    out.push_str("(allow process-fork)\n(allow process-exec)\n(allow signal)\n");

    for path in READ_ONLY_SUBPATHS {
        out.push_str(&subpath_clause("file-read*", path));
        out.push('\n');
    }

    out.push_str("(allow file-read* file-write* (subpath \"/dev\"))\n");
    out.push_str("(allow sysctl-read)\n");

    for entry in &policy.filesystem.whitelist {
        if entry.contains('*') {
            continue;
        }
        out.push_str(&format!(
            "(allow file-read* file-write* (subpath \"{}\"))\n",
            escape_profile_string(entry)
        ));
    }

    let mut deny_clauses = Vec::new();
    for entry in &policy.filesystem.blacklist {
        if entry.contains('*') {
            deny_clauses.push(format!("(regex #\"{}\")", glob_to_regex(entry)));
        } else {
            deny_clauses.push(format!("(subpath \"{}\")", escape_profile_string(entry)));
        }
    }
    out.push_str("(deny file-read* file-write*\n");
    for clause in &deny_clauses {
        out.push_str("    ");
        out.push_str(clause);
        out.push('\n');
    }
    out.push_str(")\n");

    out.push_str("(deny network*)\n(allow ipc-posix-shm*)\n(allow mach-lookup)\n");
    out
}

/// Wraps commands under `sandbox-exec -f <profile>`. Stateful: remembers the
/// profile path it wrote so `cleanup` can remove it.
pub struct MacAdapter {
    profile_path: Option<PathBuf>,
}

impl MacAdapter {
    pub fn new() -> Self {
        Self { profile_path: None }
    }
}

impl Default for MacAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for MacAdapter {
    fn wrap_command(&mut self, policy: &Policy) -> Result<String> {
        let profile = render_profile(policy);
        let path = unique_profile_path();
        fs::write(&path, profile).map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "failed to write sandbox profile");
            PlatformError::Unavailable(format!(
                "failed to write sandbox profile {}: {err}",
                path.display()
            ))
        })?;
        let command = format!("sandbox-exec -f {} /bin/bash", path.display());
        self.profile_path = Some(path);
        Ok(command)
    }

    fn is_violation(&self, output: &CommandOutput) -> bool {
        let prefixed_and_keyword =
            VIOLATION_PREFIX_RE.is_match(&output.stderr) && VIOLATION_KEYWORD_RE.is_match(&output.stderr);
        prefixed_and_keyword || KERNEL_DENY_RE.is_match(&output.stderr)
    }

    fn extract_violation_reason(&self, output: &CommandOutput) -> Option<String> {
        REASON_RE
            .captures(&output.stderr)
            .map(|c| c[1].to_string())
    }

    fn extract_blocked_resource(&self, output: &CommandOutput) -> Option<String> {
        RESOURCE_RE
            .captures(&output.stderr)
            .map(|c| c[1].to_string())
    }

    fn cleanup(&mut self) {
        if let Some(path) = self.profile_path.take() {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;
    use pretty_assertions::assert_eq;
    use synapse_sandbox_policy::Policy;

    #[test]
    fn deny_block_follows_allow_block() {
        let mut whitelist = IndexSet::new();
        whitelist.insert("/home/u/project".to_string());
        let mut blacklist = IndexSet::new();
        blacklist.insert("/home/u/.ssh".to_string());
        blacklist.insert("**/.env".to_string());
        let policy = Policy::new(whitelist, blacklist);

        let profile = render_profile(&policy);
        let allow_offset = profile
            .find("(allow file-read* file-write* (subpath \"/home/u/project\"))")
            .unwrap();
        let deny_offset = profile.find("(deny file-read* file-write*").unwrap();
        assert!(deny_offset > allow_offset);
    }

    #[test]
    fn blacklist_glob_becomes_regex_clause() {
        let mut blacklist = IndexSet::new();
        blacklist.insert("**/.env".to_string());
        let policy = Policy::new(IndexSet::new(), blacklist);
        let profile = render_profile(&policy);
        assert!(profile.contains("(regex #\".*\\.env\")"));
    }

    #[test]
    fn profile_starts_with_version_and_deny_default() {
        let profile = render_profile(&Policy::default());
        assert!(profile.starts_with("(version 1)\n(deny default)\n"));
    }

    #[test]
    fn wrap_command_writes_profile_and_cleanup_removes_it() {
        let mut adapter = MacAdapter::new();
        let command = adapter.wrap_command(&Policy::default()).unwrap();
        assert!(command.starts_with("sandbox-exec -f "));
        assert!(command.ends_with(" /bin/bash"));

        let path = adapter.profile_path.clone().unwrap();
        assert!(path.exists());
        adapter.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_tolerates_missing_file() {
        let mut adapter = MacAdapter::new();
        adapter.wrap_command(&Policy::default()).unwrap();
        adapter.cleanup();
        adapter.cleanup();
    }

    #[test]
    fn classifies_sandbox_exec_violation() {
        let adapter = MacAdapter::new();
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "sandbox-exec: Operation not permitted".to_string(),
            exit_code: 1,
        };
        assert!(adapter.is_violation(&output));
    }

    #[test]
    fn classifies_kernel_deny_violation() {
        let adapter = MacAdapter::new();
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "Sandbox: cat(123) deny(1) file-read-data /home/u/.ssh/id_rsa".to_string(),
            exit_code: 1,
        };
        assert!(adapter.is_violation(&output));
    }

    #[test]
    fn extracts_reason_and_resource() {
        let adapter = MacAdapter::new();
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "deny file-read-data path \"/home/u/.ssh/id_rsa\"".to_string(),
            exit_code: 1,
        };
        assert_eq!(
            adapter.extract_violation_reason(&output).as_deref(),
            Some("file-read-data")
        );
        assert_eq!(
            adapter.extract_blocked_resource(&output).as_deref(),
            Some("/home/u/.ssh/id_rsa")
        );
    }
}
