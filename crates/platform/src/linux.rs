use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use synapse_sandbox_policy::Policy;

use crate::adapter::{CommandOutput, PlatformAdapter};
use crate::error::{PlatformError, Result};

const RO_BIND_ROOTS: [&str; 4] = ["/usr", "/bin", "/lib", "/etc"];

static BLOCKED_RESOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)': Permission denied").expect("valid regex"));

fn probe_bwrap_on_path() -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join("bwrap").is_file())
}

/// Wraps commands under `bwrap`. Detection of `bwrap` on `PATH` is cached at
/// construction time (a later `bwrap` install or removal does not affect an
/// already-constructed adapter), matching how a single process's adapter
/// lifetime is expected to be short relative to a package manager run.
pub struct LinuxAdapter {
    has_bwrap: bool,
}

impl LinuxAdapter {
    pub fn new() -> Self {
        Self::with_bwrap_probe(probe_bwrap_on_path)
    }

    /// Inject the bwrap-presence check, for tests that simulate an
    /// environment without bwrap on PATH without touching the real PATH.
    pub fn with_bwrap_probe(probe: impl Fn() -> bool) -> Self {
        Self { has_bwrap: probe() }
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for LinuxAdapter {
    fn wrap_command(&mut self, policy: &Policy) -> Result<String> {
        if !self.has_bwrap {
            tracing::warn!("bwrap not found on PATH; refusing to run unsandboxed");
            return Err(PlatformError::Unavailable(
                "bwrap is required on Linux for filesystem sandboxing".to_string(),
            ));
        }

        let mut argv: Vec<String> = vec![
            "bwrap".to_string(),
            "--unshare-net".to_string(),
            "--die-with-parent".to_string(),
            "--new-session".to_string(),
        ];

        for root in RO_BIND_ROOTS {
            argv.push("--ro-bind".to_string());
            argv.push(root.to_string());
            argv.push(root.to_string());
        }

        for entry in &policy.filesystem.whitelist {
            if entry.contains('*') {
                // Glob entries are not bindable; they still participate in
                // the command-text pre-check upstream of this adapter.
                continue;
            }
            if !Path::new(entry).exists() {
                continue;
            }
            argv.push("--bind".to_string());
            argv.push(entry.clone());
            argv.push(entry.clone());
        }

        argv.push("/bin/bash".to_string());
        Ok(argv.join(" "))
    }

    fn is_violation(&self, output: &CommandOutput) -> bool {
        let stderr = output.stderr.to_lowercase();
        stderr.contains("permission denied") || stderr.contains("operation not permitted")
    }

    fn extract_violation_reason(&self, output: &CommandOutput) -> Option<String> {
        if output.stderr.contains("Permission denied") {
            Some("Permission denied".to_string())
        } else if output.stderr.contains("Operation not permitted") {
            Some("Operation not permitted".to_string())
        } else {
            None
        }
    }

    fn extract_blocked_resource(&self, output: &CommandOutput) -> Option<String> {
        BLOCKED_RESOURCE_RE
            .captures(&output.stderr)
            .map(|c| c[1].to_string())
    }

    fn cleanup(&mut self) {}
}
