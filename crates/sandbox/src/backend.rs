use async_trait::async_trait;

use synapse_sandbox_platform::{glob_to_regex, CommandOutput, PlatformAdapter};
use synapse_sandbox_policy::Policy;
use synapse_sandbox_session::{ChildProcessSession, ShellSession};

use crate::error::Result;
use crate::result::ExecuteResult;

/// Stateful, policy-bound executor owning a shell session. `start` is
/// idempotent; `dispose` tears the session (and any adapter-owned resource)
/// down and must itself tolerate being called more than once.
#[async_trait]
pub trait Backend: Send {
    async fn execute(&mut self, command: &str) -> Result<ExecuteResult>;
    async fn dispose(&mut self);
}

/// Defeat trivial `~` <-> `$HOME` command-text evasion by checking three
/// variants of the command: the original, `~/` rewritten to `$HOME/`, and
/// the literal `$HOME` value rewritten to `~`. Deduplicated because a
/// command with no `~` or `$HOME` in it produces three identical variants.
fn command_variants(command: &str, home: &str) -> Vec<String> {
    let mut variants = vec![command.to_string()];

    let home_token_form = command.replace("~/", &format!("{}/", home.trim_end_matches('/')));
    if home_token_form != command {
        variants.push(home_token_form);
    }

    if !home.is_empty() {
        let tilde_form = command.replace(home, "~");
        if tilde_form != command && !variants.contains(&tilde_form) {
            variants.push(tilde_form);
        }
    }

    variants
}

/// Command-text blacklist pre-check (spec §4.4 step 2, §9 "Home-evasion
/// variants"). Intentionally conservative: substring/glob matching against
/// command text, not filesystem canonicalization — a blacklist of
/// `~/.ssh` blocks any command that merely *contains* that string.
/// Returns the first matching pattern, if any.
fn precheck_blacklist<'a>(command: &str, home: &str, blacklist: impl Iterator<Item = &'a String>) -> Option<&'a str> {
    let variants = command_variants(command, home);
    for pattern in blacklist {
        if pattern.contains('*') {
            if let Some(re) = glob_to_regex_compiled(pattern) {
                if variants.iter().any(|v| re.is_match(v)) {
                    return Some(pattern.as_str());
                }
            }
        } else if variants.iter().any(|v| v.contains(pattern.as_str())) {
            return Some(pattern.as_str());
        }
    }
    None
}

fn glob_to_regex_compiled(pattern: &str) -> Option<regex::Regex> {
    regex::Regex::new(&glob_to_regex(pattern)).ok()
}

/// Policy-enforced backend: pre-checks the blacklist against command text,
/// then delegates to a session running under the platform adapter's wrapper
/// command, and post-classifies the session's stderr as a violation.
pub struct LocalBackend {
    policy: Policy,
    home: String,
    adapter: Box<dyn PlatformAdapter>,
    session: Option<Box<dyn ShellSession>>,
}

impl LocalBackend {
    pub fn new(policy: Policy, home: String, adapter: Box<dyn PlatformAdapter>) -> Self {
        Self {
            policy,
            home,
            adapter,
            session: None,
        }
    }

    /// Idempotent: computes the wrapper command once and spawns the session
    /// under it. Subsequent calls are no-ops once a session exists.
    pub async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let wrapper_command = self.adapter.wrap_command(&self.policy)?;
        let session = ChildProcessSession::spawn(&wrapper_command).await?;
        self.session = Some(Box::new(session));
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn execute(&mut self, command: &str) -> Result<ExecuteResult> {
        self.start().await?;

        if let Some(pattern) = precheck_blacklist(command, &self.home, self.policy.filesystem.blacklist.iter()) {
            tracing::info!(pattern, "command blocked by blacklist pre-check");
            return Ok(ExecuteResult::blocked_by_precheck(pattern));
        }

        let session = self.session.as_mut().expect("start() ensured a session");
        let output = session.execute(command).await?;

        let command_output = CommandOutput {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            exit_code: output.exit_code,
        };

        if self.adapter.is_violation(&command_output) {
            let reason = self.adapter.extract_violation_reason(&command_output);
            let resource = self.adapter.extract_blocked_resource(&command_output);
            tracing::info!(?reason, ?resource, "command blocked by platform adapter");
            return Ok(ExecuteResult {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                blocked: true,
                blocked_reason: reason,
                blocked_resource: resource,
            });
        }

        Ok(ExecuteResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            blocked: false,
            blocked_reason: None,
            blocked_resource: None,
        })
    }

    async fn dispose(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.kill().await.is_err() {
                session.cleanup();
            }
        }
        self.adapter.cleanup();
    }
}

/// Used only when `Config::enabled == false` (spec §4.5). Bare session
/// under the default system shell; never blocks anything.
pub struct UnsandboxedBackend {
    session: Option<Box<dyn ShellSession>>,
}

impl UnsandboxedBackend {
    pub async fn new() -> Result<Self> {
        let shell = if cfg!(windows) { "cmd" } else { "/bin/bash" };
        let session = ChildProcessSession::spawn(shell).await?;
        Ok(Self {
            session: Some(Box::new(session)),
        })
    }
}

#[async_trait]
impl Backend for UnsandboxedBackend {
    async fn execute(&mut self, command: &str) -> Result<ExecuteResult> {
        let session = self
            .session
            .as_mut()
            .expect("UnsandboxedBackend::new always creates a session");
        let output = session.execute(command).await?;
        Ok(ExecuteResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            blocked: false,
            blocked_reason: None,
            blocked_resource: None,
        })
    }

    async fn dispose(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.kill().await.is_err() {
                session.cleanup();
            }
        }
    }
}
