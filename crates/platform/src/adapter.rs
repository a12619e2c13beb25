use crate::error::Result;
use synapse_sandbox_policy::Policy;

/// The raw result of one command invocation, as seen by a session. Kept
/// separate from the richer `ExecuteResult` the sandbox crate returns to
/// callers — this crate only needs enough to classify stderr.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Translates a [`Policy`] into the concrete OS mechanism (a wrapper shell
/// command, possibly backed by a profile file) and classifies a command's
/// stderr as a sandbox violation or not.
///
/// Implementations must fail closed: if the required OS primitive is
/// unavailable, [`PlatformAdapter::wrap_command`] returns an error — it must
/// never fall back to an unwrapped shell.
pub trait PlatformAdapter: Send {
    /// Build the wrapper shell command the session will launch. May have
    /// side effects (writing a profile file) on adapters that need them;
    /// `&mut self` lets such adapters remember state for `cleanup`.
    fn wrap_command(&mut self, policy: &Policy) -> Result<String>;

    fn is_violation(&self, output: &CommandOutput) -> bool;
    fn extract_violation_reason(&self, output: &CommandOutput) -> Option<String>;
    fn extract_blocked_resource(&self, output: &CommandOutput) -> Option<String>;

    /// Best-effort teardown of any adapter-owned resource (e.g. a profile
    /// file). Must tolerate the resource already being gone.
    fn cleanup(&mut self);
}
