use serde::{Deserialize, Serialize};

/// Returned by every [`crate::Backend::execute`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_resource: Option<String>,
}

impl ExecuteResult {
    /// Build a blocked result from the pre-check (§4.4 step 2): the session
    /// is never invoked, so stdout is always empty and exit code is fixed at 1.
    pub fn blocked_by_precheck(pattern: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Access denied by sandbox policy: {pattern}"),
            exit_code: 1,
            blocked: true,
            blocked_reason: Some("deny file-read".to_string()),
            blocked_resource: Some(pattern.to_string()),
        }
    }
}
