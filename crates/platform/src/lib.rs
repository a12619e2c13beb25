//! Platform-specific translation of a [`synapse_sandbox_policy::Policy`]
//! into a concrete wrapper shell command, plus stderr classification for the
//! resulting process output. Every adapter fails closed: if its OS
//! mechanism is unavailable, construction or `wrap_command` errors rather
//! than handing back an unwrapped shell.

mod adapter;
mod error;
mod glob;
mod linux;
mod macos;

pub use adapter::{CommandOutput, PlatformAdapter};
pub use error::{PlatformError, Result};
pub use glob::glob_to_regex;
pub use linux::LinuxAdapter;
pub use macos::MacAdapter;

/// Resolve the adapter for a platform identifier (`"linux"`, `"darwin"`).
/// Any other identifier fails closed rather than falling back to an
/// unsandboxed shell.
pub fn get_platform_adapter(platform: &str) -> Result<Box<dyn PlatformAdapter>> {
    match platform {
        "linux" => Ok(Box::new(LinuxAdapter::new())),
        "darwin" => Ok(Box::new(MacAdapter::new())),
        other => Err(PlatformError::Unavailable(format!(
            "Sandbox not supported on platform: {other}"
        ))),
    }
}

/// The platform identifier for the host this process is running on, in the
/// vocabulary [`get_platform_adapter`] expects (`"linux"`, `"darwin"`, or
/// whatever `std::env::consts::OS` reports otherwise).
pub fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_fails_closed() {
        let err = get_platform_adapter("windows").unwrap_err();
        assert_eq!(err.to_string(), "Sandbox not supported on platform: windows");
    }

    #[test]
    fn linux_and_darwin_resolve() {
        assert!(get_platform_adapter("linux").is_ok());
        assert!(get_platform_adapter("darwin").is_ok());
    }
}
