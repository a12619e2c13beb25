use std::path::PathBuf;

/// Errors surfaced by this crate.
///
/// Per the sandbox's error taxonomy, most failures here are *recovered*
/// internally (a malformed config layer becomes a logged warning and an
/// empty layer, never a propagated `Err`). The variants below are only
/// raised by the handful of operations spec'd to fail loudly:
/// [`crate::add_permanent_whitelist`] on I/O failure, and
/// [`crate::validate_sandbox_config`] when asked to report rather than
/// silently coerce.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid sandbox config: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
