use synapse_sandbox_platform::PlatformError;
use synapse_sandbox_session::SessionError;

/// The error taxonomy surfaced across a Manager's lifetime. Most failure
/// modes this subsystem can hit are recovered internally (a malformed
/// config layer, a session that dies but gets rebuilt) and never reach this
/// enum — it exists for the handful of conditions that are genuinely
/// unrecoverable at this layer: an unavailable OS sandboxing mechanism, an
/// unregistered provider name, or a session failure that survives one
/// rebuild-and-retry.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    PlatformUnavailable(#[from] PlatformError),

    #[error("unknown provider \"{name}\" (known: {})", known.join(", "))]
    UnknownProvider { name: String, known: Vec<String> },

    #[error("session failure: {0}")]
    SessionFailure(#[from] SessionError),

    #[error("cannot register provider with an empty name")]
    InvalidRegistration,
}

pub type Result<T> = std::result::Result<T, SandboxError>;
