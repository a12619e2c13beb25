/// Failures from a [`crate::ShellSession`]. A Manager treats any of these as
/// a `SessionFailure`: rebuild the backend and retry once.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn session process: {0}")]
    Spawn(std::io::Error),

    #[error("i/o error talking to session process: {0}")]
    Io(#[from] std::io::Error),

    #[error("session process exited before returning a result")]
    ChildExited,

    #[error("session process did not emit a boundary marker before EOF")]
    MarkerNotFound,
}

pub type Result<T> = std::result::Result<T, SessionError>;
