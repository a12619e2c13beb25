/// Platform adapters fail closed: the only error this crate produces is
/// "the required OS mechanism is unavailable," which callers must treat as
/// fatal rather than falling back to an unwrapped shell.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;
