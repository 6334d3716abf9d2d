use thiserror::Error;

/// Raised by Finalize only; every other command absorbs invalid transitions.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("{0}")]
    InvalidSession(String),

    #[error("{0}")]
    InvalidSection(String),

    /// The repository failed; the in-memory session is untouched and can be retried.
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl FinalizeError {
    pub fn invalid_session(message: impl Into<String>) -> Self {
        FinalizeError::InvalidSession(message.into())
    }

    pub fn invalid_section(message: impl Into<String>) -> Self {
        FinalizeError::InvalidSection(message.into())
    }

    /// Validation failures are the caller's to fix; persistence failures can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FinalizeError::Persistence(_))
    }
}
