//! Payment adapter error types.

use thiserror::Error;

/// Errors raised while accepting a provider callback.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Callback token missing")]
    MissingToken,

    #[error("Callback token invalid")]
    InvalidToken,

    #[error("Callback signature missing")]
    MissingSignature,

    #[error("Callback signature invalid")]
    InvalidSignature,

    /// The body could not be understood.
    #[error("Malformed callback: {0}")]
    Malformed(String),
}

impl CallbackError {
    /// Returns true if the callback failed authenticity checks.
    pub fn is_verification_failure(&self) -> bool {
        !matches!(self, CallbackError::Malformed(_))
    }
}

impl From<serde_json::Error> for CallbackError {
    fn from(e: serde_json::Error) -> Self {
        CallbackError::Malformed(e.to_string())
    }
}
