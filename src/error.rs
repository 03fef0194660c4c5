use thiserror::Error;

/// Failures raised by ledger storage and the operations built on it.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input rejected before any state was touched.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Reset requested for a module the user has not completed.
    #[error("module '{module}' is not in the user's completed modules")]
    NotCompleted { module: String },

    #[error("email already in use: {0}")]
    DuplicateEmail(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl LedgerError {
    /// Returns `true` for errors caused by the caller rather than the backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::Storage(_))
    }
}
