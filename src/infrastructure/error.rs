use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("a timer is already active on the server: {0}")]
    Conflict(String),
    #[error("credential store error: {0}")]
    Credential(String),
}

impl TrackerError {
    /// Expired or invalid credentials force a purge and re-authentication;
    /// they are never treated as a generic network failure.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, TrackerError::Auth(_))
    }

    /// Recoverable failures keep in-memory state intact so the same action
    /// can be retried without losing tracked time.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrackerError::Network(_) | TrackerError::Validation(_))
    }
}
