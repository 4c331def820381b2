use thiserror::Error;

#[derive(Debug, Error)]
pub enum RollcallError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collaborator unavailable ({collaborator}): {reason}")]
    Collaborator {
        collaborator: &'static str,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RollcallError {
    /// Short error code string sent to clients in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RollcallError::Config(_) => "CONFIG_ERROR",
            RollcallError::Collaborator { .. } => "UNAVAILABLE",
            RollcallError::Serialization(_) => "SERIALIZATION_ERROR",
            RollcallError::Io(_) => "IO_ERROR",
            RollcallError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RollcallError>;
