use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("audit database error: {0}")]
    AuditDb(String),

    #[error("audit record not found: {0}")]
    AuditNotFound(Uuid),

    #[error("audit record {0} is finalized and can no longer change")]
    AuditFinalized(Uuid),

    #[error("invalid audit status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("invalid audit status: {0}")]
    InvalidStatus(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
