use thiserror::Error;

#[derive(Debug, Error)]
pub enum DripError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retriable infrastructure fault (storage busy, capacity exceeded).
    #[error("Storage temporarily unavailable: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Content pack not found: {pack_key}")]
    PackNotFound { pack_key: String },

    #[error("Subscription not found: {id}")]
    SubscriptionNotFound { id: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DripError {
    /// Short error code string used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DripError::Config(_) => "CONFIG_ERROR",
            DripError::Transient(_) => "BUSY",
            DripError::Database(_) => "DATABASE_ERROR",
            DripError::PackNotFound { .. } => "PACK_NOT_FOUND",
            DripError::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND",
            DripError::Delivery(_) => "DELIVERY_FAILED",
            DripError::Worker(_) => "WORKER_ERROR",
            DripError::Serialization(_) => "SERIALIZATION_ERROR",
            DripError::Io(_) => "IO_ERROR",
            DripError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DripError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, DripError>;
