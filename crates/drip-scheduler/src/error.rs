use drip_core::error::DripError;
use thiserror::Error;

/// Errors surfaced by the dispatcher, the batch coordinator and the controller.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store or resolver fault, including missing packs.
    #[error(transparent)]
    Core(#[from] DripError),

    /// The mail provider rejected or never acknowledged the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Transient storage errors outlasted the retry budget.
    #[error("Storage busy after {attempts} attempts: {reason}")]
    Busy { attempts: u32, reason: String },
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Core(e) => e.code(),
            SchedulerError::Delivery(_) => "DELIVERY_FAILED",
            SchedulerError::Busy { .. } => "BUSY",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, SchedulerError::Busy { .. })
    }
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Core(crate::store::map_sqlite_error(e))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
