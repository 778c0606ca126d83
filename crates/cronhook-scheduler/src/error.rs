use cronhook_core::JobId;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cron expression or validity window cannot produce a fire time.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Registration input was rejected.
    #[error("Invalid job: {0}")]
    Validation(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// The operation is not allowed in the job's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The webhook request could not be built or sent.
    #[error("Webhook transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Conflict(_) => "CONFLICT",
            SchedulerError::Transport(_) => "TRANSPORT_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
