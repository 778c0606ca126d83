//! Shared configuration, error taxonomy, and data model for cronhook.

pub mod config;
pub mod error;
pub mod types;

pub use config::CronhookConfig;
pub use error::{CoreError, Result};
pub use types::{HistorySample, Job, JobId, JobStatus, RegisterJob};
