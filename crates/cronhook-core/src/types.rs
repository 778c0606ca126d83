use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned job identifier. Immutable once a job has been saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Placeholder carried by a job that has not been saved yet.
    pub const UNASSIGNED: JobId = JobId(0);

    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(JobId)
    }
}

/// Display status, derived from the persisted active flag and the validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Active, but `start_at` is still in the future.
    NotStarted,
    Active,
    /// Inactive by request or by auto-pause after repeated failures.
    Paused,
    /// `end_at` has passed; the job never fires again.
    Expired,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(JobStatus::NotStarted),
            "active" => Ok(JobStatus::Active),
            "paused" => Ok(JobStatus::Paused),
            "expired" => Ok(JobStatus::Expired),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted webhook job.
///
/// The whole record is also the JSON body POSTed to `webhook_url` on every fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Recurrence rule; empty for one-shot jobs.
    #[serde(default)]
    pub cron_expr: String,
    pub is_recurring: bool,
    /// Single fire instant of a one-shot job.
    pub run_at: Option<DateTime<Utc>>,
    pub start_at: DateTime<Utc>,
    /// `None` means the window never closes.
    pub end_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Consecutive failed dispatches since the last success or resume.
    pub failure_count: u32,
    pub webhook_url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Occurrence the scheduler will fire next, if any.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// True once `now` is strictly past the end of the validity window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_some_and(|end| now > end)
    }

    /// True when `at` lies inside `[start_at, end_at]`.
    pub fn in_window(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_at && self.end_at.map_or(true, |end| at <= end)
    }

    pub fn status(&self, now: DateTime<Utc>) -> JobStatus {
        if self.is_expired(now) {
            JobStatus::Expired
        } else if !self.active {
            JobStatus::Paused
        } else if now < self.start_at {
            JobStatus::NotStarted
        } else {
            JobStatus::Active
        }
    }

    /// Whether the job belongs in the time index at `now`.
    pub fn is_schedulable(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }
}

/// Registration input, as accepted by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterJob {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cron_expr: String,
    pub is_recurring: bool,
    pub run_at: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub webhook_url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One recorded webhook attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySample {
    pub job_id: JobId,
    pub fired_at: DateTime<Utc>,
    /// HTTP status of the response, or 503 when the request never completed.
    pub status_code: u16,
    pub duration_ms: u64,
}

impl HistorySample {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
