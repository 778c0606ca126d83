//! Tick Orchestrator: the [`TickHandler`] that turns a due job id into a
//! webhook dispatch plus the job's next fire time.
//!
//! Per tick, in order:
//!
//! 1. load the job; vanished or inactive jobs retire;
//! 2. a job whose failure counter reached the threshold is auto-paused and retires;
//! 3. an occurrence past the end of the window retires the job as expired;
//! 4. the dispatch is spawned on a tracked task (the loop never waits on it);
//! 5. the next occurrence is computed and persisted, or the job retires.
//!
//! The dispatch task records history and updates the failure counter when it
//! completes. The threshold check therefore sees the outcome of the previous
//! completed dispatch, never the one just launched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cronhook_core::{HistorySample, Job, JobId};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::engine::TickHandler;
use crate::error::SchedulerError;
use crate::history::HistoryLedger;
use crate::listener::{JobEvent, Listeners, PauseReason};
use crate::schedule;
use crate::store::JobStore;

/// Delay before a tick that hit a store error is retried.
pub const STORE_RETRY_BACKOFF_SECS: i64 = 5;

pub struct TickOrchestrator {
    jobs: Arc<dyn JobStore>,
    ledger: Arc<HistoryLedger>,
    dispatcher: Arc<Dispatcher>,
    listeners: Arc<Listeners>,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    failure_threshold: u32,
}

impl TickOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ledger: Arc<HistoryLedger>,
        dispatcher: Arc<Dispatcher>,
        listeners: Arc<Listeners>,
        failure_threshold: u32,
        max_concurrent_dispatches: usize,
    ) -> Self {
        Self {
            jobs,
            ledger,
            dispatcher,
            listeners,
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Tracker holding every in-flight dispatch task.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    fn spawn_dispatch(&self, job: Job, fired_at: DateTime<Utc>) {
        let dispatcher = self.dispatcher.clone();
        let ledger = self.ledger.clone();
        let jobs = self.jobs.clone();
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(job_id = %job.id, "dispatch permits closed; skipping webhook");
                return;
            };
            let outcome = dispatcher.dispatch(&job).await;
            record_outcome(&ledger, job.id, fired_at, &outcome);
            tally_outcome(jobs.as_ref(), job.id, fired_at, &outcome);
        });
    }

    fn auto_pause(&self, mut job: Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Err(e) = self.jobs.set_active(job.id, false) {
            error!(job_id = %job.id, error = %e, "failed to persist auto-pause; retrying");
            return Some(retry_at(now));
        }
        warn!(
            job_id = %job.id,
            failures = job.failure_count,
            threshold = self.failure_threshold,
            "job auto-paused after repeated webhook failures"
        );
        job.active = false;
        self.listeners.emit(JobEvent::Paused {
            job,
            reason: PauseReason::FailureThreshold,
        });
        None
    }

    /// Persist a job that will never fire again as inactive.
    fn finish(&self, job_id: JobId) {
        let result = self
            .jobs
            .set_active(job_id, false)
            .and_then(|()| self.jobs.set_next_fire_at(job_id, None));
        if let Err(e) = result {
            error!(job_id = %job_id, error = %e, "failed to persist retired job");
        }
    }
}

impl TickHandler for TickOrchestrator {
    fn on_due(&self, job_id: JobId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let job = match self.jobs.get(job_id) {
            Ok(job) => job,
            Err(SchedulerError::JobNotFound { .. }) => {
                error!(job_id = %job_id, "due job no longer exists; retiring timer");
                return None;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to load due job");
                if let Err(e) = self.jobs.increment_failures(job_id, now) {
                    debug!(job_id = %job_id, error = %e, "failure counter not updated");
                }
                return Some(retry_at(now));
            }
        };

        if !job.active {
            info!(job_id = %job_id, "due job is inactive; retiring timer");
            return None;
        }

        if job.failure_count >= self.failure_threshold {
            return self.auto_pause(job, now);
        }

        let occurrence = job.next_fire_at.unwrap_or(now);
        if job.end_at.is_some_and(|end| occurrence > end) {
            info!(job_id = %job_id, "validity window closed; job expired");
            self.finish(job_id);
            return None;
        }

        info!(job_id = %job_id, occurrence = %occurrence, url = %job.webhook_url, "firing job");
        self.spawn_dispatch(job.clone(), now);

        if job.is_expired(now) {
            info!(job_id = %job_id, "job expired after its final fire");
            self.finish(job_id);
            return None;
        }

        match schedule::next_fire_after(&job, occurrence, now) {
            Ok(Some(next)) => {
                if let Err(e) = self.jobs.set_next_fire_at(job_id, Some(next)) {
                    // the in-memory entry still carries the schedule
                    warn!(job_id = %job_id, error = %e, "failed to persist next fire time");
                }
                debug!(job_id = %job_id, next = %next, "job rescheduled");
                Some(next)
            }
            Ok(None) => {
                info!(job_id = %job_id, "no further occurrence; job retired");
                self.finish(job_id);
                None
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "stored schedule is unusable; retiring");
                self.finish(job_id);
                None
            }
        }
    }
}

fn retry_at(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(STORE_RETRY_BACKOFF_SECS)
}

/// Append the attempt to the history ledger. Store errors are logged only.
pub(crate) fn record_outcome(
    ledger: &HistoryLedger,
    job_id: JobId,
    fired_at: DateTime<Utc>,
    outcome: &DispatchOutcome,
) {
    let sample = HistorySample {
        job_id,
        fired_at,
        status_code: outcome.status_code,
        duration_ms: outcome.duration.as_millis() as u64,
    };
    if let Err(e) = ledger.record(&sample) {
        error!(job_id = %job_id, error = %e, "failed to record history sample");
    }
}

/// Reset the failure counter on success, bump it on failure. An attempt fired
/// before the job's last resume no longer counts.
fn tally_outcome(
    jobs: &dyn JobStore,
    job_id: JobId,
    fired_at: DateTime<Utc>,
    outcome: &DispatchOutcome,
) {
    let result = if outcome.is_success() {
        jobs.reset_failures(job_id, fired_at)
    } else {
        jobs.increment_failures(job_id, fired_at).map(|failures| {
            if let Some(failures) = failures {
                debug!(job_id = %job_id, failures, "failure counter incremented");
            }
        })
    };
    match result {
        Ok(()) => {}
        // deleted while the request was in flight
        Err(SchedulerError::JobNotFound { .. }) => {}
        Err(e) => error!(job_id = %job_id, error = %e, "failed to update failure counter"),
    }
}
