//! Scheduler service: the facade the API layer talks to.
//!
//! Owns the time index, the scheduler loop task, the orchestrator, and the
//! history ledger. Every mutation persists first, then updates the index, then
//! notifies listeners.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use cronhook_core::config::SchedulerConfig;
use cronhook_core::{HistorySample, Job, JobId, RegisterJob};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::dispatch::{DispatchOutcome, Dispatcher, WebhookTransport};
use crate::engine::SchedulerLoop;
use crate::error::{Result, SchedulerError};
use crate::history::HistoryLedger;
use crate::index::TimeIndex;
use crate::listener::{JobEvent, Listeners, PauseReason};
use crate::orchestrator::{record_outcome, TickOrchestrator};
use crate::schedule;
use crate::store::{HistoryStore, JobStore};

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SchedulerService {
    jobs: Arc<dyn JobStore>,
    index: Arc<TimeIndex>,
    ledger: Arc<HistoryLedger>,
    dispatcher: Arc<Dispatcher>,
    listeners: Arc<Listeners>,
    orchestrator: Arc<TickOrchestrator>,
    clock: Arc<dyn Clock>,
    max_idle_sleep: Duration,
    running: Mutex<Option<Running>>,
}

impl SchedulerService {
    /// Build the service and seed the time index from every schedulable job.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        history: Arc<dyn HistoryStore>,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        let ledger = Arc::new(HistoryLedger::new(history, config.history_retention));
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            Duration::from_millis(config.dispatch_timeout_ms),
        ));
        let listeners = Arc::new(Listeners::new());
        let orchestrator = Arc::new(TickOrchestrator::new(
            jobs.clone(),
            ledger.clone(),
            dispatcher.clone(),
            listeners.clone(),
            config.failure_threshold,
            config.max_concurrent_dispatches,
        ));

        let service = Self {
            jobs,
            index: Arc::new(TimeIndex::new()),
            ledger,
            dispatcher,
            listeners,
            orchestrator,
            clock,
            max_idle_sleep: Duration::from_secs(config.max_idle_sleep_secs.max(1)),
            running: Mutex::new(None),
        };
        service.seed()?;
        Ok(service)
    }

    /// Insert every active job at its persisted next fire time.
    ///
    /// A persisted time in the past is kept as-is, even when the window has
    /// closed since, so the first loop pass fires it once as a catch-up and
    /// the tick retires it. Active jobs with nothing left to fire are
    /// persisted inactive.
    fn seed(&self) -> Result<()> {
        let now = self.clock.now();
        let mut pending = Vec::new();
        self.jobs.for_each(&mut |job| {
            if job.active {
                pending.push(job);
            }
        })?;

        let mut seeded = 0usize;
        let mut retired = 0usize;
        for job in pending {
            let due = match job.next_fire_at {
                Some(at) => Some(at),
                None if job.is_expired(now) => None,
                None => match schedule::first_fire_at(&job, now) {
                    Ok(Some(at)) => {
                        self.jobs.set_next_fire_at(job.id, Some(at))?;
                        Some(at)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "skipping job with unusable schedule");
                        continue;
                    }
                },
            };
            match due {
                Some(at) => {
                    self.index.upsert(job.id, at);
                    seeded += 1;
                }
                None => {
                    self.jobs.set_active(job.id, false)?;
                    retired += 1;
                }
            }
        }
        info!(seeded, retired, "time index seeded from store");
        Ok(())
    }

    /// Spawn the scheduler loop. A second call while running is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock().expect("service state poisoned");
        if running.is_some() {
            warn!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SchedulerLoop::new(
            self.index.clone(),
            self.orchestrator.clone(),
            self.clock.clone(),
        )
        .with_max_idle_sleep(self.max_idle_sleep);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the loop, then wait for in-flight dispatches to finish writing history.
    pub async fn shutdown(&self) {
        let running = self.running.lock().expect("service state poisoned").take();
        if let Some(Running {
            shutdown_tx,
            handle,
        }) = running
        {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }

        let tracker = self.orchestrator.tracker();
        tracker.close();
        info!(in_flight = tracker.len(), "waiting for in-flight dispatches");
        tracker.wait().await;
        info!("scheduler stopped");
    }

    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    pub fn index(&self) -> &TimeIndex {
        &self.index
    }

    /// The scheduler's notion of "now", for deriving display status.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub fn register(&self, input: RegisterJob) -> Result<Job> {
        let mut job = schedule::build_job(input, self.clock.now())?;
        job.id = self.jobs.save(&job)?;
        if let Some(at) = job.next_fire_at {
            self.index.upsert(job.id, at);
        }
        info!(job_id = %job.id, next_fire_at = ?job.next_fire_at, "job registered");
        self.listeners.emit(JobEvent::Registered { job: job.clone() });
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        self.jobs.get(id)
    }

    pub fn list(&self) -> Result<Vec<Job>> {
        self.jobs.list()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub fn delete(&self, id: JobId) -> Result<()> {
        self.index.remove(id);
        if !self.jobs.delete(id)? {
            return Err(SchedulerError::JobNotFound { id });
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub fn pause(&self, id: JobId) -> Result<Job> {
        let mut job = self.jobs.get(id)?;
        self.jobs.set_active(id, false)?;
        self.index.remove(id);
        job.active = false;
        info!(job_id = %id, "job paused");
        self.listeners.emit(JobEvent::Paused {
            job: job.clone(),
            reason: PauseReason::Requested,
        });
        Ok(job)
    }

    /// Reactivate a job with a cleared failure counter and a fresh next fire time.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn resume(&self, id: JobId) -> Result<Job> {
        let now = self.clock.now();
        let job = self.jobs.get(id)?;
        if job.is_expired(now) {
            return Err(SchedulerError::Conflict(format!("job {id} has expired")));
        }

        let next = schedule::first_fire_at(&job, now)?.ok_or_else(|| {
            SchedulerError::Conflict(format!("job {id} has no remaining occurrence"))
        })?;

        // store then index, under the index lock: the same order a tick takes
        // them, so a concurrent tick cannot leave the two disagreeing
        {
            let mut state = self.index.lock();
            self.jobs.resume(id, next, now)?;
            state.insert(id, next.timestamp_millis());
        }
        self.index.wake();
        let job = self.jobs.get(id)?;

        info!(job_id = %id, next_fire_at = %next, "job resumed");
        self.listeners.emit(JobEvent::Resumed { job: job.clone() });
        Ok(job)
    }

    /// Fire the webhook once, now, outside the schedule.
    ///
    /// The attempt lands in history but leaves the failure counter and the
    /// next fire time untouched.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn trigger(&self, id: JobId) -> Result<(Job, DispatchOutcome)> {
        let job = self.jobs.get(id)?;
        let fired_at = self.clock.now();
        let outcome = self.dispatcher.dispatch(&job).await;
        record_outcome(&self.ledger, id, fired_at, &outcome);
        info!(job_id = %id, status = outcome.status_code, "job triggered manually");
        Ok((job, outcome))
    }

    pub fn history_for_job(&self, id: JobId, limit: usize) -> Result<Vec<HistorySample>> {
        self.jobs.get(id)?;
        self.ledger.list_for_job(id, limit)
    }

    pub fn history(&self, limit: usize) -> Result<Vec<HistorySample>> {
        self.ledger.list_global(limit)
    }
}
