//! Job lifecycle notifications for external listeners (alerting and the like).

use std::sync::{Arc, RwLock};

use cronhook_core::Job;
use tracing::debug;

/// Why a job stopped being scheduled after a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Paused through the API.
    Requested,
    /// Paused by the scheduler after too many consecutive failed dispatches.
    FailureThreshold,
}

/// Emitted synchronously after the corresponding store mutation commits.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Registered { job: Job },
    Paused { job: Job, reason: PauseReason },
    Resumed { job: Job },
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Registered { job }
            | JobEvent::Paused { job, .. }
            | JobEvent::Resumed { job } => job,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Registered { .. } => "registered",
            JobEvent::Paused { .. } => "paused",
            JobEvent::Resumed { .. } => "resumed",
        }
    }
}

/// Receives [`JobEvent`]s. Called on the emitting task; keep it short.
pub trait JobListener: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

impl<F> JobListener for F
where
    F: Fn(&JobEvent) + Send + Sync,
{
    fn on_event(&self, event: &JobEvent) {
        self(event)
    }
}

/// Registry of listeners, shared as `Arc<Listeners>`.
#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn JobListener>) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Deliver `event` to every listener in registration order.
    pub fn emit(&self, event: JobEvent) {
        // snapshot so a listener may register another without deadlocking
        let listeners = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .clone();
        debug!(
            job_id = %event.job().id,
            event = event.kind(),
            listeners = listeners.len(),
            "emitting job event"
        );
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}
