//! Time index: the ordered set of pending timer entries.
//!
//! Entries are keyed by `(due_at_ms, job_id)` so ties on the due instant are
//! broken by id. An auxiliary `job_id -> due_at_ms` map keeps removal at
//! O(log n) and enforces a single entry per job.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use cronhook_core::JobId;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// A pending fire: transient, never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub job_id: JobId,
    pub due_at_ms: i64,
}

impl TimerEntry {
    pub fn due_at(&self) -> DateTime<Utc> {
        millis_to_utc(self.due_at_ms)
    }
}

#[derive(Debug, Default)]
pub(crate) struct IndexState {
    ordered: BTreeSet<(i64, JobId)>,
    by_id: HashMap<JobId, i64>,
}

impl IndexState {
    pub(crate) fn insert(&mut self, job_id: JobId, due_at_ms: i64) {
        if let Some(old) = self.by_id.insert(job_id, due_at_ms) {
            self.ordered.remove(&(old, job_id));
        }
        self.ordered.insert((due_at_ms, job_id));
    }

    pub(crate) fn remove(&mut self, job_id: JobId) -> bool {
        match self.by_id.remove(&job_id) {
            Some(due) => self.ordered.remove(&(due, job_id)),
            None => false,
        }
    }

    pub(crate) fn peek_min(&self) -> Option<TimerEntry> {
        self.ordered
            .first()
            .map(|&(due_at_ms, job_id)| TimerEntry { job_id, due_at_ms })
    }

    pub(crate) fn pop_min(&mut self) -> Option<TimerEntry> {
        let (due_at_ms, job_id) = self.ordered.pop_first()?;
        self.by_id.remove(&job_id);
        Some(TimerEntry { job_id, due_at_ms })
    }
}

/// Lock-protected time index shared by the scheduler loop and the mutation paths
/// (register, pause, resume, delete).
#[derive(Debug, Default)]
pub struct TimeIndex {
    state: Mutex<IndexState>,
    wake: Notify,
}

impl TimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `job_id`, then wake the scheduler loop.
    pub fn upsert(&self, job_id: JobId, due_at: DateTime<Utc>) {
        self.lock().insert(job_id, due_at.timestamp_millis());
        self.wake();
    }

    /// Delete the entry for `job_id`. Returns whether one was present.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.lock().remove(job_id)
    }

    pub fn peek_min(&self) -> Option<TimerEntry> {
        self.lock().peek_min()
    }

    pub fn pop_min(&self) -> Option<TimerEntry> {
        self.lock().pop_min()
    }

    /// Due instant currently scheduled for `job_id`, if any.
    pub fn due_at(&self, job_id: JobId) -> Option<DateTime<Utc>> {
        self.lock().by_id.get(&job_id).map(|&ms| millis_to_utc(ms))
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.lock().by_id.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking, coalesced wake signal: at most one pending wake is stored.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Exclusive access for a whole read-modify-write step.
    pub(crate) fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().expect("time index lock poisoned")
    }
}

pub(crate) fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
