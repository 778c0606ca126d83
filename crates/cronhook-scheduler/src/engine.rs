//! The scheduler loop: sleeps until the earliest timer entry is due (or a wake
//! signal arrives), then drains every due entry through a [`TickHandler`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronhook_core::JobId;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::index::TimeIndex;

/// Resolves the next fire time of a job that has just come due.
///
/// Invoked with the time index lock held, so implementations must not call back
/// into the [`TimeIndex`] and must not wait on network I/O.
pub trait TickHandler: Send + Sync {
    /// Returns the instant to reinsert the job at, or `None` to retire it.
    fn on_due(&self, job_id: JobId, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Number of handler invocations.
    pub fired: usize,
    /// Earliest remaining entry, if any.
    pub next_due: Option<DateTime<Utc>>,
}

/// Single coordinating loop; exactly one runs per process.
pub struct SchedulerLoop {
    index: Arc<TimeIndex>,
    handler: Arc<dyn TickHandler>,
    clock: Arc<dyn Clock>,
    max_idle_sleep: Duration,
}

impl SchedulerLoop {
    pub fn new(index: Arc<TimeIndex>, handler: Arc<dyn TickHandler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index,
            handler,
            clock,
            max_idle_sleep: Duration::from_secs(cronhook_core::config::DEFAULT_MAX_IDLE_SLEEP_SECS),
        }
    }

    /// Cap on any single sleep, including the empty-index case.
    pub fn with_max_idle_sleep(mut self, max_idle_sleep: Duration) -> Self {
        self.max_idle_sleep = max_idle_sleep;
        self
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or its sender is dropped.
    ///
    /// The first pass happens immediately so entries that fell due while the
    /// process was down are caught up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler loop started");
        let mut sleep_for = Duration::ZERO;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = self.index.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }

            let report = self.drain();
            sleep_for = self.sleep_duration(report.next_due);
            debug!(
                fired = report.fired,
                next_due = ?report.next_due,
                sleep_ms = sleep_for.as_millis() as u64,
                "scheduling next wake"
            );
        }

        info!("scheduler loop shutting down");
    }

    /// Fire every entry due at the current instant.
    ///
    /// The index lock is held per entry for the whole pop, resolve, reinsert
    /// step, so a concurrent upsert or remove for the same job is ordered
    /// entirely before or entirely after it. A job fires at most once per pass:
    /// if a resolved time is not in the future the pass stops there and the
    /// entry is left for the next pass.
    pub fn drain(&self) -> DrainReport {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let mut fired_this_pass: HashSet<JobId> = HashSet::new();

        let next_due = loop {
            let mut state = self.index.lock();
            let Some(entry) = state.peek_min() else {
                break None;
            };
            if entry.due_at_ms > now_ms || fired_this_pass.contains(&entry.job_id) {
                break Some(entry.due_at());
            }

            state.pop_min();
            fired_this_pass.insert(entry.job_id);

            match self.handler.on_due(entry.job_id, now) {
                Some(next) => state.insert(entry.job_id, next.timestamp_millis()),
                None => debug!(job_id = %entry.job_id, "timer retired"),
            }
        };

        DrainReport {
            fired: fired_this_pass.len(),
            next_due,
        }
    }

    fn sleep_duration(&self, next_due: Option<DateTime<Utc>>) -> Duration {
        match next_due {
            None => self.max_idle_sleep,
            Some(at) => (at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_idle_sleep),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every call and answers with a fixed policy.
    struct Recorder<F: Fn(JobId) -> Option<DateTime<Utc>> + Send + Sync> {
        calls: Mutex<Vec<JobId>>,
        policy: F,
    }

    impl<F: Fn(JobId) -> Option<DateTime<Utc>> + Send + Sync> Recorder<F> {
        fn new(policy: F) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                policy,
            })
        }

        fn calls(&self) -> Vec<JobId> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<F: Fn(JobId) -> Option<DateTime<Utc>> + Send + Sync> TickHandler for Recorder<F> {
        fn on_due(&self, job_id: JobId, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
            self.calls.lock().unwrap().push(job_id);
            (self.policy)(job_id)
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        // whole second keeps millisecond arithmetic exact
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn drain_fires_only_due_entries_once() {
        let now = fixed_now();
        let index = Arc::new(TimeIndex::new());
        let handler = Recorder::new(|_| None);
        let clock = Arc::new(ManualClock::new(now));

        let n = 1000;
        for i in 0..n {
            index.upsert(JobId(i + 1), now - chrono::Duration::hours(i));
            index.upsert(JobId(n + i + 1), now + chrono::Duration::hours(i + 1));
        }
        assert_eq!(index.len(), 2 * n as usize);

        let engine = SchedulerLoop::new(index.clone(), handler.clone(), clock);
        let report = engine.drain();

        assert_eq!(report.fired, n as usize);
        let calls = handler.calls();
        assert_eq!(calls.len(), n as usize);
        assert!(calls.iter().all(|id| id.0 <= n));
        assert_eq!(index.len(), n as usize);
        assert_eq!(report.next_due, Some(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn returned_time_is_reinserted_exactly_and_none_retires() {
        let now = fixed_now();
        let next = now + chrono::Duration::seconds(30);
        let index = Arc::new(TimeIndex::new());
        let handler = Recorder::new(move |id| (id.0 % 2 == 0).then_some(next));
        let engine = SchedulerLoop::new(
            index.clone(),
            handler.clone(),
            Arc::new(ManualClock::new(now)),
        );

        for id in 1..=10 {
            index.upsert(JobId(id), now);
        }
        let report = engine.drain();

        assert_eq!(report.fired, 10);
        for id in 1..=10 {
            if id % 2 == 0 {
                assert_eq!(index.due_at(JobId(id)), Some(next));
            } else {
                assert!(!index.contains(JobId(id)));
            }
        }
        assert_eq!(report.next_due, Some(next));
    }

    #[test]
    fn past_resolution_waits_for_next_pass() {
        let now = fixed_now();
        let index = Arc::new(TimeIndex::new());
        let handler = Recorder::new(move |_| Some(now - chrono::Duration::seconds(1)));
        let engine = SchedulerLoop::new(
            index.clone(),
            handler.clone(),
            Arc::new(ManualClock::new(now)),
        );

        index.upsert(JobId(1), now);
        let report = engine.drain();

        assert_eq!(report.fired, 1);
        assert!(index.contains(JobId(1)));
        assert!(report.next_due.unwrap() <= now);
        assert_eq!(engine.sleep_duration(report.next_due), Duration::ZERO);
    }

    #[test]
    fn empty_index_sleeps_for_the_idle_cap() {
        let engine = SchedulerLoop::new(
            Arc::new(TimeIndex::new()),
            Recorder::new(|_| None),
            Arc::new(ManualClock::new(fixed_now())),
        )
        .with_max_idle_sleep(Duration::from_secs(42));

        let report = engine.drain();
        assert_eq!(report.fired, 0);
        assert_eq!(engine.sleep_duration(report.next_due), Duration::from_secs(42));
    }

    /// Parks inside `on_due` until released, then reschedules at `next`.
    struct Parked {
        entered: std::sync::Barrier,
        release: std::sync::Barrier,
        next: DateTime<Utc>,
    }

    impl TickHandler for Parked {
        fn on_due(&self, _job_id: JobId, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
            self.entered.wait();
            self.release.wait();
            Some(self.next)
        }
    }

    /// Runs one drain of job 1 while another thread applies `mutate` to the
    /// index, and returns whether `mutate` finished before the tick did.
    fn race_mutation_with_tick(
        index: &Arc<TimeIndex>,
        next: DateTime<Utc>,
        mutate: impl FnOnce(&TimeIndex) + Send,
    ) -> bool {
        let now = fixed_now();
        let handler = Arc::new(Parked {
            entered: std::sync::Barrier::new(2),
            release: std::sync::Barrier::new(2),
            next,
        });
        let engine = SchedulerLoop::new(index.clone(), handler.clone(), Arc::new(ManualClock::new(now)));
        index.upsert(JobId(1), now);
        let mutated = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            let drain = scope.spawn(|| engine.drain());
            handler.entered.wait();

            let mutator = scope.spawn(|| {
                mutate(index.as_ref());
                mutated.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            let finished_early = mutated.load(Ordering::SeqCst);

            handler.release.wait();
            assert_eq!(drain.join().unwrap().fired, 1);
            mutator.join().unwrap();
            finished_early
        })
    }

    #[test]
    fn upsert_during_a_tick_lands_after_the_reinsert() {
        let index = Arc::new(TimeIndex::new());
        let tick_next = fixed_now() + chrono::Duration::minutes(1);
        let user_time = fixed_now() + chrono::Duration::hours(2);

        let finished_early =
            race_mutation_with_tick(&index, tick_next, |index| index.upsert(JobId(1), user_time));

        assert!(!finished_early, "upsert must wait for the in-flight tick");
        assert_eq!(index.due_at(JobId(1)), Some(user_time));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_during_a_tick_is_not_undone_by_the_reinsert() {
        let index = Arc::new(TimeIndex::new());
        let tick_next = fixed_now() + chrono::Duration::minutes(1);

        let finished_early = race_mutation_with_tick(&index, tick_next, |index| {
            index.remove(JobId(1));
        });

        assert!(!finished_early, "remove must wait for the in-flight tick");
        assert!(!index.contains(JobId(1)));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn loop_fires_due_job_and_stops_on_shutdown() {
        let index = Arc::new(TimeIndex::new());
        let count = Arc::new(AtomicUsize::new(0));

        struct Counter(Arc<AtomicUsize>);
        impl TickHandler for Counter {
            fn on_due(&self, _job_id: JobId, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                None
            }
        }

        let engine = SchedulerLoop::new(
            index.clone(),
            Arc::new(Counter(count.clone())),
            Arc::new(SystemClock),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        // a burst of wake signals collapses into ordinary passes
        for _ in 0..100 {
            index.wake();
        }
        index.upsert(JobId(1), Utc::now());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(index.is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_wakes_a_sleeping_loop() {
        let index = Arc::new(TimeIndex::new());
        let handler = Recorder::new(|_| None);
        let engine = SchedulerLoop::new(index.clone(), handler.clone(), Arc::new(SystemClock));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        // let the loop settle into its hour-long idle sleep
        tokio::time::sleep(Duration::from_millis(50)).await;
        index.upsert(JobId(9), Utc::now());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handler.calls(), vec![JobId(9)]);
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit when the shutdown sender is dropped")
            .unwrap();
    }
}
