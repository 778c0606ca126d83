//! History Ledger: bounded per-job record of webhook outcomes.

use std::sync::Arc;

use cronhook_core::{HistorySample, JobId};
use tracing::debug;

use crate::error::Result;
use crate::store::HistoryStore;

pub struct HistoryLedger {
    store: Arc<dyn HistoryStore>,
    retention: usize,
}

impl HistoryLedger {
    /// `retention` is the number of samples kept per job; zero is treated as one.
    pub fn new(store: Arc<dyn HistoryStore>, retention: usize) -> Self {
        Self {
            store,
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Append `sample` and evict the job's oldest samples past the retention cap.
    pub fn record(&self, sample: &HistorySample) -> Result<()> {
        self.store.insert(sample, self.retention)?;
        debug!(
            job_id = %sample.job_id,
            status = sample.status_code,
            duration_ms = sample.duration_ms,
            "history recorded"
        );
        Ok(())
    }

    pub fn list_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<HistorySample>> {
        self.store.for_job(job_id, limit)
    }

    pub fn list_global(&self, limit: usize) -> Result<Vec<HistorySample>> {
        self.store.all(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::store::SqliteHistoryStore;
    use chrono::DateTime;
    use rusqlite::Connection;

    fn ledger(retention: usize) -> HistoryLedger {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        HistoryLedger::new(Arc::new(SqliteHistoryStore::new(conn)), retention)
    }

    fn sample(job: i64, secs: i64, status_code: u16) -> HistorySample {
        HistorySample {
            job_id: JobId(job),
            fired_at: DateTime::from_timestamp(2_000_000_000 + secs, 0).unwrap(),
            status_code,
            duration_ms: 3,
        }
    }

    #[test]
    fn n_plus_k_records_leave_exactly_n() {
        let ledger = ledger(100);
        for secs in 0..130 {
            ledger.record(&sample(7, secs, 200)).unwrap();
        }
        let kept = ledger.list_for_job(JobId(7), 1000).unwrap();
        assert_eq!(kept.len(), 100);
        assert_eq!(kept.first().unwrap().fired_at.timestamp(), 2_000_000_129);
        assert_eq!(kept.last().unwrap().fired_at.timestamp(), 2_000_000_030);
    }

    #[test]
    fn global_listing_spans_jobs() {
        let ledger = ledger(10);
        ledger.record(&sample(1, 1, 200)).unwrap();
        ledger.record(&sample(2, 2, 503)).unwrap();

        let all = ledger.list_global(10).unwrap();
        assert_eq!(all.iter().map(|s| s.job_id).collect::<Vec<_>>(), vec![JobId(2), JobId(1)]);
        assert!(!all[0].is_success());
    }

    #[test]
    fn zero_retention_still_keeps_the_latest() {
        let ledger = ledger(0);
        assert_eq!(ledger.retention(), 1);
        ledger.record(&sample(1, 1, 200)).unwrap();
        ledger.record(&sample(1, 2, 200)).unwrap();
        assert_eq!(ledger.list_for_job(JobId(1), 10).unwrap(), vec![sample(1, 2, 200)]);
    }
}
