//! Job Store and History Store contracts plus their SQLite implementations.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use cronhook_core::{HistorySample, Job, JobId};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, instrument, warn};

use crate::error::{Result, SchedulerError};

/// Persistent job records.
///
/// Targeted updates (`set_active`, `set_next_fire_at`, failure counter) exist
/// so concurrent writers touching different fields of one job never clobber
/// each other through a whole-record `save`.
pub trait JobStore: Send + Sync {
    /// Load a job, or [`SchedulerError::JobNotFound`].
    fn get(&self, id: JobId) -> Result<Job>;
    /// Insert when `job.id` is unassigned, otherwise overwrite. Returns the id.
    fn save(&self, job: &Job) -> Result<JobId>;
    /// Returns whether a row was deleted.
    fn delete(&self, id: JobId) -> Result<bool>;
    /// Visit every job in id order. `f` must not call back into the store.
    fn for_each(&self, f: &mut dyn FnMut(Job)) -> Result<()>;
    fn list(&self) -> Result<Vec<Job>>;
    fn set_active(&self, id: JobId, active: bool) -> Result<()>;
    fn set_next_fire_at(&self, id: JobId, next: Option<DateTime<Utc>>) -> Result<()>;
    /// Reactivate with a cleared failure counter and `next` as the next fire
    /// time, stamping `at` as the resume instant.
    fn resume(&self, id: JobId, next: DateTime<Utc>, at: DateTime<Utc>) -> Result<()>;
    /// Bump the consecutive-failure counter for an attempt fired at `fired_at`
    /// and return its new value.
    ///
    /// Returns `None` without touching the counter when the job was resumed
    /// at or after `fired_at`: the attempt belongs to the run before the resume.
    fn increment_failures(&self, id: JobId, fired_at: DateTime<Utc>) -> Result<Option<u32>>;
    /// Clear the counter after a successful attempt fired at `fired_at`.
    /// Stale attempts are ignored the same way as in [`increment_failures`](Self::increment_failures).
    fn reset_failures(&self, id: JobId, fired_at: DateTime<Utc>) -> Result<()>;
}

/// Append-only webhook outcome log.
pub trait HistoryStore: Send + Sync {
    /// Append `sample` and evict the job's samples beyond the `cap` most recent,
    /// in one transaction.
    fn insert(&self, sample: &HistorySample, cap: usize) -> Result<()>;
    /// Most recent first.
    fn for_job(&self, id: JobId, limit: usize) -> Result<Vec<HistorySample>>;
    /// Most recent first, across all jobs.
    fn all(&self, limit: usize) -> Result<Vec<HistorySample>>;
}

/// Fixed-width UTC text so lexical order matches time order.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

const JOB_COLUMNS: &str = "id, title, description, cron_expr, is_recurring, run_at, start_at,
     end_at, active, failure_count, webhook_url, metadata, next_fire_at, created_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let metadata_json: String = row.get(11)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?;

    Ok(Job {
        id: JobId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        cron_expr: row.get(3)?,
        is_recurring: row.get(4)?,
        run_at: parse_opt_ts(5, row.get(5)?)?,
        start_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        end_at: parse_opt_ts(7, row.get(7)?)?,
        active: row.get(8)?,
        failure_count: row.get(9)?,
        webhook_url: row.get(10)?,
        metadata,
        next_fire_at: parse_opt_ts(12, row.get(12)?)?,
        created_at: parse_ts(13, &row.get::<_, String>(13)?)?,
    })
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<HistorySample> {
    Ok(HistorySample {
        job_id: JobId(row.get(0)?),
        fired_at: parse_ts(1, &row.get::<_, String>(1)?)?,
        status_code: row.get(2)?,
        duration_ms: row.get::<_, i64>(3)?.max(0) as u64,
    })
}

/// SQLite-backed [`JobStore`].
///
/// Wraps a single connection in a `Mutex`; every method is one short
/// statement, so contention stays low even with dispatch tasks writing
/// failure counters.
pub struct SqliteJobStore {
    db: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().expect("job store lock poisoned")
    }

    fn ensure_exists(db: &Connection, id: JobId) -> Result<()> {
        let found = db
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", params![id.get()], |_| Ok(()))
            .optional()?;
        found.ok_or(SchedulerError::JobNotFound { id })
    }

    fn expect_row(id: JobId, changed: usize) -> Result<()> {
        if changed == 0 {
            return Err(SchedulerError::JobNotFound { id });
        }
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self), fields(job_id = %id))]
    fn get(&self, id: JobId) -> Result<Job> {
        let db = self.conn();
        db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id.get()],
            row_to_job,
        )
        .optional()?
        .ok_or(SchedulerError::JobNotFound { id })
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, title = %job.title))]
    fn save(&self, job: &Job) -> Result<JobId> {
        let metadata = serde_json::to_string(&job.metadata)?;
        let db = self.conn();

        if !job.id.is_assigned() {
            db.execute(
                "INSERT INTO jobs
                 (title, description, cron_expr, is_recurring, run_at, start_at, end_at,
                  active, failure_count, webhook_url, metadata, next_fire_at, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    job.title,
                    job.description,
                    job.cron_expr,
                    job.is_recurring,
                    job.run_at.map(ts),
                    ts(job.start_at),
                    job.end_at.map(ts),
                    job.active,
                    job.failure_count,
                    job.webhook_url,
                    metadata,
                    job.next_fire_at.map(ts),
                    ts(job.created_at),
                ],
            )?;
            let id = JobId(db.last_insert_rowid());
            debug!(job_id = %id, "job inserted");
            return Ok(id);
        }

        let changed = db.execute(
            "UPDATE jobs SET
                title = ?2, description = ?3, cron_expr = ?4, is_recurring = ?5,
                run_at = ?6, start_at = ?7, end_at = ?8, active = ?9,
                failure_count = ?10, webhook_url = ?11, metadata = ?12,
                next_fire_at = ?13
             WHERE id = ?1",
            params![
                job.id.get(),
                job.title,
                job.description,
                job.cron_expr,
                job.is_recurring,
                job.run_at.map(ts),
                ts(job.start_at),
                job.end_at.map(ts),
                job.active,
                job.failure_count,
                job.webhook_url,
                metadata,
                job.next_fire_at.map(ts),
            ],
        )?;
        Self::expect_row(job.id, changed)?;
        Ok(job.id)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn delete(&self, id: JobId) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.get()])?;
        Ok(changed > 0)
    }

    fn for_each(&self, f: &mut dyn FnMut(Job)) -> Result<()> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id"))?;
        for row in stmt.query_map([], row_to_job)? {
            match row {
                Ok(job) => f(job),
                Err(e) => warn!(error = %e, "skipping unreadable job row"),
            }
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        self.for_each(&mut |job| jobs.push(job))?;
        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn set_active(&self, id: JobId, active: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE jobs SET active = ?2 WHERE id = ?1",
            params![id.get(), active],
        )?;
        Self::expect_row(id, changed)
    }

    fn set_next_fire_at(&self, id: JobId, next: Option<DateTime<Utc>>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE jobs SET next_fire_at = ?2 WHERE id = ?1",
            params![id.get(), next.map(ts)],
        )?;
        Self::expect_row(id, changed)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn resume(&self, id: JobId, next: DateTime<Utc>, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE jobs SET active = 1, failure_count = 0, next_fire_at = ?2, resumed_at = ?3
             WHERE id = ?1",
            params![id.get(), ts(next), ts(at)],
        )?;
        Self::expect_row(id, changed)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn increment_failures(&self, id: JobId, fired_at: DateTime<Utc>) -> Result<Option<u32>> {
        let db = self.conn();
        let failures = db
            .query_row(
                "UPDATE jobs SET failure_count = failure_count + 1
                 WHERE id = ?1 AND (resumed_at IS NULL OR resumed_at < ?2)
                 RETURNING failure_count",
                params![id.get(), ts(fired_at)],
                |row| row.get(0),
            )
            .optional()?;
        if failures.is_none() {
            Self::ensure_exists(&db, id)?;
            debug!(job_id = %id, "attempt predates the last resume; counter untouched");
        }
        Ok(failures)
    }

    fn reset_failures(&self, id: JobId, fired_at: DateTime<Utc>) -> Result<()> {
        let db = self.conn();
        let changed = db.execute(
            "UPDATE jobs SET failure_count = 0
             WHERE id = ?1 AND (resumed_at IS NULL OR resumed_at < ?2)",
            params![id.get(), ts(fired_at)],
        )?;
        if changed == 0 {
            Self::ensure_exists(&db, id)?;
        }
        Ok(())
    }
}

/// SQLite-backed [`HistoryStore`].
pub struct SqliteHistoryStore {
    db: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().expect("history store lock poisoned")
    }
}

impl HistoryStore for SqliteHistoryStore {
    #[instrument(skip(self, sample), fields(job_id = %sample.job_id, status = sample.status_code))]
    fn insert(&self, sample: &HistorySample, cap: usize) -> Result<()> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO history (job_id, fired_at, status_code, duration_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sample.job_id.get(),
                ts(sample.fired_at),
                sample.status_code,
                sample.duration_ms as i64,
            ],
        )?;
        let evicted = tx.execute(
            "DELETE FROM history
             WHERE job_id = ?1 AND id NOT IN (
                 SELECT id FROM history WHERE job_id = ?1
                 ORDER BY fired_at DESC, id DESC
                 LIMIT ?2
             )",
            params![sample.job_id.get(), cap as i64],
        )?;
        tx.commit()?;
        if evicted > 0 {
            debug!(evicted, "history trimmed");
        }
        Ok(())
    }

    fn for_job(&self, id: JobId, limit: usize) -> Result<Vec<HistorySample>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT job_id, fired_at, status_code, duration_ms FROM history
             WHERE job_id = ?1
             ORDER BY fired_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![id.get(), limit as i64], row_to_sample)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn all(&self, limit: usize) -> Result<Vec<HistorySample>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT job_id, fired_at, status_code, duration_ms FROM history
             ORDER BY fired_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_sample)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
