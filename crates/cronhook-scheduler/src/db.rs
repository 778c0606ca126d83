use rusqlite::Connection;

use crate::error::Result;

/// Initialise the cronhook schema in `conn`.
///
/// Creates the `jobs` and `history` tables (idempotent). History rows are
/// indexed by `(job_id, fired_at)` so both the per-job listing and the
/// retention trim after each insert stay cheap.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            title          TEXT    NOT NULL,
            description    TEXT    NOT NULL DEFAULT '',
            cron_expr      TEXT    NOT NULL DEFAULT '',
            is_recurring   INTEGER NOT NULL,
            run_at         TEXT,               -- one-shot jobs only
            start_at       TEXT    NOT NULL,
            end_at         TEXT,               -- NULL means open-ended
            active         INTEGER NOT NULL DEFAULT 1,
            failure_count  INTEGER NOT NULL DEFAULT 0,
            webhook_url    TEXT    NOT NULL,
            metadata       TEXT    NOT NULL DEFAULT '{}',  -- JSON object
            next_fire_at   TEXT,
            resumed_at     TEXT,               -- last explicit resume
            created_at     TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS history (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id       INTEGER NOT NULL,
            fired_at     TEXT    NOT NULL,
            status_code  INTEGER NOT NULL,
            duration_ms  INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_history_job_fired ON history (job_id, fired_at);
        CREATE INDEX IF NOT EXISTS idx_history_fired ON history (fired_at);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('jobs', 'history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
