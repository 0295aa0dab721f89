use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `(queue, run_at)` so
/// each queue's polling query stays efficient regardless of how many other
/// queues share the database.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                 TEXT    NOT NULL,
            queue              TEXT    NOT NULL,
            payload            TEXT    NOT NULL,
            status             TEXT    NOT NULL DEFAULT 'pending',
            run_at             TEXT    NOT NULL,
            attempts_made      INTEGER NOT NULL DEFAULT 0,
            max_attempts       INTEGER NOT NULL DEFAULT 5,
            backoff            TEXT    NOT NULL,
            remove_on_complete INTEGER NOT NULL DEFAULT 1,
            remove_on_fail     INTEGER NOT NULL DEFAULT 0,
            last_error         TEXT,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            PRIMARY KEY (queue, id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_queue_run_at ON jobs (queue, status, run_at);
        ",
    )?;
    Ok(())
}

/// In-memory connection with the scheduler schema already applied. Used by
/// this crate's own tests and by downstream crates that need a working
/// `SchedulerEngine` without a file-backed database.
pub fn open_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_db(&conn).expect("init schema");
    conn
}
