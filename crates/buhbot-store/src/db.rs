use rusqlite::Connection;

use crate::error::Result;

/// Initialise the full store schema in `conn`. Safe to call on every
/// startup — every statement is `IF NOT EXISTS`.
///
/// Index choices follow the external-interfaces contract directly: the
/// `Request` table needs `(chatID, messageID)` for reply-to lookups,
/// `(chatID, receivedAt)` for FIFO/LIFO pending scans, and a `status` index
/// for the breach-worker's re-check query; the `Alert` table needs the
/// unique `(requestID, level, alertType)` index for step-5 insert idempotence.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            id                                INTEGER NOT NULL PRIMARY KEY,
            title                             TEXT,
            kind                              TEXT    NOT NULL DEFAULT 'group',
            monitoring_enabled                INTEGER NOT NULL DEFAULT 1,
            sla_enabled                       INTEGER NOT NULL DEFAULT 1,
            notify_in_chat_on_breach         INTEGER NOT NULL DEFAULT 0,
            is_24x7_mode                      INTEGER NOT NULL DEFAULT 0,
            sla_threshold_minutes             INTEGER,
            client_tier                       TEXT,
            accountant_telegram_ids           TEXT    NOT NULL DEFAULT '[]',
            accountant_usernames              TEXT    NOT NULL DEFAULT '[]',
            accountant_username               TEXT,
            assigned_accountant_id            TEXT,
            assigned_accountant_telegram_id   INTEGER,
            assigned_accountant_username      TEXT,
            manager_telegram_ids              TEXT    NOT NULL DEFAULT '[]',
            deleted_at                        TEXT
        );

        CREATE TABLE IF NOT EXISTS requests (
            id                      TEXT    NOT NULL PRIMARY KEY,
            chat_id                 INTEGER NOT NULL,
            message_id              INTEGER NOT NULL,
            message_text            TEXT    NOT NULL,
            client_username         TEXT,
            classification          TEXT    NOT NULL,
            classification_score    REAL    NOT NULL,
            status                  TEXT    NOT NULL,
            received_at             TEXT    NOT NULL,
            response_at             TEXT,
            response_message_id     INTEGER,
            responded_by            TEXT,
            response_time_minutes   INTEGER,
            sla_breached            INTEGER NOT NULL DEFAULT 0,
            assigned_to             TEXT,
            thread_id               TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_chat_message
            ON requests (chat_id, message_id);
        CREATE INDEX IF NOT EXISTS idx_requests_chat_received
            ON requests (chat_id, received_at);
        CREATE INDEX IF NOT EXISTS idx_requests_status
            ON requests (status) WHERE status != 'closed';

        CREATE TABLE IF NOT EXISTS alerts (
            id                TEXT    NOT NULL PRIMARY KEY,
            request_id        TEXT    NOT NULL,
            alert_type        TEXT    NOT NULL,
            level             INTEGER NOT NULL,
            minutes_elapsed   INTEGER NOT NULL,
            alert_sent_at     TEXT    NOT NULL,
            recipients        TEXT    NOT NULL DEFAULT '[]',
            resolved_action   TEXT,
            resolution_notes  TEXT,
            acknowledged_at   TEXT,
            acknowledged_by   TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_dedup
            ON alerts (request_id, level, alert_type);

        CREATE TABLE IF NOT EXISTS global_settings (
            id                              INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            timezone                        TEXT    NOT NULL,
            working_days                    TEXT    NOT NULL,
            start_time                      TEXT    NOT NULL,
            end_time                        TEXT    NOT NULL,
            default_sla_threshold_minutes   INTEGER NOT NULL,
            max_escalations                 INTEGER NOT NULL,
            escalation_interval_minutes     INTEGER NOT NULL,
            sla_warning_percent             INTEGER NOT NULL,
            global_manager_telegram_ids     TEXT    NOT NULL DEFAULT '[]',
            ai_confidence_threshold         REAL    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS working_schedules (
            chat_id      INTEGER NOT NULL,
            day_of_week  INTEGER NOT NULL,
            start_time   TEXT    NOT NULL,
            end_time     TEXT    NOT NULL,
            timezone     TEXT    NOT NULL,
            is_active    INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_working_schedules_chat
            ON working_schedules (chat_id);

        CREATE TABLE IF NOT EXISTS holidays (
            chat_id  INTEGER,
            year     INTEGER NOT NULL,
            month    INTEGER NOT NULL,
            day      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_holidays_chat
            ON holidays (chat_id);

        CREATE TABLE IF NOT EXISTS request_history (
            request_id   TEXT    NOT NULL,
            field        TEXT    NOT NULL,
            old_value    TEXT,
            new_value    TEXT,
            changed_by   TEXT    NOT NULL,
            reason       TEXT,
            at           TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_request_history_request
            ON request_history (request_id, at);

        CREATE TABLE IF NOT EXISTS chat_messages (
            chat_id              INTEGER NOT NULL,
            message_id           INTEGER NOT NULL,
            from_user_id         INTEGER NOT NULL,
            from_username        TEXT,
            text                 TEXT    NOT NULL,
            received_at          TEXT    NOT NULL,
            resolved_request_id  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_chat
            ON chat_messages (chat_id, received_at);
        ",
    )?;
    Ok(())
}

/// In-memory connection with the schema already applied. Used by this
/// crate's own tests and by downstream crates' tests that need a `Db`
/// without standing up a file-backed database.
pub fn open_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_db(&conn).expect("init schema");
    conn
}
