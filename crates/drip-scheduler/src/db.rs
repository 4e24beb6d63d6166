use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the delivery schema in `conn`. Safe to call on every startup.
///
/// `send_log` is append-only: the scheduler inserts rows and never updates
/// or deletes them.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subscriptions (
            id                  TEXT    NOT NULL PRIMARY KEY,
            email               TEXT    NOT NULL,
            pack_key            TEXT    NOT NULL,
            timezone            TEXT    NOT NULL,
            cron_expression     TEXT    NOT NULL,
            status              TEXT    NOT NULL DEFAULT 'pending_confirm',
            current_step_index  INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT    NOT NULL,   -- RFC 3339, UTC, millis
            updated_at          TEXT    NOT NULL
        ) STRICT;

        -- active_ids() runs on every invocation
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions (status);

        CREATE TABLE IF NOT EXISTS send_log (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id      TEXT    NOT NULL,
            step_slug            TEXT    NOT NULL,
            status               TEXT    NOT NULL,   -- 'success' | 'failed'
            provider_message_id  TEXT,
            error                TEXT,
            sent_at              TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_send_log_step
            ON send_log (subscription_id, step_slug, status);
        CREATE INDEX IF NOT EXISTS idx_send_log_sent_at
            ON send_log (subscription_id, status, sent_at DESC);
        ",
    )?;
    Ok(())
}

/// Fixed-width UTC encoding so that string order equals time order.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
