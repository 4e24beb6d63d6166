use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use drip_core::error::{DripError, Result};
use drip_core::ports::{SendLogStore, SubscriptionStore};
use drip_core::types::{SendLogEntry, SendStatus, Subscription, SubscriptionStatus};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::{info, warn};

use crate::db::{decode_ts, encode_ts, init_db};

/// SQLite caps bound parameters per statement; stay well below it.
const MAX_IDS_PER_QUERY: usize = 500;

const SUBSCRIPTION_COLUMNS: &str = "id, email, pack_key, timezone, cron_expression, status,
     current_step_index, created_at, updated_at";

/// SQLite-backed subscription and send-log store.
///
/// Owns its own `Connection` so it never contends with other subsystems'
/// prepared statements; WAL mode lets readers proceed during writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> crate::error::Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DripError::Internal("subscription store mutex poisoned".to_string()))
    }

    /// Create a subscription row. Lifecycle actions outside the scheduler
    /// (signup, confirmation) go through here and [`Self::set_status`].
    pub fn insert(&self, sub: &Subscription) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscriptions
             (id, email, pack_key, timezone, cron_expression, status,
              current_step_index, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            rusqlite::params![
                sub.id,
                sub.email,
                sub.pack_key,
                sub.timezone,
                sub.cron_expression,
                sub.status.to_string(),
                sub.current_step_index,
                encode_ts(sub.created_at),
                encode_ts(sub.updated_at),
            ],
        )
        .map_err(map_sqlite_error)?;
        info!(subscription_id = %sub.id, pack = %sub.pack_key, "subscription created");
        Ok(())
    }

    pub fn set_status(&self, id: &str, status: SubscriptionStatus, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE subscriptions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), encode_ts(now), id],
            )
            .map_err(map_sqlite_error)?;
        if n == 0 {
            return Err(DripError::SubscriptionNotFound { id: id.to_string() });
        }
        info!(subscription_id = %id, %status, "subscription status changed");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Subscription>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1");
        let raw = conn
            .query_row(&sql, [id], read_subscription_row)
            .optional()
            .map_err(map_sqlite_error)?;
        Ok(raw.and_then(decode_subscription))
    }

    /// Every send-log row for one subscription, oldest first.
    pub fn entries_for(&self, subscription_id: &str) -> Result<Vec<SendLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, subscription_id, step_slug, status, provider_message_id, error, sent_at
                 FROM send_log WHERE subscription_id = ?1 ORDER BY id",
            )
            .map_err(map_sqlite_error)?;
        let entries = stmt
            .query_map([subscription_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(map_sqlite_error)?
            .filter_map(|r| {
                let (id, subscription_id, step_slug, status, provider_message_id, error, sent_at) =
                    r.ok()?;
                Some(SendLogEntry {
                    id,
                    subscription_id,
                    step_slug,
                    status: status.parse().ok()?,
                    provider_message_id,
                    error,
                    sent_at: decode_ts(&sent_at)?,
                })
            })
            .collect();
        Ok(entries)
    }
}

impl SubscriptionStore for SqliteStore {
    fn active_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT id FROM subscriptions WHERE status = 'active' ORDER BY id")
            .map_err(map_sqlite_error)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_sqlite_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_sqlite_error)?;
        Ok(ids)
    }

    fn by_ids(&self, ids: &[String]) -> Result<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut out = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), read_subscription_row)
                .map_err(map_sqlite_error)?;
            for row in rows {
                let raw = row.map_err(map_sqlite_error)?;
                if let Some(sub) = decode_subscription(raw) {
                    out.push(sub);
                }
            }
        }

        Ok(out)
    }

    fn advance_step(&self, id: &str, expected_index: u32, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE subscriptions
                 SET current_step_index = current_step_index + 1, updated_at = ?1
                 WHERE id = ?2 AND current_step_index = ?3",
                rusqlite::params![encode_ts(now), id, expected_index],
            )
            .map_err(map_sqlite_error)?;
        Ok(n == 1)
    }

    fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE subscriptions SET status = 'completed', updated_at = ?1
             WHERE id = ?2 AND status = 'active'",
            rusqlite::params![encode_ts(now), id],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }
}

impl SendLogStore for SqliteStore {
    fn has_succeeded(&self, subscription_id: &str, step_slug: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM send_log
                 WHERE subscription_id = ?1 AND step_slug = ?2 AND status = 'success'
                 LIMIT 1",
                [subscription_id, step_slug],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        Ok(found.is_some())
    }

    fn last_success_at(&self, subscription_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT sent_at FROM send_log
                 WHERE subscription_id = ?1 AND status = 'success'
                 ORDER BY sent_at DESC LIMIT 1",
                [subscription_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        Ok(raw.as_deref().and_then(decode_ts))
    }

    fn append(
        &self,
        subscription_id: &str,
        step_slug: &str,
        status: SendStatus,
        provider_message_id: Option<&str>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO send_log
             (subscription_id, step_slug, status, provider_message_id, error, sent_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                subscription_id,
                step_slug,
                status.to_string(),
                provider_message_id,
                error,
                encode_ts(at),
            ],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }
}

/// Busy and locked databases are the retriable "capacity" condition.
pub(crate) fn map_sqlite_error(e: rusqlite::Error) -> DripError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            DripError::Transient(e.to_string())
        }
        other => DripError::Database(other.to_string()),
    }
}

type RawSubscription = (String, String, String, String, String, String, u32, String, String);

fn read_subscription_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSubscription> {
    Ok((
        row.get(0)?, // id
        row.get(1)?, // email
        row.get(2)?, // pack_key
        row.get(3)?, // timezone
        row.get(4)?, // cron_expression
        row.get(5)?, // status
        row.get(6)?, // current_step_index
        row.get(7)?, // created_at
        row.get(8)?, // updated_at
    ))
}

fn decode_subscription(raw: RawSubscription) -> Option<Subscription> {
    let (id, email, pack_key, timezone, cron_expression, status, idx, created_at, updated_at) = raw;
    let status = match status.parse() {
        Ok(s) => s,
        Err(e) => {
            warn!(subscription_id = %id, "skipping row: {e}");
            return None;
        }
    };
    let (Some(created_at), Some(updated_at)) = (decode_ts(&created_at), decode_ts(&updated_at))
    else {
        warn!(subscription_id = %id, "skipping row: unreadable timestamp");
        return None;
    };
    Some(Subscription {
        id,
        email,
        pack_key,
        timezone,
        cron_expression,
        status,
        current_step_index: idx,
        created_at,
        updated_at,
    })
}
