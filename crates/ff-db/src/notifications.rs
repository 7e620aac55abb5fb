//! Sent-log used to deduplicate outbound notifications.

use chrono::{DateTime, Utc};
use ff_core::UserId;
use rusqlite::params;

use crate::{Database, DbError, format_timestamp};

impl Database {
    /// Claims `key` in the sent-log.
    ///
    /// Returns `true` if this call inserted the key, meaning the caller may
    /// send; `false` if the notification was already sent.
    pub fn claim_notification(
        &self,
        key: &str,
        email: &str,
        user: Option<&UserId>,
        kind: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let inserted = self.conn.execute(
            "
            INSERT OR IGNORE INTO notification_sent (key, email, user_id, kind, sent_at)
            VALUES (?, ?, ?, ?, ?)
            ",
            params![
                key,
                email,
                user.map(UserId::as_str),
                kind,
                format_timestamp(now)
            ],
        )?;
        Ok(inserted == 1)
    }
}
