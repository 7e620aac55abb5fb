//! Storage layer for the flat-fee settlement engine.
//!
//! Provides persistence for relationship intervals, the balance ledger and
//! analysis results using `rusqlite`, and runs the daily settlement inside a
//! single transaction.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Scheduled jobs open their own `Database` per run; the relational store is
//! the only state they share.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`) so lexicographic ordering matches
//! chronological ordering. Settlement days are stored as `YYYY-MM-DD`.
//!
//! ## Money
//!
//! Amounts are arbitrary-precision integers in the currency's smallest unit,
//! stored as base-10 TEXT. Sums are computed in Rust, never in SQL.

mod analysis;
mod ledger;
mod notifications;
mod relationships;
mod settlement;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use ff_core::{BigInt, Currency, TransitionError, ValidationError};
use rusqlite::{Connection, ErrorCode, Params};
use thiserror::Error;

pub use analysis::{AnalysisRequestRecord, NewAnalysisRequest, RepoRecord, StaleRepo};
pub use ledger::{
    ClaimableContributions, DailyContributionRecord, NewPayIn, PayInRecord, RepoBalances,
    StatusSummary, UserRecord,
};
pub use settlement::{ExhaustedFoundation, SettlementReport};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A relationship transition was rejected.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// A value failed domain validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The day has already been settled.
    #[error("settlement for {day} has already run")]
    AlreadySettled { day: String },
    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// A payment was confirmed twice.
    #[error("payment {external_id} is already confirmed")]
    PaymentAlreadyConfirmed { external_id: String },
    /// A provider fee larger than the payment itself.
    #[error("fee {fee} exceeds amount {amount} for payment {external_id}")]
    FeeExceedsAmount {
        external_id: String,
        fee: String,
        amount: String,
    },
    /// Some contributions were already claimed by a concurrent request.
    #[error("expected to claim {expected} contributions, claimed {claimed}")]
    ClaimConflict { expected: usize, claimed: usize },
    /// An analysis callback for an unknown or already answered request.
    #[error("analysis request {id} is unknown or already answered")]
    AnalysisAlreadyReceived { id: String },
    /// A stored amount is not a base-10 integer.
    #[error("invalid amount in {context}: {value}")]
    InvalidAmount { context: String, value: String },
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {context}: {timestamp}")]
    TimestampParse {
        context: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// Failed to encode or decode a JSON column.
    #[error("invalid json in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// How long a writer waits for a competing transaction before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                invited_by TEXT REFERENCES users(id),
                payment_method TEXT,
                multiplier INTEGER NOT NULL DEFAULT 0,
                multiplier_daily_limit TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repos (
                id TEXT PRIMARY KEY,
                git_url TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- One table serves sponsor, trust and multiplier intervals.
            -- actor_id is NULL for trust.
            CREATE TABLE IF NOT EXISTS relationship_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                actor_id TEXT REFERENCES users(id),
                repo_id TEXT NOT NULL REFERENCES repos(id),
                activated_at TEXT NOT NULL,
                deactivated_at TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_relationship_open
                ON relationship_event(kind, COALESCE(actor_id, ''), repo_id)
                WHERE deactivated_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_relationship_key
                ON relationship_event(kind, repo_id, actor_id);

            CREATE TABLE IF NOT EXISTS pay_in_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                balance TEXT NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                seats INTEGER NOT NULL,
                freq INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (external_id, status)
            );

            CREATE INDEX IF NOT EXISTS idx_pay_in_user ON pay_in_event(user_id, currency, status);

            -- sponsor_id is the user whose relationship produced the row;
            -- it differs from payer_id when an inviting user pays.
            CREATE TABLE IF NOT EXISTS daily_contribution (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payer_id TEXT NOT NULL REFERENCES users(id),
                sponsor_id TEXT NOT NULL REFERENCES users(id),
                contributor_id TEXT NOT NULL REFERENCES users(id),
                repo_id TEXT NOT NULL REFERENCES repos(id),
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                day TEXT NOT NULL,
                foundation_payment INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                claimed_at TEXT,
                UNIQUE (payer_id, sponsor_id, contributor_id, repo_id, currency, day, foundation_payment)
            );

            CREATE INDEX IF NOT EXISTS idx_daily_payer ON daily_contribution(payer_id, currency);
            CREATE INDEX IF NOT EXISTS idx_daily_contributor ON daily_contribution(contributor_id, currency);

            CREATE TABLE IF NOT EXISTS future_contribution (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL REFERENCES users(id),
                repo_id TEXT NOT NULL REFERENCES repos(id),
                currency TEXT NOT NULL,
                amount TEXT NOT NULL,
                day TEXT NOT NULL,
                foundation_payment INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (subject_id, repo_id, currency, day, foundation_payment)
            );

            CREATE TABLE IF NOT EXISTS unclaimed (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                repo_id TEXT NOT NULL REFERENCES repos(id),
                currency TEXT NOT NULL,
                balance TEXT NOT NULL,
                day TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (email, repo_id, currency)
            );

            CREATE TABLE IF NOT EXISTS git_email (
                email TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                confirmed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_request (
                id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL REFERENCES repos(id),
                date_from TEXT NOT NULL,
                date_to TEXT NOT NULL,
                git_url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                received_at TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_repo ON analysis_request(repo_id, date_to);

            CREATE TABLE IF NOT EXISTS analysis_response (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL REFERENCES analysis_request(id),
                git_email TEXT NOT NULL,
                git_names TEXT NOT NULL,
                weight REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_response_request ON analysis_response(request_id);

            CREATE TABLE IF NOT EXISTS notification_sent (
                key TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                user_id TEXT,
                kind TEXT NOT NULL,
                sent_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settlement_run (
                day TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                contributions INTEGER NOT NULL DEFAULT 0,
                parked INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(timestamp: &str, context: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            context: context.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn parse_optional_timestamp(
    timestamp: Option<String>,
    context: &str,
) -> Result<Option<DateTime<Utc>>, DbError> {
    timestamp
        .map(|value| parse_timestamp(&value, context))
        .transpose()
}

fn parse_amount(value: &str, context: &str) -> Result<BigInt, DbError> {
    ff_core::money::parse_amount(value).map_err(|_| DbError::InvalidAmount {
        context: context.to_string(),
        value: value.to_string(),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

/// Sums `(currency, amount)` rows per currency.
fn sum_by_currency<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    context: &str,
) -> Result<BTreeMap<Currency, BigInt>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        let currency: String = row.get(0)?;
        let amount: String = row.get(1)?;
        Ok((currency, amount))
    })?;
    let mut sums: BTreeMap<Currency, BigInt> = BTreeMap::new();
    for row in rows {
        let (currency, amount) = row?;
        let currency = Currency::new(currency)?;
        *sums.entry(currency).or_default() += parse_amount(&amount, context)?;
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ffs.db");
        drop(Database::open(&path).expect("first open"));
        let db = Database::open(&path).expect("second open");
        assert_eq!(table_columns(&db.conn, "settlement_run").len(), 5);
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        assert_eq!(
            table_columns(&db.conn, "relationship_event"),
            vec!["id", "kind", "actor_id", "repo_id", "activated_at", "deactivated_at"]
        );
        assert_eq!(
            table_columns(&db.conn, "daily_contribution"),
            vec![
                "id",
                "payer_id",
                "sponsor_id",
                "contributor_id",
                "repo_id",
                "currency",
                "amount",
                "day",
                "foundation_payment",
                "created_at",
                "claimed_at",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "future_contribution"),
            vec![
                "id",
                "subject_id",
                "repo_id",
                "currency",
                "amount",
                "day",
                "foundation_payment",
                "created_at",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "unclaimed"),
            vec!["id", "email", "repo_id", "currency", "balance", "day", "created_at"]
        );

        let relationship_indexes = index_names(&db.conn, "relationship_event");
        assert!(relationship_indexes.contains("idx_relationship_open"));
        assert!(relationship_indexes.contains("idx_relationship_key"));
    }

    #[test]
    fn sums_are_exact_beyond_i64() {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.conn
            .execute_batch(
                "
                CREATE TEMP TABLE amounts (currency TEXT, amount TEXT);
                INSERT INTO amounts VALUES ('USD', '9223372036854775807');
                INSERT INTO amounts VALUES ('USD', '9223372036854775807');
                INSERT INTO amounts VALUES ('ETH', '-5');
                ",
            )
            .unwrap();
        let sums = sum_by_currency(&db.conn, "SELECT currency, amount FROM amounts", [], "test")
            .unwrap();
        assert_eq!(
            sums[&Currency::new("USD").unwrap()].to_string(),
            "18446744073709551614"
        );
        assert_eq!(sums[&Currency::new("ETH").unwrap()], BigInt::from(-5));
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }
}
