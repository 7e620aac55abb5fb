//! Periodic jobs behind `ffs serve`.
//!
//! Each [`Job`] keeps its own `next_run_at`, evaluated against the injected
//! [`Clock`], and replays every slot it missed in order. Every run opens its
//! own database connection.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use ff_client::NotificationQueue;
use ff_core::{Clock, SettlementDay};
use ff_db::{Database, DbError, SettlementReport};

use crate::commands::{analysis, settle};
use crate::{Config, Services};

/// The periodic work `ffs serve` knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Requests analyses for stale repositories.
    Hourly,
    /// Settles the day that just ended.
    Daily,
}

impl JobKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }

    pub const fn every(self) -> TimeDelta {
        match self {
            Self::Hourly => TimeDelta::hours(1),
            Self::Daily => TimeDelta::days(1),
        }
    }
}

/// A job firing on fixed boundaries of its period since the Unix epoch.
#[derive(Debug, Clone)]
pub struct Job {
    kind: JobKind,
    next_run_at: DateTime<Utc>,
}

impl Job {
    /// A job whose first slot is the next boundary after `now`.
    pub fn new(kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            next_run_at: align_up(now, kind.every()),
        }
    }

    pub const fn kind(&self) -> JobKind {
        self.kind
    }

    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub const fn next_run_at(&self) -> DateTime<Utc> {
        self.next_run_at
    }

    /// Slots that are due at `now`, oldest first.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut slots = Vec::new();
        while self.next_run_at <= now {
            slots.push(self.next_run_at);
            self.next_run_at += self.kind.every();
        }
        slots
    }
}

fn align_up(now: DateTime<Utc>, every: TimeDelta) -> DateTime<Utc> {
    let step = every.num_seconds().max(1);
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}

/// Runs the jobs until `shutdown` resolves, then drains queued mail.
pub async fn serve(
    config: &Config,
    services: &Services,
    clock: &dyn Clock,
    poll: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let (queue, dispatcher) = NotificationQueue::new(services.notifications.clone());
    let drain = tokio::spawn(dispatcher.run());

    let now = clock.now();
    let mut jobs = [
        Job::new(JobKind::Hourly, now),
        Job::new(JobKind::Daily, now),
    ];
    for job in &jobs {
        tracing::info!(job = job.name(), next_run_at = %job.next_run_at(), "scheduled");
    }

    let mut ticker = tokio::time::interval(poll);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        tick(config, services, &queue, clock, &mut jobs).await;
    }

    tracing::info!("shutting down, draining notifications");
    drop(queue);
    drain.await.context("notification dispatcher failed")?;
    Ok(())
}

/// Runs every due slot of every job. Failures are logged and the slot is
/// not retried.
pub async fn tick(
    config: &Config,
    services: &Services,
    queue: &NotificationQueue,
    clock: &dyn Clock,
    jobs: &mut [Job],
) {
    for job in jobs.iter_mut() {
        for slot in job.due(clock.now()) {
            let result = match job.kind() {
                JobKind::Hourly => run_hourly(config, services, slot).await.map(|_| ()),
                JobKind::Daily => run_daily(config, services, queue, slot, clock.now())
                    .await
                    .map(|_| ()),
            };
            if let Err(err) = result {
                tracing::error!(job = job.name(), slot = %slot, error = %format!("{err:#}"), "job failed");
            }
        }
    }
}

/// Requests analyses for stale repositories.
pub async fn run_hourly(config: &Config, services: &Services, slot: DateTime<Utc>) -> Result<usize> {
    let db = crate::open_database(config)?;
    let sent = analysis::request_stale(&db, &services.analysis, slot).await?;
    tracing::info!(slot = %slot, sent, "hourly analysis refresh finished");
    Ok(sent)
}

/// Settles the day that ended at `slot` and delivers its notices.
///
/// Returns `None` when that day was already settled.
pub async fn run_daily(
    config: &Config,
    services: &Services,
    queue: &NotificationQueue,
    slot: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<SettlementReport>> {
    let db = crate::open_database(config)?;
    settle_and_deliver(&db, services, queue, SettlementDay::ending_at(slot), now).await
}

async fn settle_and_deliver(
    db: &Database,
    services: &Services,
    queue: &NotificationQueue,
    day: SettlementDay,
    now: DateTime<Utc>,
) -> Result<Option<SettlementReport>> {
    let report = match db.settle_day(day, now) {
        Ok(report) => report,
        Err(DbError::AlreadySettled { day }) => {
            tracing::info!(day = %day, "day already settled, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("failed to settle {day}")),
    };
    settle::deliver(db, &report, services, queue, now).await?;
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_core::{FixedClock, PayInStatus, RelationshipKind, RelationshipStore, RepoId, TransitionRequest, UserId};
    use ff_db::NewPayIn;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn first_slot_is_next_boundary() {
        let hourly = Job::new(JobKind::Hourly, at("2025-01-01T10:15:00Z"));
        assert_eq!(hourly.next_run_at(), at("2025-01-01T11:00:00Z"));
        let daily = Job::new(JobKind::Daily, at("2025-01-01T00:00:00Z"));
        assert_eq!(daily.next_run_at(), at("2025-01-02T00:00:00Z"));
        assert_eq!(daily.name(), "daily");
    }

    #[test]
    fn missed_slots_are_replayed_in_order() {
        let mut job = Job::new(JobKind::Hourly, at("2025-01-01T10:15:00Z"));
        assert!(job.due(at("2025-01-01T10:59:59Z")).is_empty());
        assert_eq!(
            job.due(at("2025-01-01T13:00:00Z")),
            vec![
                at("2025-01-01T11:00:00Z"),
                at("2025-01-01T12:00:00Z"),
                at("2025-01-01T13:00:00Z"),
            ]
        );
        assert_eq!(job.next_run_at(), at("2025-01-01T14:00:00Z"));
    }

    fn seed(config: &Config) {
        let db = crate::open_database(config).unwrap();
        let t0 = at("2024-12-31T00:00:00Z");
        let alice = UserId::new("alice").unwrap();
        let repo = RepoId::new("repo-1").unwrap();
        db.insert_user(&alice, "alice@example.com", t0).unwrap();
        db.insert_repo(&repo, "https://git.example/r", "r", t0).unwrap();
        db.insert_pay_in(&NewPayIn {
            external_id: "ext-1".to_string(),
            user_id: alice.clone(),
            balance: ff_core::BigInt::from(365_000),
            currency: ff_core::Currency::new("USD").unwrap(),
            status: PayInStatus::Request,
            seats: 1,
            freq: 365,
            created_at: t0,
        })
        .unwrap();
        db.confirm_payment("ext-1", &ff_core::BigInt::from(0), t0).unwrap();
        db.record_transition(&TransitionRequest::activate(
            RelationshipKind::Sponsor,
            Some(alice),
            repo,
            t0,
        ))
        .unwrap();
    }

    #[tokio::test]
    async fn advancing_the_clock_runs_each_missed_day_once() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("ffs.db"),
            ..Config::default()
        };
        seed(&config);
        let services = Services::from_config(&config).unwrap();
        let (queue, _dispatcher) = NotificationQueue::new(services.notifications.clone());
        let clock = FixedClock::new(at("2025-01-01T12:00:00Z"));
        let mut jobs = [Job::new(JobKind::Daily, clock.now())];

        tick(&config, &services, &queue, &clock, &mut jobs).await;
        let db = crate::open_database(&config).unwrap();
        assert_eq!(db.status_summary().unwrap().last_settled_day, None);

        clock.set(at("2025-01-03T00:00:10Z"));
        tick(&config, &services, &queue, &clock, &mut jobs).await;
        tick(&config, &services, &queue, &clock, &mut jobs).await;

        let summary = db.status_summary().unwrap();
        assert_eq!(summary.last_settled_day.as_deref(), Some("2025-01-02"));
        // The sponsor was parked on 2025-01-01 and 2025-01-02 only.
        assert_eq!(
            db.repo_balances(&RepoId::new("repo-1").unwrap()).unwrap().parked
                [&ff_core::Currency::new("USD").unwrap()],
            ff_core::BigInt::from(2_000)
        );
    }

    #[tokio::test]
    async fn settled_day_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("ffs.db"),
            ..Config::default()
        };
        seed(&config);
        let services = Services::from_config(&config).unwrap();
        let (queue, _dispatcher) = NotificationQueue::new(services.notifications.clone());
        let slot = at("2025-01-02T00:00:00Z");

        let first = run_daily(&config, &services, &queue, slot, slot).await.unwrap();
        let second = run_daily(&config, &services, &queue, slot, slot).await.unwrap();

        assert_eq!(first.map(|r| r.day), Some("2025-01-01".to_string()));
        assert!(second.is_none());
    }
}
