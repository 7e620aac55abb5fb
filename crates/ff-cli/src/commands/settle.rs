//! Daily settlement and delivery of the notices it produces.

use std::io::Write;

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use ff_client::{
    Notice, NotificationQueue, RecurringCharge, outreach_notice, top_up_notices,
};
use ff_core::{SettlementDay, TopUpChannel, TopUpReminder};
use ff_db::{Database, SettlementReport};

use crate::Services;

/// What happened to a report's notices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub queued: usize,
    /// Notices whose key was already in the sent-log.
    pub suppressed: usize,
    pub charges: usize,
}

/// Settles `day` (default: the day that just ended) and delivers its notices.
pub async fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    day: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<()> {
    let day = day.map_or_else(|| SettlementDay::ending_at(now), SettlementDay::new);
    ensure!(day.end() <= now, "{day} has not ended yet");

    let report = db
        .settle_day(day, now)
        .with_context(|| format!("failed to settle {day}"))?;

    let (queue, dispatcher) = NotificationQueue::new(services.notifications.clone());
    let drain = tokio::spawn(dispatcher.run());
    let delivery = deliver(db, &report, services, &queue, now).await?;
    drop(queue);
    drain.await.context("notification dispatcher failed")?;

    write_report(writer, &report, &delivery)
}

/// Queues every notice of `report` whose sent-log key is new and starts
/// recurring charges for payers with a stored payment method.
pub async fn deliver(
    db: &Database,
    report: &SettlementReport,
    services: &Services,
    queue: &NotificationQueue,
    now: DateTime<Utc>,
) -> Result<Delivery> {
    let mut delivery = Delivery::default();

    for reminder in &report.top_ups {
        for (index, notice) in top_up_notices(reminder, &services.messages)
            .into_iter()
            .enumerate()
        {
            if !send(db, queue, notice, now, &mut delivery)? {
                continue;
            }
            if index == 0
                && reminder.channel == TopUpChannel::RecurringCharge
                && charge(db, services, reminder).await?
            {
                delivery.charges += 1;
            }
        }
    }

    for outreach in &report.outreach {
        let notice = outreach_notice(outreach, now, &services.messages);
        send(db, queue, notice, now, &mut delivery)?;
    }

    tracing::info!(
        day = %report.day,
        queued = delivery.queued,
        suppressed = delivery.suppressed,
        charges = delivery.charges,
        "settlement notices delivered"
    );
    Ok(delivery)
}

fn send(
    db: &Database,
    queue: &NotificationQueue,
    notice: Notice,
    now: DateTime<Utc>,
    delivery: &mut Delivery,
) -> Result<bool> {
    let fresh = db.claim_notification(
        &notice.key,
        &notice.email,
        notice.user.as_ref(),
        notice.kind,
        now,
    )?;
    if !fresh {
        tracing::debug!(key = %notice.key, "notification already sent");
        delivery.suppressed += 1;
        return Ok(false);
    }
    if queue.enqueue(notice.message) {
        delivery.queued += 1;
    }
    Ok(true)
}

/// Charges the payer's stored method. Failures are logged, not fatal.
async fn charge(db: &Database, services: &Services, reminder: &TopUpReminder) -> Result<bool> {
    if !services.payment.is_configured() {
        tracing::info!(payer = %reminder.payer, "no payment provider configured, skipping charge");
        return Ok(false);
    }
    let Some(payment_method) = db.require_user(&reminder.payer)?.payment_method else {
        return Ok(false);
    };
    let request = RecurringCharge {
        user_id: reminder.payer.clone(),
        payment_method,
        currency: reminder.currency.clone(),
    };
    match services.payment.charge_recurring(&request).await {
        Ok(()) => Ok(true),
        Err(err) => {
            tracing::error!(payer = %reminder.payer, error = %err, "recurring charge failed");
            Ok(false)
        }
    }
}

pub fn write_report<W: Write>(
    writer: &mut W,
    report: &SettlementReport,
    delivery: &Delivery,
) -> Result<()> {
    writeln!(writer, "Settled {}", report.day)?;
    writeln!(writer, "Sponsors: {} (funded {})", report.sponsors, report.funded)?;
    writeln!(
        writer,
        "Contributions: {} (parked {}, unclaimed emails {})",
        report.contributions, report.parked, report.unclaimed
    )?;
    writeln!(
        writer,
        "Foundation contributions: {} (parked {})",
        report.foundation_contributions, report.foundation_parked
    )?;
    for exhausted in &report.exhausted {
        writeln!(
            writer,
            "Foundation {} stopped in {}: {}",
            exhausted.foundation, exhausted.currency, exhausted.reason
        )?;
    }
    writeln!(writer, "Top-up reminders: {}", report.top_ups.len())?;
    writeln!(writer, "Outreach: {}", report.outreach.len())?;
    writeln!(
        writer,
        "Notifications: {} queued, {} already sent, {} recurring charge(s)",
        delivery.queued, delivery.suppressed, delivery.charges
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use ff_core::{
        AnalysisEntry, BigInt, PayInStatus, RelationshipKind, RelationshipStore, RepoId,
        TransitionRequest, UserId,
    };
    use ff_db::{NewAnalysisRequest, NewPayIn};
    use insta::assert_snapshot;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn services() -> Services {
        Services::from_config(&Config::default()).unwrap()
    }

    /// alice funds one day of sponsoring for repo-1; bob is linked, ghost is not.
    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        let t0 = at("2024-12-31T00:00:00Z");
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();
        let repo = RepoId::new("repo-1").unwrap();
        db.insert_user(&alice, "alice@example.com", t0).unwrap();
        db.insert_user(&bob, "bob@example.com", t0).unwrap();
        db.insert_repo(&repo, "https://git.example/r", "r", t0).unwrap();
        db.link_git_email("bob@git", &bob, Some(t0), t0).unwrap();
        db.insert_pay_in(&NewPayIn {
            external_id: "ext-1".to_string(),
            user_id: alice.clone(),
            balance: BigInt::from(1_000),
            currency: ff_core::Currency::new("USD").unwrap(),
            status: PayInStatus::Request,
            seats: 1,
            freq: 1,
            created_at: t0,
        })
        .unwrap();
        db.confirm_payment("ext-1", &BigInt::from(0), t0).unwrap();
        db.record_transition(&TransitionRequest::activate(
            RelationshipKind::Sponsor,
            Some(alice),
            repo.clone(),
            at("2025-01-01T00:00:00Z"),
        ))
        .unwrap();
        let request = db
            .insert_analysis_request(
                &NewAnalysisRequest {
                    repo,
                    git_url: "https://git.example/r".to_string(),
                    date_from: at("2024-10-01T00:00:00Z"),
                    date_to: t0,
                },
                t0,
            )
            .unwrap();
        let entries = [
            AnalysisEntry {
                email: "bob@git".to_string(),
                names: vec![],
                weight: 1.0,
            },
            AnalysisEntry {
                email: "ghost@git".to_string(),
                names: vec![],
                weight: 1.0,
            },
        ];
        db.record_analysis_result(&request, None, &entries, t0).unwrap();
        db
    }

    #[tokio::test]
    async fn settle_prints_summary() {
        let db = seeded();
        let mut out = Vec::new();

        run(
            &mut out,
            &db,
            &services(),
            NaiveDate::from_ymd_opt(2025, 1, 1),
            at("2025-01-02T00:00:05Z"),
        )
        .await
        .unwrap();

        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        Settled 2025-01-01
        Sponsors: 1 (funded 1)
        Contributions: 1 (parked 0, unclaimed emails 1)
        Foundation contributions: 0 (parked 0)
        Top-up reminders: 1
        Outreach: 1
        Notifications: 2 queued, 0 already sent, 0 recurring charge(s)
        ");
    }

    #[tokio::test]
    async fn notices_are_sent_once() {
        let db = seeded();
        let now = at("2025-01-02T00:00:05Z");
        let report = db
            .settle_day(SettlementDay::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()), now)
            .unwrap();
        let services = services();
        let (queue, _dispatcher) = NotificationQueue::new(services.notifications.clone());

        let first = deliver(&db, &report, &services, &queue, now).await.unwrap();
        let second = deliver(&db, &report, &services, &queue, now).await.unwrap();

        assert_eq!(first.queued, 2);
        assert_eq!(second, Delivery {
            queued: 0,
            suppressed: 2,
            charges: 0,
        });
    }

    #[tokio::test]
    async fn unfinished_day_is_refused() {
        let db = seeded();
        let mut out = Vec::new();
        let err = run(
            &mut out,
            &db,
            &services(),
            NaiveDate::from_ymd_opt(2025, 1, 1),
            at("2025-01-01T12:00:00Z"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("has not ended yet"));
    }

    #[tokio::test]
    async fn second_settlement_of_a_day_fails() {
        let db = seeded();
        let now = at("2025-01-02T00:00:05Z");
        let day = NaiveDate::from_ymd_opt(2025, 1, 1);
        let mut out = Vec::new();
        run(&mut out, &db, &services(), day, now).await.unwrap();

        let err = run(&mut out, &db, &services(), day, now).await.unwrap_err();

        assert!(format!("{err:#}").contains("settlement for 2025-01-01 has already run"));
    }
}
