//! Payment requests and confirmations.

use std::io::Write;

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use ff_core::PayInStatus;
use ff_db::{Database, NewPayIn};
use num_traits::Signed;

use super::util::{amount, currency, user_id};

/// Records a payment request; returns the external id.
#[allow(clippy::too_many_arguments)]
pub fn request<W: Write>(
    writer: &mut W,
    db: &Database,
    user: &str,
    balance: &str,
    currency_code: &str,
    seats: i64,
    freq: i64,
    external_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String> {
    let user = user_id(user)?;
    let balance = amount(balance)?;
    ensure!(balance.is_positive(), "payment amount must be positive");
    ensure!(seats > 0, "seats must be positive");
    ensure!(freq > 0, "freq must be positive");
    db.require_user(&user)?;

    let external_id = external_id.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
    db.insert_pay_in(&NewPayIn {
        external_id: external_id.clone(),
        user_id: user.clone(),
        balance: balance.clone(),
        currency: currency(currency_code)?,
        status: PayInStatus::Request,
        seats,
        freq,
        created_at: now,
    })
    .with_context(|| format!("failed to record payment request {external_id}"))?;

    writeln!(
        writer,
        "Requested {balance} {currency_code} from {user} ({seats} seat(s), {freq} day(s)): {external_id}"
    )?;
    Ok(external_id)
}

pub fn confirm<W: Write>(
    writer: &mut W,
    db: &Database,
    external_id: &str,
    fee: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let fee = amount(fee)?;
    db.confirm_payment(external_id, &fee, now)
        .with_context(|| format!("cannot confirm payment {external_id}"))?;
    writeln!(writer, "Confirmed payment {external_id} (fee {fee})")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_core::{BigInt, Currency, UserId};

    #[test]
    fn request_then_confirm_credits_net_amount() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let alice = UserId::new("alice").unwrap();
        db.insert_user(&alice, "alice@example.com", now).unwrap();
        let mut out = Vec::new();

        let id = request(&mut out, &db, "alice", "1000", "USD", 1, 365, Some("ext-1"), now)
            .unwrap();
        confirm(&mut out, &db, &id, "30", now).unwrap();

        let lifetime = db.lifetime_success(&alice).unwrap();
        assert_eq!(lifetime[&Currency::new("USD").unwrap()], BigInt::from(970));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Requested 1000 USD from alice (1 seat(s), 365 day(s)): ext-1\nConfirmed payment ext-1 (fee 30)\n"
        );
    }

    #[test]
    fn request_rejects_non_positive_amounts() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_user(&UserId::new("alice").unwrap(), "alice@example.com", now)
            .unwrap();
        let mut out = Vec::new();
        assert!(request(&mut out, &db, "alice", "0", "USD", 1, 365, None, now).is_err());
        assert!(request(&mut out, &db, "alice", "10", "USD", 1, 0, None, now).is_err());
    }

    #[test]
    fn generated_external_ids_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_user(&UserId::new("alice").unwrap(), "alice@example.com", now)
            .unwrap();
        let mut out = Vec::new();
        let a = request(&mut out, &db, "alice", "10", "USD", 1, 30, None, now).unwrap();
        let b = request(&mut out, &db, "alice", "10", "USD", 1, 30, None, now).unwrap();
        assert_ne!(a, b);
    }
}
