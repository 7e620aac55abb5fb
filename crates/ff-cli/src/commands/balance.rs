//! Per-user money overview.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use ff_core::{BigInt, Currency};
use ff_db::Database;
use serde::Serialize;

use super::util::{user_id, write_amounts};

/// Amounts per currency; serialized as decimal strings.
#[derive(Debug, Serialize)]
struct BalanceView {
    user: String,
    paid_in: BTreeMap<String, String>,
    spent: BTreeMap<String, String>,
    earned: BTreeMap<String, String>,
    unclaimed: BTreeMap<String, String>,
}

fn as_strings(amounts: &BTreeMap<Currency, BigInt>) -> BTreeMap<String, String> {
    amounts
        .iter()
        .map(|(currency, amount)| (currency.to_string(), amount.to_string()))
        .collect()
}

pub fn run<W: Write>(writer: &mut W, db: &Database, user: &str, json: bool) -> Result<()> {
    let user = user_id(user)?;
    db.require_user(&user)?;

    let paid_in = db.lifetime_success(&user)?;
    let spent = db.sponsor_spending(&user)?;
    let earned = db.contributor_earnings(&user)?;
    let mut unclaimed = BTreeMap::new();
    for currency in earned.keys() {
        let open = db.unclaimed_contributions(&user, currency)?;
        if !open.ids.is_empty() {
            unclaimed.insert(currency.clone(), open.total);
        }
    }

    if json {
        let view = BalanceView {
            user: user.to_string(),
            paid_in: as_strings(&paid_in),
            spent: as_strings(&spent),
            earned: as_strings(&earned),
            unclaimed: as_strings(&unclaimed),
        };
        serde_json::to_writer_pretty(&mut *writer, &view)?;
        writeln!(writer)?;
        return Ok(());
    }

    writeln!(writer, "User: {user}")?;
    for (label, amounts) in [
        ("Paid in", &paid_in),
        ("Spent", &spent),
        ("Earned", &earned),
        ("Unclaimed", &unclaimed),
    ] {
        writeln!(writer, "{label}:")?;
        write_amounts(writer, amounts)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Utc};
    use ff_core::{PayInStatus, RepoId, UserId};
    use ff_db::NewPayIn;
    use insta::assert_snapshot;

    fn earning_contributor() -> Database {
        let db = Database::open_in_memory().unwrap();
        let t0 = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let alice = UserId::new("alice").unwrap();
        db.insert_user(&alice, "alice@example.com", t0).unwrap();
        db.insert_user(&UserId::new("bob").unwrap(), "bob@example.com", t0)
            .unwrap();
        db.insert_repo(&RepoId::new("repo-1").unwrap(), "https://git.example/r", "r", t0)
            .unwrap();
        db.insert_pay_in(&NewPayIn {
            external_id: "ext-1".to_string(),
            user_id: alice,
            balance: BigInt::from(365_000),
            currency: Currency::new("USD").unwrap(),
            status: PayInStatus::Request,
            seats: 1,
            freq: 365,
            created_at: t0,
        })
        .unwrap();
        db.confirm_payment("ext-1", &BigInt::from(0), t0).unwrap();
        db
    }

    #[test]
    fn balance_lists_each_section() {
        let db = earning_contributor();
        let mut out = Vec::new();
        run(&mut out, &db, "alice", false).unwrap();
        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        User: alice
        Paid in:
          - USD: 365000
        Spent:
          (none)
        Earned:
          (none)
        Unclaimed:
          (none)
        ");
    }

    #[test]
    fn balance_json_uses_string_amounts() {
        let db = earning_contributor();
        let mut out = Vec::new();
        run(&mut out, &db, "alice", true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["paid_in"]["USD"], "365000");
        assert_eq!(value["user"], "alice");
    }

    #[test]
    fn unknown_user_is_an_error() {
        let db = earning_contributor();
        let mut out = Vec::new();
        assert!(run(&mut out, &db, "nobody", false).is_err());
    }
}
