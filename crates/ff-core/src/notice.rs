//! Notices produced by a settlement run for delivery after commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::Serialize;

use crate::types::{Currency, RepoId, UserId};

/// How a payer running low on funds is reminded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpChannel {
    /// The saved payment method is charged again.
    RecurringCharge,
    Email,
}

/// A payer with at most one day of runway left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUpReminder {
    pub payer: UserId,
    pub payer_email: String,
    /// The invitee whose sponsorship the payer funds, if any.
    pub invitee: Option<UserId>,
    pub invitee_email: Option<String>,
    pub channel: TopUpChannel,
    /// Currency picked by the strategy, `None` when no currency had funds.
    pub currency: Option<Currency>,
    #[serde(serialize_with = "serialize_big")]
    pub days_left: BigInt,
    /// Creation time of the payer's latest successful pay-in.
    pub last_pay_in_at: Option<DateTime<Utc>>,
}

impl TopUpReminder {
    /// Dedup key: one reminder per payer per purchase.
    pub fn dedup_key(&self) -> String {
        let marker = self
            .last_pay_in_at
            .map_or_else(|| "never".to_string(), |at| at.timestamp_millis().to_string());
        format!("topup:{}:{marker}", self.payer)
    }
}

/// Money waiting for a git email that no account has claimed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outreach {
    pub email: String,
    #[serde(serialize_with = "serialize_balances")]
    pub balances: BTreeMap<Currency, BigInt>,
    pub repos: Vec<RepoId>,
}

impl Outreach {
    /// Dedup key bucketing `now` into windows of `interval_secs`.
    pub fn dedup_key(&self, now: DateTime<Utc>, interval_secs: u64) -> String {
        let width = i64::try_from(interval_secs.max(1)).unwrap_or(i64::MAX);
        let bucket = now.timestamp().div_euclid(width);
        format!("marketing:{}:{bucket}", self.email)
    }
}

fn serialize_big<S: serde::Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn serialize_balances<S: serde::Serializer>(
    balances: &BTreeMap<Currency, BigInt>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(balances.iter().map(|(c, v)| (c.as_str(), v.to_string())))
}
