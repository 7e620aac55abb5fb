//! The "deduct-max" allocation strategy.
//!
//! Picks the currency in which a payer can keep funding for the most days.
//! Inputs are always recomputed from committed ledger rows; nothing here is
//! cached between runs.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::types::Currency;

/// The most recent successful pay-in in one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestPayIn {
    pub balance: BigInt,
    pub seats: i64,
    pub freq: i64,
}

impl LatestPayIn {
    /// `balance / seats / freq` with truncating integer division.
    ///
    /// Returns `None` when seats or freq is not positive.
    pub fn daily_rate(&self) -> Option<BigInt> {
        if self.seats <= 0 || self.freq <= 0 {
            return None;
        }
        Some(&self.balance / BigInt::from(self.seats) / BigInt::from(self.freq))
    }
}

/// Ledger totals for one payer in one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyPosition {
    /// Sum of all SUCCESS pay-ins.
    pub lifetime_success: BigInt,
    /// Sum of all daily contributions the payer already funded.
    pub committed: BigInt,
    /// Sum of all future contributions the payer parked or consumed.
    pub promised_future: BigInt,
    pub latest: Option<LatestPayIn>,
}

impl CurrencyPosition {
    pub fn net(&self) -> BigInt {
        &self.lifetime_success - &self.committed - &self.promised_future
    }
}

/// Result of [`deduct_max`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    Funded {
        currency: Currency,
        days_left: BigInt,
        daily_rate: BigInt,
    },
    /// No currency covers even one more day.
    NoFunds,
}

impl Allocation {
    /// Remaining runway, zero when unfunded.
    pub fn days_left(&self) -> BigInt {
        match self {
            Self::Funded { days_left, .. } => days_left.clone(),
            Self::NoFunds => BigInt::zero(),
        }
    }

    /// Whether the payer should be reminded to top up.
    pub fn needs_top_up(&self) -> bool {
        self.days_left() <= BigInt::from(1)
    }
}

/// Chooses the currency with the most days of runway.
///
/// Currencies are visited in ascending code order and only a strictly larger
/// runway replaces the current pick, so ties go to the smallest code.
pub fn deduct_max(positions: &BTreeMap<Currency, CurrencyPosition>) -> Allocation {
    let mut best = Allocation::NoFunds;
    for (currency, position) in positions {
        if position.lifetime_success.is_zero() {
            continue;
        }
        let Some(latest) = &position.latest else {
            tracing::warn!(currency = %currency, "no successful pay-in to derive a daily rate");
            continue;
        };
        let Some(daily_rate) = latest.daily_rate().filter(|rate| rate.is_positive()) else {
            tracing::warn!(
                currency = %currency,
                seats = latest.seats,
                freq = latest.freq,
                "latest pay-in yields no daily rate"
            );
            continue;
        };
        let days_left = position.net() / &daily_rate;
        if !days_left.is_positive() {
            continue;
        }
        let better = match &best {
            Allocation::Funded { days_left: max, .. } => days_left > *max,
            Allocation::NoFunds => true,
        };
        if better {
            best = Allocation::Funded {
                currency: currency.clone(),
                days_left,
                daily_rate,
            };
        }
    }
    best
}

/// Per-repository amounts derived from an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoShares {
    /// Taken from the payer's balance for each repository.
    pub deduct: BigInt,
    /// Distributed to each repository with resolved contributors.
    pub add: BigInt,
    /// Released parked credit per repository; recorded negated.
    pub credit: Option<BigInt>,
}

impl RepoShares {
    /// Splits the day's rate and any parked credit evenly over `repo_count`.
    pub fn split(daily_rate: &BigInt, future_credit: &BigInt, repo_count: usize) -> Self {
        let count = BigInt::from(repo_count.max(1));
        let deduct = daily_rate / &count;
        if future_credit.is_positive() {
            let credit = future_credit / &count;
            Self {
                add: &deduct + &credit,
                deduct,
                credit: Some(credit),
            }
        } else {
            Self {
                add: deduct.clone(),
                deduct,
                credit: None,
            }
        }
    }
}
