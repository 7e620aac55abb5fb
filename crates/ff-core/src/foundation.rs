//! Foundation matching: splitting a sponsor batch's pool and enforcing caps.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::money::{div_trunc, scale};
use crate::types::{RepoId, UserId};

/// Share of a part paid out when the money goes straight to contributors.
const IMMEDIATE_NUMERATOR: u32 = 9;
const IMMEDIATE_DENOMINATOR: u32 = 10;

/// One (foundation, repository) pair drawing from a sponsor batch's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPart {
    pub foundation: UserId,
    pub repo: RepoId,
    /// `pool / parts`, before the payout ceiling and caps.
    pub amount: BigInt,
}

/// Splits the pool of one sponsor batch over participating foundations.
///
/// Only repositories in `batch` that are trusted draw money. `multiplied`
/// maps each foundation to the repositories it multiplies today.
pub fn plan_matching(
    per_repo_share: &BigInt,
    batch: &[RepoId],
    trusted: &BTreeSet<RepoId>,
    multiplied: &BTreeMap<UserId, BTreeSet<RepoId>>,
) -> Vec<MatchPart> {
    let trusted_in_batch: BTreeSet<&RepoId> =
        batch.iter().filter(|repo| trusted.contains(*repo)).collect();
    if trusted_in_batch.is_empty() {
        return Vec::new();
    }

    let eligible = &trusted_in_batch;
    let pairs: Vec<(&UserId, &RepoId)> = multiplied
        .iter()
        .flat_map(move |(foundation, repos)| {
            repos
                .iter()
                .filter(move |repo| eligible.contains(repo))
                .map(move |repo| (foundation, repo))
        })
        .collect();
    if pairs.is_empty() {
        return Vec::new();
    }

    let pool = per_repo_share * BigInt::from(trusted_in_batch.len());
    let amount = div_trunc(&pool, &BigInt::from(pairs.len()));
    pairs
        .into_iter()
        .map(|(foundation, repo)| MatchPart {
            foundation: foundation.clone(),
            repo: repo.clone(),
            amount: amount.clone(),
        })
        .collect()
}

/// The most a part may pay: all of it when parked, 90% when paid out now.
pub fn payout_ceiling(amount_per_part: &BigInt, parked: bool) -> BigInt {
    if parked {
        amount_per_part.clone()
    } else {
        scale(amount_per_part, IMMEDIATE_NUMERATOR, IMMEDIATE_DENOMINATOR)
    }
}

/// Which cap stopped a foundation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exhausted {
    DailyLimit,
    Funds,
}

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyLimit => f.write_str("daily limit"),
            Self::Funds => f.write_str("funds"),
        }
    }
}

/// Outcome of [`FoundationBudget::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapCheck {
    Granted(BigInt),
    Exhausted(Exhausted),
}

/// Remaining daily and lifetime allowance of one foundation in one currency.
///
/// Once either cap is hit the budget stays exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundationBudget {
    daily_remaining: BigInt,
    funds_remaining: BigInt,
    exhausted: Option<Exhausted>,
}

impl FoundationBudget {
    pub fn new(
        daily_limit: &BigInt,
        spent_today: &BigInt,
        lifetime_success: &BigInt,
        spent_total: &BigInt,
    ) -> Self {
        Self {
            daily_remaining: daily_limit - spent_today,
            funds_remaining: lifetime_success - spent_total,
            exhausted: None,
        }
    }

    /// Clamps `candidate` by the daily limit, then by remaining funds.
    pub fn claim(&mut self, candidate: &BigInt) -> CapCheck {
        if let Some(reason) = self.exhausted {
            return CapCheck::Exhausted(reason);
        }
        if !self.daily_remaining.is_positive() {
            self.exhausted = Some(Exhausted::DailyLimit);
            return CapCheck::Exhausted(Exhausted::DailyLimit);
        }
        if !self.funds_remaining.is_positive() {
            self.exhausted = Some(Exhausted::Funds);
            return CapCheck::Exhausted(Exhausted::Funds);
        }
        if !candidate.is_positive() {
            return CapCheck::Granted(BigInt::zero());
        }
        let granted = candidate
            .min(&self.daily_remaining)
            .min(&self.funds_remaining)
            .clone();
        self.daily_remaining -= &granted;
        self.funds_remaining -= &granted;
        CapCheck::Granted(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str) -> RepoId {
        RepoId::new(id).unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn big(v: i64) -> BigInt {
        BigInt::from(v)
    }

    #[test]
    fn pool_counts_only_trusted_repos() {
        let batch = [repo("r1"), repo("r2"), repo("r3")];
        let trusted = BTreeSet::from([repo("r1"), repo("r2")]);
        let multiplied = BTreeMap::from([
            (user("f1"), BTreeSet::from([repo("r1"), repo("r2"), repo("r3")])),
            (user("f2"), BTreeSet::from([repo("r2")])),
        ]);

        let parts = plan_matching(&big(300), &batch, &trusted, &multiplied);

        // pool = 300 * 2 trusted, parts = f1:r1, f1:r2, f2:r2
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.amount == big(200)));
        assert!(!parts.iter().any(|p| p.repo == repo("r3")));
    }

    #[test]
    fn no_trusted_repo_means_no_matching() {
        let batch = [repo("r1")];
        let multiplied = BTreeMap::from([(user("f1"), BTreeSet::from([repo("r1")]))]);
        assert!(plan_matching(&big(100), &batch, &BTreeSet::new(), &multiplied).is_empty());
    }

    #[test]
    fn immediate_payout_withholds_a_tenth() {
        assert_eq!(payout_ceiling(&big(1_000), false), big(900));
        assert_eq!(payout_ceiling(&big(1_000), true), big(1_000));
    }

    #[test]
    fn daily_limit_clamps_then_exhausts() {
        let mut budget = FoundationBudget::new(&big(150), &big(0), &big(10_000), &big(0));
        assert_eq!(budget.claim(&big(100)), CapCheck::Granted(big(100)));
        assert_eq!(budget.claim(&big(100)), CapCheck::Granted(big(50)));
        assert_eq!(
            budget.claim(&big(100)),
            CapCheck::Exhausted(Exhausted::DailyLimit)
        );
        assert_eq!(
            budget.claim(&big(1)),
            CapCheck::Exhausted(Exhausted::DailyLimit)
        );
    }

    #[test]
    fn funds_check_applies_after_daily_limit() {
        let mut budget = FoundationBudget::new(&big(1_000), &big(0), &big(500), &big(430));
        assert_eq!(budget.claim(&big(100)), CapCheck::Granted(big(70)));
        assert_eq!(budget.claim(&big(100)), CapCheck::Exhausted(Exhausted::Funds));
        // Sticky even for a zero candidate.
        assert_eq!(budget.claim(&big(0)), CapCheck::Exhausted(Exhausted::Funds));
    }

    #[test]
    fn already_spent_day_is_exhausted_immediately() {
        let mut budget = FoundationBudget::new(&big(100), &big(100), &big(10_000), &big(100));
        assert_eq!(
            budget.claim(&big(10)),
            CapCheck::Exhausted(Exhausted::DailyLimit)
        );
    }
}
