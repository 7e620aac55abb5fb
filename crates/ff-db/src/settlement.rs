//! The daily settlement runner.
//!
//! A run settles one [`SettlementDay`] inside a single immediate transaction
//! that starts by claiming the day in `settlement_run`. A second run for the
//! same day fails with [`DbError::AlreadySettled`] and writes nothing; any
//! error rolls the whole day back.
//!
//! # Algorithm Summary
//!
//! 1. Group sponsor relationships active during the day by sponsoring user
//! 2. For each sponsor, let the inviter pay if there is one, pick a currency
//!    with the deduct-max strategy and split the daily rate over the repos
//! 3. Pay resolved contributors, park money for repos nobody can claim yet
//!    and record would-have-earned balances for unlinked emails
//! 4. Match trusted repositories with foundation money, capped per day and
//!    by the foundation's remaining funds
//! 5. Collect unlinked emails with balances for outreach

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use ff_core::money::share;
use ff_core::{
    Allocation, BigInt, CapCheck, Currency, Exhausted, FoundationBudget, Outreach,
    RelationshipKind, RelationshipStore, RepoId, RepoShares, SettlementDay, TopUpChannel,
    TopUpReminder, UserId, WeightResolution, deduct_max, payout_ceiling, plan_matching,
};
use num_traits::{Signed, Zero};
use rusqlite::{Transaction, TransactionBehavior, params};

use crate::ledger::UserRecord;
use crate::{Database, DbError, format_timestamp, is_constraint_violation, parse_amount};

/// A foundation skipped for the rest of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExhaustedFoundation {
    pub foundation: UserId,
    pub currency: Currency,
    pub reason: Exhausted,
}

/// What a settlement run did, and what should be sent once it committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub day: String,
    /// Sponsoring users with at least one active relationship.
    pub sponsors: usize,
    /// Sponsors whose payer had funds.
    pub funded: usize,
    pub contributions: usize,
    pub parked: usize,
    pub unclaimed: usize,
    pub foundation_contributions: usize,
    pub foundation_parked: usize,
    pub exhausted: Vec<ExhaustedFoundation>,
    pub top_ups: Vec<TopUpReminder>,
    pub outreach: Vec<Outreach>,
}

/// The per-repo amount one sponsor batch offers to foundation matching.
#[derive(Debug, Clone)]
struct MatchingDraw {
    currency: Currency,
    per_repo_share: BigInt,
    repos: Vec<RepoId>,
}

/// Amounts handed to [`Run::distribute`] for one repository.
struct Distribution<'a> {
    payer: &'a UserId,
    sponsor: &'a UserId,
    repo: &'a RepoId,
    currency: &'a Currency,
    /// Parked when nobody can be paid.
    deduct: &'a BigInt,
    /// Split over resolved contributors.
    add: &'a BigInt,
    /// Parked credit released by this payment.
    credit: Option<&'a BigInt>,
    foundation_payment: bool,
}

struct Run<'a> {
    db: &'a Database,
    day: SettlementDay,
    now: DateTime<Utc>,
    weights: HashMap<RepoId, WeightResolution>,
    unclaimed: BTreeMap<(String, RepoId, Currency), BigInt>,
    draws: Vec<MatchingDraw>,
    reminded: HashSet<(UserId, Option<UserId>)>,
    report: SettlementReport,
}

impl Database {
    /// Settles `day`, returning the notices to deliver after commit.
    pub fn settle_day(
        &self,
        day: SettlementDay,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, DbError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        match tx.execute(
            "INSERT INTO settlement_run (day, started_at) VALUES (?, ?)",
            params![day.label(), format_timestamp(now)],
        ) {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                tracing::warn!(day = %day, "settlement already ran for this day");
                return Err(DbError::AlreadySettled { day: day.label() });
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(
            day = %day,
            start = %day.start(),
            end = %day.end(),
            "starting daily settlement"
        );

        let mut run = Run::new(self, day, now);
        run.settle_sponsors()?;
        run.match_foundations()?;
        run.write_unclaimed()?;
        let mut report = run.report;
        report.outreach = self.outreach_candidates()?;

        tx.execute(
            "
            UPDATE settlement_run SET finished_at = ?, contributions = ?, parked = ?
            WHERE day = ?
            ",
            params![
                format_timestamp(now),
                report.contributions + report.foundation_contributions,
                report.parked + report.foundation_parked,
                day.label(),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            day = %day,
            sponsors = report.sponsors,
            funded = report.funded,
            contributions = report.contributions,
            parked = report.parked,
            foundation_contributions = report.foundation_contributions,
            top_ups = report.top_ups.len(),
            outreach = report.outreach.len(),
            "daily settlement finished"
        );
        Ok(report)
    }

    /// Unclaimed balances of emails no account has confirmed, per email.
    pub fn outreach_candidates(&self) -> Result<Vec<Outreach>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT u.email, u.currency, u.balance, u.repo_id
            FROM unclaimed u
            LEFT JOIN git_email g ON g.email = u.email AND g.confirmed_at IS NOT NULL
            WHERE g.email IS NULL
            ORDER BY u.email ASC, u.currency ASC, u.repo_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut by_email: BTreeMap<String, Outreach> = BTreeMap::new();
        for row in rows {
            let (email, currency, balance, repo) = row?;
            let balance = parse_amount(&balance, "unclaimed")?;
            let repo = RepoId::new(repo)?;
            let outreach = by_email.entry(email.clone()).or_insert_with(|| Outreach {
                email,
                balances: BTreeMap::new(),
                repos: Vec::new(),
            });
            *outreach.balances.entry(Currency::new(currency)?).or_default() += balance;
            if !outreach.repos.contains(&repo) {
                outreach.repos.push(repo);
            }
        }
        Ok(by_email.into_values().collect())
    }
}

impl<'a> Run<'a> {
    fn new(db: &'a Database, day: SettlementDay, now: DateTime<Utc>) -> Self {
        Self {
            db,
            day,
            now,
            weights: HashMap::new(),
            unclaimed: BTreeMap::new(),
            draws: Vec::new(),
            reminded: HashSet::new(),
            report: SettlementReport {
                day: day.label(),
                ..SettlementReport::default()
            },
        }
    }

    fn weights(&mut self, repo: &RepoId) -> Result<WeightResolution, DbError> {
        if let Some(cached) = self.weights.get(repo) {
            return Ok(cached.clone());
        }
        let resolution = match self.db.resolve_repo_weights(repo) {
            Ok(resolution) => resolution,
            Err(DbError::Validation(err)) => {
                tracing::error!(repo = %repo, error = %err, "unusable analysis, parking repository");
                WeightResolution::NoAnalysis
            }
            Err(err) => return Err(err),
        };
        self.weights.insert(repo.clone(), resolution.clone());
        Ok(resolution)
    }

    fn settle_sponsors(&mut self) -> Result<(), DbError> {
        let mut sponsors: BTreeMap<UserId, BTreeSet<RepoId>> = BTreeMap::new();
        for event in self
            .db
            .active_during(RelationshipKind::Sponsor, &self.day)?
        {
            if let Some(actor) = event.actor {
                sponsors.entry(actor).or_default().insert(event.repo);
            }
        }
        self.report.sponsors = sponsors.len();

        for (sponsor, repos) in sponsors {
            let repos: Vec<RepoId> = repos.into_iter().collect();
            self.settle_sponsor(&sponsor, &repos)?;
        }
        Ok(())
    }

    fn settle_sponsor(&mut self, sponsor: &UserId, repos: &[RepoId]) -> Result<(), DbError> {
        let user = self.db.require_user(sponsor)?;
        let payer = match &user.invited_by {
            Some(inviter) => {
                tracing::info!(sponsor = %sponsor, payer = %inviter, repos = repos.len(), "invited sponsor paid by inviter");
                self.db.require_user(inviter)?
            }
            None => user.clone(),
        };
        let invitee = (payer.id != user.id).then_some(&user);

        let allocation = deduct_max(&self.db.currency_positions(&payer.id)?);
        if allocation.needs_top_up() {
            self.remind(&payer, invitee, &allocation)?;
        }
        let Allocation::Funded {
            currency,
            days_left,
            daily_rate,
        } = allocation
        else {
            tracing::debug!(payer = %payer.id, "payer is out of funds");
            return Ok(());
        };
        self.report.funded += 1;

        let credit = self.db.future_credit(&payer.id, &currency)?;
        let shares = RepoShares::split(&daily_rate, &credit, repos.len());
        tracing::info!(
            payer = %payer.id,
            sponsor = %sponsor,
            currency = %currency,
            days_left = %days_left,
            deduct = %shares.deduct,
            add = %shares.add,
            "calculated repository shares"
        );

        for repo in repos {
            self.distribute(&Distribution {
                payer: &payer.id,
                sponsor,
                repo,
                currency: &currency,
                deduct: &shares.deduct,
                add: &shares.add,
                credit: shares.credit.as_ref(),
                foundation_payment: false,
            })?;
        }
        self.draws.push(MatchingDraw {
            currency,
            per_repo_share: shares.deduct,
            repos: repos.to_vec(),
        });
        Ok(())
    }

    fn remind(
        &mut self,
        payer: &UserRecord,
        invitee: Option<&UserRecord>,
        allocation: &Allocation,
    ) -> Result<(), DbError> {
        let key = (payer.id.clone(), invitee.map(|u| u.id.clone()));
        if !self.reminded.insert(key) {
            return Ok(());
        }
        let currency = match allocation {
            Allocation::Funded { currency, .. } => Some(currency.clone()),
            Allocation::NoFunds => None,
        };
        let latest = match &currency {
            Some(currency) => self.db.latest_success(&payer.id, currency)?,
            None => self.db.latest_success_any(&payer.id)?,
        };
        let channel = if payer.payment_method.is_some() {
            TopUpChannel::RecurringCharge
        } else {
            TopUpChannel::Email
        };
        tracing::info!(
            payer = %payer.id,
            days_left = %allocation.days_left(),
            channel = ?channel,
            "payer is running out of funds"
        );
        self.report.top_ups.push(TopUpReminder {
            payer: payer.id.clone(),
            payer_email: payer.email.clone(),
            invitee: invitee.map(|u| u.id.clone()),
            invitee_email: invitee.map(|u| u.email.clone()),
            channel,
            currency,
            days_left: allocation.days_left(),
            last_pay_in_at: latest.map(|pay_in| pay_in.created_at),
        });
        Ok(())
    }

    /// Pays, parks or records unclaimed money for one repository.
    fn distribute(&mut self, d: &Distribution<'_>) -> Result<(), DbError> {
        let weights = match self.weights(d.repo)? {
            WeightResolution::NoAnalysis => None,
            WeightResolution::Analysed(weights) => Some(weights),
        };

        if let Some(weights) = &weights {
            for (email, weight) in &weights.unresolved {
                let with_email = &weights.resolved_total + weight;
                let amount = share(d.add, weight, &with_email);
                *self
                    .unclaimed
                    .entry((email.clone(), d.repo.clone(), d.currency.clone()))
                    .or_default() += amount;
            }
        }

        let Some(weights) = weights.filter(|w| w.has_resolved()) else {
            tracing::info!(
                payer = %d.payer,
                repo = %d.repo,
                amount = %d.deduct,
                foundation = d.foundation_payment,
                "no resolved contributor, parking"
            );
            self.db.add_future_contribution(
                d.payer,
                d.repo,
                d.currency,
                d.deduct,
                &self.day,
                d.foundation_payment,
                self.now,
            )?;
            if d.foundation_payment {
                self.report.foundation_parked += 1;
            } else {
                self.report.parked += 1;
            }
            return Ok(());
        };

        if let Some(credit) = d.credit {
            self.db.add_future_contribution(
                d.payer,
                d.repo,
                d.currency,
                &-credit,
                &self.day,
                d.foundation_payment,
                self.now,
            )?;
        }
        for (contributor, weight) in &weights.resolved {
            let amount = share(d.add, weight, &weights.resolved_total);
            tracing::debug!(
                payer = %d.payer,
                contributor = %contributor,
                repo = %d.repo,
                amount = %amount,
                "daily contribution"
            );
            self.db.insert_daily_contribution(
                d.payer,
                d.sponsor,
                contributor,
                d.repo,
                d.currency,
                &amount,
                &self.day,
                d.foundation_payment,
                self.now,
            )?;
            if d.foundation_payment {
                self.report.foundation_contributions += 1;
            } else {
                self.report.contributions += 1;
            }
        }
        Ok(())
    }

    fn match_foundations(&mut self) -> Result<(), DbError> {
        if self.draws.is_empty() {
            return Ok(());
        }
        let trusted: BTreeSet<RepoId> = self
            .db
            .active_during(RelationshipKind::Trust, &self.day)?
            .into_iter()
            .map(|event| event.repo)
            .collect();

        let mut multiplied: BTreeMap<UserId, BTreeSet<RepoId>> = BTreeMap::new();
        let mut daily_limits: HashMap<UserId, BigInt> = HashMap::new();
        for event in self
            .db
            .active_during(RelationshipKind::Multiplier, &self.day)?
        {
            let Some(actor) = event.actor else { continue };
            if !daily_limits.contains_key(&actor) {
                let foundation = self.db.require_user(&actor)?;
                if !foundation.multiplier {
                    tracing::debug!(user = %actor, "multiplier relationship without foundation flag");
                    continue;
                }
                daily_limits.insert(actor.clone(), foundation.multiplier_daily_limit);
            }
            multiplied.entry(actor).or_default().insert(event.repo);
        }
        if multiplied.is_empty() || trusted.is_empty() {
            return Ok(());
        }

        let mut budgets: HashMap<(UserId, Currency), FoundationBudget> = HashMap::new();
        let mut pending: BTreeMap<(UserId, RepoId, Currency), BigInt> = BTreeMap::new();
        let mut stopped: HashSet<(UserId, Currency)> = HashSet::new();
        let draws = std::mem::take(&mut self.draws);

        for draw in &draws {
            for part in plan_matching(&draw.per_repo_share, &draw.repos, &trusted, &multiplied) {
                pending
                    .entry((part.foundation.clone(), part.repo.clone(), draw.currency.clone()))
                    .or_default();
                let parked = !matches!(
                    self.weights(&part.repo)?,
                    WeightResolution::Analysed(ref w) if w.has_resolved()
                );
                let ceiling = payout_ceiling(&part.amount, parked);

                let budget = match budgets.entry((part.foundation.clone(), draw.currency.clone())) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let limit = daily_limits.get(&part.foundation).cloned().unwrap_or_default();
                        entry.insert(self.load_budget(&part.foundation, &draw.currency, &limit)?)
                    }
                };
                match budget.claim(&ceiling) {
                    CapCheck::Granted(amount) => {
                        if amount.is_positive() {
                            *pending
                                .entry((part.foundation, part.repo, draw.currency.clone()))
                                .or_default() += amount;
                        }
                    }
                    CapCheck::Exhausted(reason) => {
                        if stopped.insert((part.foundation.clone(), draw.currency.clone())) {
                            tracing::warn!(
                                foundation = %part.foundation,
                                currency = %draw.currency,
                                reason = %reason,
                                "foundation limit reached"
                            );
                            self.report.exhausted.push(ExhaustedFoundation {
                                foundation: part.foundation,
                                currency: draw.currency.clone(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        for ((foundation, repo, currency), amount) in pending {
            let resolved = matches!(
                self.weights(&repo)?,
                WeightResolution::Analysed(ref w) if w.has_resolved()
            );
            let credit = if resolved {
                self.db.foundation_credit(&foundation, &repo, &currency)?
            } else {
                BigInt::zero()
            };
            if amount.is_zero() && credit.is_zero() {
                continue;
            }
            let add = &amount + &credit;
            self.distribute(&Distribution {
                payer: &foundation,
                sponsor: &foundation,
                repo: &repo,
                currency: &currency,
                deduct: &amount,
                add: &add,
                credit: credit.is_positive().then_some(&credit),
                foundation_payment: true,
            })?;
        }
        Ok(())
    }

    fn load_budget(
        &self,
        foundation: &UserId,
        currency: &Currency,
        daily_limit: &BigInt,
    ) -> Result<FoundationBudget, DbError> {
        let spent_today = self
            .db
            .foundation_spent_on(foundation, currency, &self.day)?;
        let lifetime = self
            .db
            .lifetime_success(foundation)?
            .remove(currency)
            .unwrap_or_default();
        let spent_total = self
            .db
            .sponsor_spending(foundation)?
            .remove(currency)
            .unwrap_or_default();
        Ok(FoundationBudget::new(
            daily_limit,
            &spent_today,
            &lifetime,
            &spent_total,
        ))
    }

    fn write_unclaimed(&mut self) -> Result<(), DbError> {
        let unclaimed = std::mem::take(&mut self.unclaimed);
        self.report.unclaimed = unclaimed.len();
        for ((email, repo, currency), balance) in unclaimed {
            self.db
                .upsert_unclaimed(&email, &repo, &currency, &balance, &self.day, self.now)?;
        }
        Ok(())
    }
}
