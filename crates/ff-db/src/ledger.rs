//! Users, pay-ins and the contribution ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ff_core::{
    BigInt, Currency, CurrencyPosition, LatestPayIn, PayInStatus, RelationshipKind, RepoId,
    SettlementDay, UserId,
};
use num_traits::{Signed, Zero};
use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::{
    Database, DbError, format_timestamp, is_constraint_violation, parse_amount,
    parse_optional_timestamp, parse_timestamp, sum_by_currency,
};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub invited_by: Option<UserId>,
    pub payment_method: Option<String>,
    pub multiplier: bool,
    pub multiplier_daily_limit: BigInt,
    pub created_at: DateTime<Utc>,
}

/// A pay-in row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayIn {
    pub external_id: String,
    pub user_id: UserId,
    pub balance: BigInt,
    pub currency: Currency,
    pub status: PayInStatus,
    pub seats: i64,
    pub freq: i64,
    pub created_at: DateTime<Utc>,
}

/// A stored pay-in row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayInRecord {
    pub id: i64,
    pub external_id: String,
    pub user_id: UserId,
    pub balance: BigInt,
    pub currency: Currency,
    pub status: PayInStatus,
    pub seats: i64,
    pub freq: i64,
    pub created_at: DateTime<Utc>,
}

/// A settled daily contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyContributionRecord {
    pub id: i64,
    pub payer: UserId,
    pub sponsor: UserId,
    pub contributor: UserId,
    pub repo: RepoId,
    pub currency: Currency,
    pub amount: BigInt,
    pub day: String,
    pub foundation_payment: bool,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Unclaimed daily contributions of one contributor in one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimableContributions {
    pub ids: Vec<i64>,
    pub total: BigInt,
}

/// Paid and parked totals of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoBalances {
    pub paid: BTreeMap<Currency, BigInt>,
    pub parked: BTreeMap<Currency, BigInt>,
}

/// Counts shown by `ffs status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub users: i64,
    pub repos: i64,
    pub open_sponsors: i64,
    pub trusted_repos: i64,
    pub open_multipliers: i64,
    pub daily_contributions: i64,
    pub pending_analyses: i64,
    pub last_settled_day: Option<String>,
}

const PAY_IN_COLUMNS: &str =
    "id, external_id, user_id, balance, currency, status, seats, freq, created_at";

type PayInRow = (i64, String, String, String, String, String, i64, i64, String);

fn pay_in_row(row: &Row<'_>) -> rusqlite::Result<PayInRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_pay_in(
    (id, external_id, user_id, balance, currency, status, seats, freq, created_at): PayInRow,
) -> Result<PayInRecord, DbError> {
    let context = format!("pay_in_event {id}");
    Ok(PayInRecord {
        id,
        external_id,
        user_id: UserId::new(user_id)?,
        balance: parse_amount(&balance, &context)?,
        currency: Currency::new(currency)?,
        status: status.parse()?,
        seats,
        freq,
        created_at: parse_timestamp(&created_at, &context)?,
    })
}

impl Database {
    /// Inserts a user account.
    pub fn insert_user(
        &self,
        id: &UserId,
        email: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)",
            params![id.as_str(), email, format_timestamp(created_at)],
        )?;
        Ok(())
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, email, invited_by, payment_method, multiplier,
                       multiplier_daily_limit, created_at
                FROM users WHERE id = ?
                ",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, email, invited_by, payment_method, multiplier, limit, created_at)) = row
        else {
            return Ok(None);
        };
        let context = format!("users {id}");
        Ok(Some(UserRecord {
            multiplier_daily_limit: parse_amount(&limit, &context)?,
            created_at: parse_timestamp(&created_at, &context)?,
            id: UserId::new(id)?,
            email,
            invited_by: invited_by.map(UserId::new).transpose()?,
            payment_method,
            multiplier,
        }))
    }

    /// Loads a user or fails with [`DbError::NotFound`].
    pub fn require_user(&self, id: &UserId) -> Result<UserRecord, DbError> {
        self.find_user(id)?.ok_or_else(|| DbError::NotFound {
            entity: "user",
            id: id.to_string(),
        })
    }

    /// Records that `inviter` pays for `user`'s sponsorships.
    pub fn set_invited_by(&self, user: &UserId, inviter: Option<&UserId>) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE users SET invited_by = ? WHERE id = ?",
            params![inviter.map(UserId::as_str), user.as_str()],
        )?;
        expect_one(updated, "user", user.as_str())
    }

    pub fn set_payment_method(&self, user: &UserId, method: Option<&str>) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE users SET payment_method = ? WHERE id = ?",
            params![method, user.as_str()],
        )?;
        expect_one(updated, "user", user.as_str())
    }

    /// Turns a user into a foundation (or back) with a per-day spending cap.
    pub fn set_multiplier(
        &self,
        user: &UserId,
        enabled: bool,
        daily_limit: &BigInt,
    ) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE users SET multiplier = ?, multiplier_daily_limit = ? WHERE id = ?",
            params![enabled, daily_limit.to_string(), user.as_str()],
        )?;
        expect_one(updated, "user", user.as_str())
    }

    /// Inserts a pay-in row of any status.
    pub fn insert_pay_in(&self, pay_in: &NewPayIn) -> Result<i64, DbError> {
        self.conn.execute(
            "
            INSERT INTO pay_in_event
            (external_id, user_id, balance, currency, status, seats, freq, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                pay_in.external_id,
                pay_in.user_id.as_str(),
                pay_in.balance.to_string(),
                pay_in.currency.as_str(),
                pay_in.status.as_str(),
                pay_in.seats,
                pay_in.freq,
                format_timestamp(pay_in.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Confirms a requested payment, writing its SUCCESS and FEE rows together.
    ///
    /// Returns the id of the SUCCESS row.
    pub fn confirm_payment(
        &self,
        external_id: &str,
        fee: &BigInt,
        now: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let request = tx
            .query_row(
                &format!(
                    "SELECT {PAY_IN_COLUMNS} FROM pay_in_event WHERE external_id = ? AND status = ?"
                ),
                params![external_id, PayInStatus::Request.as_str()],
                pay_in_row,
            )
            .optional()?
            .map(into_pay_in)
            .transpose()?
            .ok_or_else(|| DbError::NotFound {
                entity: "payment request",
                id: external_id.to_string(),
            })?;

        if fee.is_negative() || *fee > request.balance {
            return Err(DbError::FeeExceedsAmount {
                external_id: external_id.to_string(),
                fee: fee.to_string(),
                amount: request.balance.to_string(),
            });
        }

        let net = &request.balance - fee;
        let mut success_id = 0;
        for (status, amount) in [(PayInStatus::Success, &net), (PayInStatus::Fee, fee)] {
            let inserted = tx.execute(
                "
                INSERT INTO pay_in_event
                (external_id, user_id, balance, currency, status, seats, freq, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    external_id,
                    request.user_id.as_str(),
                    amount.to_string(),
                    request.currency.as_str(),
                    status.as_str(),
                    request.seats,
                    request.freq,
                    format_timestamp(now),
                ],
            );
            match inserted {
                Ok(_) if status == PayInStatus::Success => success_id = tx.last_insert_rowid(),
                Ok(_) => {}
                Err(err) if is_constraint_violation(&err) => {
                    return Err(DbError::PaymentAlreadyConfirmed {
                        external_id: external_id.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        tx.commit()?;

        tracing::info!(
            external_id,
            user = %request.user_id,
            currency = %request.currency,
            net = %net,
            fee = %fee,
            "confirmed payment"
        );
        Ok(success_id)
    }

    /// Sum of SUCCESS pay-ins per currency.
    pub fn lifetime_success(&self, user: &UserId) -> Result<BTreeMap<Currency, BigInt>, DbError> {
        sum_by_currency(
            &self.conn,
            "SELECT currency, balance FROM pay_in_event WHERE user_id = ? AND status = ?",
            params![user.as_str(), PayInStatus::Success.as_str()],
            "pay_in_event",
        )
    }

    /// The most recent SUCCESS pay-in in `currency`.
    pub fn latest_success(
        &self,
        user: &UserId,
        currency: &Currency,
    ) -> Result<Option<PayInRecord>, DbError> {
        self.conn
            .query_row(
                &format!(
                    "
                    SELECT {PAY_IN_COLUMNS} FROM pay_in_event
                    WHERE user_id = ? AND currency = ? AND status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "
                ),
                params![
                    user.as_str(),
                    currency.as_str(),
                    PayInStatus::Success.as_str()
                ],
                pay_in_row,
            )
            .optional()?
            .map(into_pay_in)
            .transpose()
    }

    /// The most recent SUCCESS pay-in in any currency.
    pub fn latest_success_any(&self, user: &UserId) -> Result<Option<PayInRecord>, DbError> {
        self.conn
            .query_row(
                &format!(
                    "
                    SELECT {PAY_IN_COLUMNS} FROM pay_in_event
                    WHERE user_id = ? AND status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "
                ),
                params![user.as_str(), PayInStatus::Success.as_str()],
                pay_in_row,
            )
            .optional()?
            .map(into_pay_in)
            .transpose()
    }

    /// Daily contributions funded by `payer`, per currency.
    pub fn committed_by_payer(
        &self,
        payer: &UserId,
    ) -> Result<BTreeMap<Currency, BigInt>, DbError> {
        sum_by_currency(
            &self.conn,
            "SELECT currency, amount FROM daily_contribution WHERE payer_id = ?",
            params![payer.as_str()],
            "daily_contribution",
        )
    }

    /// Future contributions parked or consumed by `subject`, per currency.
    pub fn promised_by_subject(
        &self,
        subject: &UserId,
    ) -> Result<BTreeMap<Currency, BigInt>, DbError> {
        sum_by_currency(
            &self.conn,
            "SELECT currency, amount FROM future_contribution WHERE subject_id = ?",
            params![subject.as_str()],
            "future_contribution",
        )
    }

    /// Parked sponsor credit still available to `subject` in `currency`.
    pub fn future_credit(&self, subject: &UserId, currency: &Currency) -> Result<BigInt, DbError> {
        let sums = sum_by_currency(
            &self.conn,
            "
            SELECT currency, amount FROM future_contribution
            WHERE subject_id = ? AND currency = ? AND foundation_payment = 0
            ",
            params![subject.as_str(), currency.as_str()],
            "future_contribution",
        )?;
        Ok(sums.get(currency).cloned().unwrap_or_default())
    }

    /// Money `foundation` parked for `repo` that no contributor received yet.
    pub(crate) fn foundation_credit(
        &self,
        foundation: &UserId,
        repo: &RepoId,
        currency: &Currency,
    ) -> Result<BigInt, DbError> {
        let sums = sum_by_currency(
            &self.conn,
            "
            SELECT currency, amount FROM future_contribution
            WHERE subject_id = ? AND repo_id = ? AND currency = ? AND foundation_payment = 1
            ",
            params![foundation.as_str(), repo.as_str(), currency.as_str()],
            "future_contribution",
        )?;
        Ok(sums.get(currency).cloned().unwrap_or_default())
    }

    /// Everything the allocation strategy needs, read from committed rows.
    pub fn currency_positions(
        &self,
        payer: &UserId,
    ) -> Result<BTreeMap<Currency, CurrencyPosition>, DbError> {
        let lifetime = self.lifetime_success(payer)?;
        let committed = self.committed_by_payer(payer)?;
        let promised = self.promised_by_subject(payer)?;

        let mut positions = BTreeMap::new();
        for (currency, lifetime_success) in lifetime {
            let latest = self
                .latest_success(payer, &currency)?
                .map(|pay_in| LatestPayIn {
                    balance: pay_in.balance,
                    seats: pay_in.seats,
                    freq: pay_in.freq,
                });
            let position = CurrencyPosition {
                lifetime_success,
                committed: committed.get(&currency).cloned().unwrap_or_default(),
                promised_future: promised.get(&currency).cloned().unwrap_or_default(),
                latest,
            };
            positions.insert(currency, position);
        }
        Ok(positions)
    }

    /// Spending tagged as foundation payment by `foundation` on `day`.
    pub(crate) fn foundation_spent_on(
        &self,
        foundation: &UserId,
        currency: &Currency,
        day: &SettlementDay,
    ) -> Result<BigInt, DbError> {
        let sums = sum_by_currency(
            &self.conn,
            "
            SELECT currency, amount FROM daily_contribution
            WHERE payer_id = ?1 AND currency = ?2 AND day = ?3 AND foundation_payment = 1
            UNION ALL
            SELECT currency, amount FROM future_contribution
            WHERE subject_id = ?1 AND currency = ?2 AND day = ?3 AND foundation_payment = 1
            ",
            params![foundation.as_str(), currency.as_str(), day.label()],
            "foundation spending",
        )?;
        Ok(sums.get(currency).cloned().unwrap_or_default())
    }

    /// Inserts one settled contribution. Duplicates are rejected by the
    /// table's unique key.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_daily_contribution(
        &self,
        payer: &UserId,
        sponsor: &UserId,
        contributor: &UserId,
        repo: &RepoId,
        currency: &Currency,
        amount: &BigInt,
        day: &SettlementDay,
        foundation_payment: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO daily_contribution
            (payer_id, sponsor_id, contributor_id, repo_id, currency, amount, day,
             foundation_payment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                payer.as_str(),
                sponsor.as_str(),
                contributor.as_str(),
                repo.as_str(),
                currency.as_str(),
                amount.to_string(),
                day.label(),
                foundation_payment,
                format_timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Adds `amount` to the future row for the key, creating it if needed.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_future_contribution(
        &self,
        subject: &UserId,
        repo: &RepoId,
        currency: &Currency,
        amount: &BigInt,
        day: &SettlementDay,
        foundation_payment: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "
                SELECT amount FROM future_contribution
                WHERE subject_id = ? AND repo_id = ? AND currency = ? AND day = ?
                  AND foundation_payment = ?
                ",
                params![
                    subject.as_str(),
                    repo.as_str(),
                    currency.as_str(),
                    day.label(),
                    foundation_payment
                ],
                |row| row.get(0),
            )
            .optional()?;
        let total = match existing {
            Some(value) => parse_amount(&value, "future_contribution")? + amount,
            None => amount.clone(),
        };
        self.conn.execute(
            "
            INSERT INTO future_contribution
            (subject_id, repo_id, currency, amount, day, foundation_payment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subject_id, repo_id, currency, day, foundation_payment)
            DO UPDATE SET amount = excluded.amount
            ",
            params![
                subject.as_str(),
                repo.as_str(),
                currency.as_str(),
                total.to_string(),
                day.label(),
                foundation_payment,
                format_timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Overwrites the would-have-earned balance for an unlinked email.
    pub(crate) fn upsert_unclaimed(
        &self,
        email: &str,
        repo: &RepoId,
        currency: &Currency,
        balance: &BigInt,
        day: &SettlementDay,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO unclaimed (email, repo_id, currency, balance, day, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(email, repo_id, currency)
            DO UPDATE SET balance = excluded.balance, day = excluded.day,
                          created_at = excluded.created_at
            ",
            params![
                email,
                repo.as_str(),
                currency.as_str(),
                balance.to_string(),
                day.label(),
                format_timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Daily contributions received by `contributor`, newest first.
    pub fn contributions_for(
        &self,
        contributor: &UserId,
    ) -> Result<Vec<DailyContributionRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, payer_id, sponsor_id, contributor_id, repo_id, currency, amount, day,
                   foundation_payment, claimed_at
            FROM daily_contribution
            WHERE contributor_id = ?
            ORDER BY day DESC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![contributor.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, bool>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (id, payer, sponsor, contributor, repo, currency, amount, day, foundation, claimed) =
                row?;
            let context = format!("daily_contribution {id}");
            records.push(DailyContributionRecord {
                id,
                payer: UserId::new(payer)?,
                sponsor: UserId::new(sponsor)?,
                contributor: UserId::new(contributor)?,
                repo: RepoId::new(repo)?,
                currency: Currency::new(currency)?,
                amount: parse_amount(&amount, &context)?,
                day,
                foundation_payment: foundation,
                claimed_at: parse_optional_timestamp(claimed, &context)?,
            });
        }
        Ok(records)
    }

    /// Contributions not yet claimed by `contributor` in `currency`.
    pub fn unclaimed_contributions(
        &self,
        contributor: &UserId,
        currency: &Currency,
    ) -> Result<ClaimableContributions, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, amount FROM daily_contribution
            WHERE contributor_id = ? AND currency = ? AND claimed_at IS NULL
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map(params![contributor.as_str(), currency.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut claimable = ClaimableContributions {
            ids: Vec::new(),
            total: BigInt::zero(),
        };
        for row in rows {
            let (id, amount) = row?;
            claimable.total += parse_amount(&amount, "daily_contribution")?;
            claimable.ids.push(id);
        }
        Ok(claimable)
    }

    /// Marks contributions claimed; fails unless every id was still open.
    pub fn mark_claimed(&self, ids: &[i64], now: DateTime<Utc>) -> Result<(), DbError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let claimed_at = format_timestamp(now);
        let mut claimed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE daily_contribution SET claimed_at = ? WHERE id = ? AND claimed_at IS NULL",
            )?;
            for id in ids {
                claimed += stmt.execute(params![claimed_at, id])?;
            }
        }
        if claimed != ids.len() {
            return Err(DbError::ClaimConflict {
                expected: ids.len(),
                claimed,
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Daily contributions received by `user`, per currency.
    pub fn contributor_earnings(
        &self,
        user: &UserId,
    ) -> Result<BTreeMap<Currency, BigInt>, DbError> {
        sum_by_currency(
            &self.conn,
            "SELECT currency, amount FROM daily_contribution WHERE contributor_id = ?",
            params![user.as_str()],
            "daily_contribution",
        )
    }

    /// Everything `user` has paid out, daily and parked, per currency.
    pub fn sponsor_spending(&self, user: &UserId) -> Result<BTreeMap<Currency, BigInt>, DbError> {
        sum_by_currency(
            &self.conn,
            "
            SELECT currency, amount FROM daily_contribution WHERE payer_id = ?1
            UNION ALL
            SELECT currency, amount FROM future_contribution WHERE subject_id = ?1
            ",
            params![user.as_str()],
            "sponsor spending",
        )
    }

    /// Money paid to a repository's contributors and money parked for it.
    pub fn repo_balances(&self, repo: &RepoId) -> Result<RepoBalances, DbError> {
        Ok(RepoBalances {
            paid: sum_by_currency(
                &self.conn,
                "SELECT currency, amount FROM daily_contribution WHERE repo_id = ?",
                params![repo.as_str()],
                "daily_contribution",
            )?,
            parked: sum_by_currency(
                &self.conn,
                "SELECT currency, amount FROM future_contribution WHERE repo_id = ?",
                params![repo.as_str()],
                "future_contribution",
            )?,
        })
    }

    /// Row counts for `ffs status`.
    pub fn status_summary(&self) -> Result<StatusSummary, DbError> {
        let count = |sql: &str| -> Result<i64, DbError> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        let open = |kind: RelationshipKind| -> Result<i64, DbError> {
            Ok(self.conn.query_row(
                "SELECT COUNT(*) FROM relationship_event WHERE kind = ? AND deactivated_at IS NULL",
                params![kind.as_str()],
                |row| row.get(0),
            )?)
        };
        Ok(StatusSummary {
            users: count("SELECT COUNT(*) FROM users")?,
            repos: count("SELECT COUNT(*) FROM repos")?,
            open_sponsors: open(RelationshipKind::Sponsor)?,
            trusted_repos: open(RelationshipKind::Trust)?,
            open_multipliers: open(RelationshipKind::Multiplier)?,
            daily_contributions: count("SELECT COUNT(*) FROM daily_contribution")?,
            pending_analyses: count(
                "SELECT COUNT(*) FROM analysis_request WHERE received_at IS NULL",
            )?,
            last_settled_day: self.conn.query_row(
                "SELECT MAX(day) FROM settlement_run WHERE finished_at IS NOT NULL",
                [],
                |row| row.get(0),
            )?,
        })
    }
}

fn expect_one(updated: usize, entity: &'static str, id: &str) -> Result<(), DbError> {
    if updated == 1 {
        Ok(())
    } else {
        Err(DbError::NotFound {
            entity,
            id: id.to_string(),
        })
    }
}
