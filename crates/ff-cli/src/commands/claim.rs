//! Contributor payout of unclaimed earnings.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use ff_db::Database;

use super::util::{currency, user_id};
use crate::Services;

/// Signs a payout for everything `user` has not claimed in `currency`, then
/// marks those contributions claimed.
pub async fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    user: &str,
    currency_code: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let user = user_id(user)?;
    let currency = currency(currency_code)?;
    db.require_user(&user)?;

    let claimable = db.unclaimed_contributions(&user, &currency)?;
    if claimable.ids.is_empty() {
        bail!("{user} has nothing to claim in {currency}");
    }

    let signed = services
        .payout
        .request_payout(&user, &claimable.total, &currency)
        .await
        .context("payout signer refused the claim")?;
    db.mark_claimed(&claimable.ids, now)
        .context("contributions changed while claiming")?;

    tracing::info!(user = %user, currency = %currency, amount = %claimable.total, rows = claimable.ids.len(), "claimed");
    writeln!(
        writer,
        "Claimed {} {currency} for {user} from {} contribution(s)",
        claimable.total,
        claimable.ids.len()
    )?;
    writeln!(writer, "Signature: {}", signed.signature)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use ff_core::UserId;

    #[tokio::test]
    async fn nothing_to_claim_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user(&UserId::new("bob").unwrap(), "bob@example.com", Utc::now())
            .unwrap();
        let services = Services::from_config(&Config::default()).unwrap();
        let mut out = Vec::new();

        let err = run(&mut out, &db, &services, "bob", "USD", Utc::now())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "bob has nothing to claim in USD");
    }
}
