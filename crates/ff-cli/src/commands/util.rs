//! Shared argument parsing for CLI commands.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ff_core::{BigInt, Currency, RepoId, UserId};

/// Parses an optional RFC 3339 timestamp, falling back to `now`.
pub fn parse_at(at: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let Some(at) = at else {
        return Ok(now);
    };
    DateTime::parse_from_rfc3339(at)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {at}. Use RFC 3339, e.g. 2025-01-01T00:00:00Z"))
}

pub fn user_id(id: &str) -> Result<UserId> {
    UserId::new(id).with_context(|| format!("invalid user id: {id:?}"))
}

pub fn repo_id(id: &str) -> Result<RepoId> {
    RepoId::new(id).with_context(|| format!("invalid repository id: {id:?}"))
}

pub fn currency(code: &str) -> Result<Currency> {
    Currency::new(code).with_context(|| format!("invalid currency: {code:?}"))
}

pub fn amount(value: &str) -> Result<BigInt> {
    ff_core::money::parse_amount(value).with_context(|| format!("invalid amount: {value:?}"))
}

/// Writes `- CODE: amount` lines, or `(none)`.
pub fn write_amounts<W: Write>(writer: &mut W, amounts: &BTreeMap<Currency, BigInt>) -> Result<()> {
    if amounts.is_empty() {
        writeln!(writer, "  (none)")?;
    }
    for (currency, amount) in amounts {
        writeln!(writer, "  - {currency}: {amount}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_at_defaults_to_now() {
        let now = Utc::now();
        assert_eq!(parse_at(None, now).unwrap(), now);
    }

    #[test]
    fn parse_at_accepts_offsets() {
        let parsed = parse_at(Some("2025-01-01T02:00:00+02:00"), Utc::now()).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn parse_at_rejects_garbage() {
        let err = parse_at(Some("yesterday"), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn amounts_reject_fractions() {
        assert!(amount("12.5").is_err());
        assert_eq!(amount("125468750").unwrap(), BigInt::from(125_468_750));
    }
}
