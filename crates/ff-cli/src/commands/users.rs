//! Account management: users, invitations, payment methods, foundations.

use std::io::Write;

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use ff_db::Database;
use num_traits::Signed;

use super::util::{amount, user_id};

pub fn add<W: Write>(writer: &mut W, db: &Database, id: &str, email: &str, now: DateTime<Utc>) -> Result<()> {
    let user = user_id(id)?;
    ensure!(email.contains('@'), "invalid email: {email:?}");
    db.insert_user(&user, email, now)
        .with_context(|| format!("failed to add user {user}"))?;
    writeln!(writer, "Added user {user} <{email}>")?;
    Ok(())
}

/// Sets or clears the user who pays for `user`'s sponsorships.
pub fn invite<W: Write>(writer: &mut W, db: &Database, user: &str, by: Option<&str>) -> Result<()> {
    let user = user_id(user)?;
    let inviter = by.map(user_id).transpose()?;
    if let Some(inviter) = &inviter {
        ensure!(*inviter != user, "a user cannot invite themselves");
        db.require_user(inviter)?;
    }
    db.set_invited_by(&user, inviter.as_ref())?;
    match inviter {
        Some(inviter) => writeln!(writer, "{inviter} now pays for {user}")?,
        None => writeln!(writer, "{user} pays for their own sponsorships")?,
    }
    Ok(())
}

pub fn payment_method<W: Write>(
    writer: &mut W,
    db: &Database,
    user: &str,
    method: Option<&str>,
) -> Result<()> {
    let user = user_id(user)?;
    db.set_payment_method(&user, method)?;
    match method {
        Some(_) => writeln!(writer, "Stored payment method for {user}")?,
        None => writeln!(writer, "Cleared payment method for {user}")?,
    }
    Ok(())
}

pub fn multiplier<W: Write>(
    writer: &mut W,
    db: &Database,
    user: &str,
    daily_limit: &str,
    disable: bool,
) -> Result<()> {
    let user = user_id(user)?;
    let limit = amount(daily_limit)?;
    ensure!(!limit.is_negative(), "daily limit must not be negative");
    db.set_multiplier(&user, !disable, &limit)?;
    if disable {
        writeln!(writer, "{user} is no longer a foundation")?;
    } else {
        writeln!(writer, "{user} is a foundation with daily limit {limit}")?;
    }
    Ok(())
}
