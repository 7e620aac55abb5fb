//! Mail bodies for top-up reminders and unclaimed-balance outreach.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use ff_core::{BigInt, Currency, Outreach, RepoId, TopUpChannel, TopUpReminder, UserId};
use serde::Serialize;

/// A message as the notification provider expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub mail_to: String,
    pub subject: String,
    pub text_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
}

/// A message together with its sent-log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Sent-log key; the message goes out only if this key is new.
    pub key: String,
    /// The address the notice is about, before any redirect.
    pub email: String,
    pub user: Option<UserId>,
    pub kind: &'static str,
    pub message: Email,
}

/// Environment-dependent parts of every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSettings {
    /// Prefix of links placed in message bodies.
    pub link_prefix: String,
    /// Receives all outreach mail instead of the contributor when set.
    pub redirect: Option<String>,
    pub outreach_interval_secs: u64,
}

impl MessageSettings {
    fn payments_url(&self) -> String {
        format!("{}/user/payments", self.link_prefix.trim_end_matches('/'))
    }
}

/// Messages for one top-up reminder.
///
/// The payer is always told; when the payer funds an invitee, the invitee
/// hears about it as well.
pub fn top_up_notices(reminder: &TopUpReminder, settings: &MessageSettings) -> Vec<Notice> {
    let url = settings.payments_url();
    let key = reminder.dedup_key();
    let (kind, subject, text_body) = match (reminder.channel, &reminder.invitee_email) {
        (TopUpChannel::RecurringCharge, _) => (
            "topup-recurring",
            "We are about to top up your account".to_string(),
            format!("Thanks for supporting open source. Manage your payments at {url}"),
        ),
        (TopUpChannel::Email, Some(invitee)) => (
            "topup-sponsor",
            "Your invited users could not sponsor anymore".to_string(),
            format!("{invitee} could not be funded. Please add funds at {url}"),
        ),
        (TopUpChannel::Email, None) => (
            "topup-own",
            "You are running low on funding".to_string(),
            format!(
                "{} day(s) of sponsoring left. Please add funds at {url}",
                reminder.days_left
            ),
        ),
    };

    let mut notices = vec![Notice {
        key: key.clone(),
        email: reminder.payer_email.clone(),
        user: Some(reminder.payer.clone()),
        kind,
        message: Email {
            mail_to: reminder.payer_email.clone(),
            subject,
            text_body,
            html_body: None,
        },
    }];

    if let (Some(invitee), Some(invitee_email)) = (&reminder.invitee, &reminder.invitee_email) {
        notices.push(Notice {
            key: format!("{key}:{invitee}"),
            email: invitee_email.clone(),
            user: Some(invitee.clone()),
            kind: "topup-invited",
            message: Email {
                mail_to: invitee_email.clone(),
                subject: format!("{} (and you) are running low on funds", reminder.payer_email),
                text_body: format!("Please ask your sponsor to add funds at {url}"),
                html_body: None,
            },
        });
    }
    notices
}

/// The weekly mail telling an unlinked git email about its balance.
pub fn outreach_notice(
    outreach: &Outreach,
    now: chrono::DateTime<chrono::Utc>,
    settings: &MessageSettings,
) -> Notice {
    let repos = render_repos(&outreach.repos);
    Notice {
        key: outreach.dedup_key(now, settings.outreach_interval_secs),
        email: outreach.email.clone(),
        user: None,
        kind: "marketing",
        message: Email {
            mail_to: settings
                .redirect
                .clone()
                .unwrap_or_else(|| outreach.email.clone()),
            subject: format!("Someone likes your contribution to {repos}"),
            text_body: format!(
                "Thanks for building and maintaining {repos}. Someone sponsored you with {}.\nGo to {} and claim your support!",
                render_balances(&outreach.balances),
                settings.link_prefix
            ),
            html_body: None,
        },
    }
}

fn render_repos(repos: &[RepoId]) -> String {
    repos
        .iter()
        .map(RepoId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_balances(balances: &BTreeMap<Currency, BigInt>) -> String {
    let mut out = String::new();
    for (currency, amount) in balances {
        if !out.is_empty() {
            out.push_str(", ");
        }
        let _ = write!(out, "{amount} {currency}");
    }
    out
}
