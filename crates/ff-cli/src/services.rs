//! Clients for the external services, built from configuration.

use anyhow::{Context, Result};
use ff_client::{AnalysisClient, MessageSettings, NotificationClient, PaymentClient, PayoutClient};

use crate::Config;

/// Everything the jobs and commands talk to besides the database.
#[derive(Debug, Clone)]
pub struct Services {
    pub notifications: NotificationClient,
    pub analysis: AnalysisClient,
    pub payout: PayoutClient,
    pub payment: PaymentClient,
    pub messages: MessageSettings,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.http_timeout();
        Ok(Self {
            notifications: NotificationClient::new(
                config.notification_url.clone(),
                config.notification_token.clone(),
                timeout,
            )
            .context("failed to build notification client")?,
            analysis: AnalysisClient::new(config.analysis_url.clone(), timeout)
                .context("failed to build analysis client")?,
            payout: PayoutClient::new(
                config.payout_url.clone(),
                config.payout_username.clone(),
                config.payout_password.clone(),
                timeout,
            )
            .context("failed to build payout client")?,
            payment: PaymentClient::new(
                config.payment_url.clone(),
                config.payment_token.clone(),
                timeout,
            )
            .context("failed to build payment client")?,
            messages: config.message_settings(),
        })
    }
}
