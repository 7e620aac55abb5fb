//! Payment provider client for off-session recurring charges.

use std::fmt;
use std::time::Duration;

use ff_core::{Currency, UserId};
use serde::Serialize;

use crate::{ClientError, base_url, check_status, http_client};

const SERVICE: &str = "payment provider";

/// A charge against a stored payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringCharge {
    pub user_id: UserId,
    pub payment_method: String,
    /// Currency of the plan being renewed, if the payer had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
}

#[derive(Clone)]
pub struct PaymentClient {
    http: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
}

impl fmt::Debug for PaymentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentClient")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl PaymentClient {
    pub fn new(
        url: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
            token,
        })
    }

    pub const fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Starts a recurring charge. The provider confirms it later through
    /// the payment webhook, recorded with `ffs payin confirm`.
    pub async fn charge_recurring(&self, charge: &RecurringCharge) -> Result<(), ClientError> {
        let url = self
            .url
            .as_deref()
            .ok_or(ClientError::NotConfigured { service: SERVICE })?;
        let mut request = self
            .http
            .post(format!("{}/recurring", base_url(url)))
            .json(charge);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        check_status(SERVICE, request.send().await?).await?;
        tracing::info!(user = %charge.user_id, "recurring charge started");
        Ok(())
    }
}
