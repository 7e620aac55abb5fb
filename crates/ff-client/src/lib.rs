//! HTTP clients for the services around the settlement engine.
//!
//! - [`NotificationClient`] delivers mail through the notification provider,
//!   fed by a [`NotificationQueue`] and drained by one [`Dispatcher`]
//! - [`AnalysisClient`] asks the analysis engine for contributor weights
//! - [`PayoutClient`] obtains signed payouts for claimed balances
//! - [`PaymentClient`] triggers recurring charges on stored payment methods

use std::time::Duration;

use thiserror::Error;

mod analysis;
pub mod messages;
mod notify;
mod payment;
mod payout;

pub use analysis::{AnalysisClient, AnalysisRequestBody};
pub use messages::{Email, MessageSettings, Notice, outreach_notice, top_up_notices};
pub use notify::{Dispatcher, NotificationClient, NotificationQueue};
pub use payment::{PaymentClient, RecurringCharge};
pub use payout::{PayoutClient, SignedPayout};

/// Errors talking to external services.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed or timed out.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    /// Failed to parse response.
    #[error("invalid response from {service}: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
    /// No URL is configured for the service.
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },
}

/// Builds the shared HTTP client with a bound on every call.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ClientError::ClientBuild)
}

/// Turns a non-success response into [`ClientError::Status`].
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

/// Base URL with any trailing slash removed.
pub(crate) fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
