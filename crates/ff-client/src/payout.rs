//! Payout signer client.
//!
//! Amounts travel as bare JSON numbers of arbitrary size, so they are
//! written and read through [`RawValue`] instead of a fixed-width integer.

use std::fmt;
use std::time::Duration;

use ff_core::{BigInt, Currency, UserId};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{ClientError, base_url, check_status, http_client};

const SERVICE: &str = "payout signer";

/// A payout the signer has authorised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayout {
    pub amount: BigInt,
    pub currency: String,
    pub encoded_user_id: String,
    pub signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutRequest<'a> {
    amount: Box<RawValue>,
    user_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutResponse {
    amount: Box<RawValue>,
    currency: String,
    encoded_user_id: String,
    signature: String,
}

#[derive(Clone)]
pub struct PayoutClient {
    http: reqwest::Client,
    url: Option<String>,
    username: String,
    password: Option<String>,
}

impl fmt::Debug for PayoutClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayoutClient")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl PayoutClient {
    pub fn new(
        url: Option<String>,
        username: String,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
            username,
            password,
        })
    }

    /// Asks the signer to authorise paying `amount` of `currency` to `user`.
    pub async fn request_payout(
        &self,
        user: &UserId,
        amount: &BigInt,
        currency: &Currency,
    ) -> Result<SignedPayout, ClientError> {
        let url = self
            .url
            .as_deref()
            .ok_or(ClientError::NotConfigured { service: SERVICE })?;
        let amount = RawValue::from_string(amount.to_string()).map_err(|err| {
            ClientError::InvalidResponse {
                service: SERVICE,
                reason: err.to_string(),
            }
        })?;
        let response = self
            .http
            .post(format!(
                "{}/admin/sign/{}",
                base_url(url),
                currency.as_str().to_lowercase()
            ))
            .basic_auth(&self.username, self.password.as_deref())
            .json(&PayoutRequest {
                amount,
                user_id: user.as_str(),
            })
            .send()
            .await?;
        let text = check_status(SERVICE, response).await?.text().await?;
        let payload: PayoutResponse =
            serde_json::from_str(&text).map_err(|err| ClientError::InvalidResponse {
                service: SERVICE,
                reason: err.to_string(),
            })?;
        let signed = SignedPayout {
            amount: parse_raw_amount(&payload.amount)?,
            currency: payload.currency,
            encoded_user_id: payload.encoded_user_id,
            signature: payload.signature,
        };
        tracing::info!(user = %user, amount = %signed.amount, currency = %currency, "payout signed");
        Ok(signed)
    }
}

/// Accepts both a bare number and a quoted decimal string.
fn parse_raw_amount(raw: &RawValue) -> Result<BigInt, ClientError> {
    let text = raw.get().trim().trim_matches('"');
    text.parse().map_err(|_| ClientError::InvalidResponse {
        service: SERVICE,
        reason: format!("amount is not an integer: {}", raw.get()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{body, serve_once};

    fn client(url: String) -> PayoutClient {
        PayoutClient::new(
            Some(url),
            "admin".to_string(),
            Some("pw".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn signs_amounts_beyond_u64() {
        let (url, server) = serve_once(
            200,
            r#"{"amount":123456789012345678901234567890,"currency":"USDC","encodedUserId":"0xabc","signature":"0xsig"}"#,
        )
        .await;
        let amount: BigInt = "123456789012345678901234567890".parse().unwrap();

        let signed = client(url)
            .request_payout(
                &UserId::new("bob").unwrap(),
                &amount,
                &Currency::new("USDC").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(signed.amount, amount);
        assert_eq!(signed.signature, "0xsig");
        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /admin/sign/usdc "));
        assert!(raw.to_lowercase().contains("authorization: basic "));
        assert_eq!(
            body(&raw),
            r#"{"amount":123456789012345678901234567890,"userId":"bob"}"#
        );
    }

    #[tokio::test]
    async fn malformed_response_is_rejected() {
        let (url, server) = serve_once(200, r#"{"amount":"abc","currency":"USD","encodedUserId":"x","signature":"y"}"#).await;
        let err = client(url)
            .request_payout(
                &UserId::new("bob").unwrap(),
                &BigInt::from(1),
                &Currency::new("USD").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
        server.await.unwrap();
    }

    #[test]
    fn debug_redacts_password() {
        let debug = format!("{:?}", client("http://localhost".to_string()));
        assert!(!debug.contains("\"pw\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
