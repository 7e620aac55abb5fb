//! Contribution-analysis engine client.
//!
//! Requests are fire-and-forget: the engine answers later through the
//! analysis callback, which is recorded with `ffs analysis ingest`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ClientError, base_url, check_status, http_client};

const SERVICE: &str = "analysis engine";

/// Body of `POST {analysis_url}/analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequestBody {
    pub req_id: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub git_url: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    url: Option<String>,
}

impl AnalysisClient {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
        })
    }

    pub const fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    pub async fn request_analysis(&self, body: &AnalysisRequestBody) -> Result<(), ClientError> {
        let url = self
            .url
            .as_deref()
            .ok_or(ClientError::NotConfigured { service: SERVICE })?;
        let response = self
            .http
            .post(format!("{}/analyze", base_url(url)))
            .json(body)
            .send()
            .await?;
        check_status(SERVICE, response).await?;
        tracing::info!(req_id = %body.req_id, git_url = %body.git_url, "analysis requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{body, serve_once};

    fn request() -> AnalysisRequestBody {
        AnalysisRequestBody {
            req_id: "req-1".to_string(),
            date_from: DateTime::parse_from_rfc3339("2024-10-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            date_to: DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            git_url: "https://git.example/repo-1".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_request_to_analyze_endpoint() {
        let (url, server) = serve_once(200, r#"{"request_id":"req-1"}"#).await;
        let client = AnalysisClient::new(Some(format!("{url}/")), Duration::from_secs(5)).unwrap();

        client.request_analysis(&request()).await.unwrap();

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /analyze "));
        let payload: serde_json::Value = serde_json::from_str(body(&raw)).unwrap();
        assert_eq!(payload["reqId"], "req-1");
        assert_eq!(payload["gitUrl"], "https://git.example/repo-1");
        assert_eq!(payload["dateTo"], "2025-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn engine_error_status_is_reported() {
        let (url, server) = serve_once(503, "busy").await;
        let client = AnalysisClient::new(Some(url), Duration::from_secs(5)).unwrap();

        let err = client.request_analysis(&request()).await.unwrap_err();

        assert!(matches!(err, ClientError::Status { status: 503, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_url_is_not_configured() {
        let client = AnalysisClient::new(None, Duration::from_secs(5)).unwrap();
        let err = client.request_analysis(&request()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConfigured { .. }));
    }
}
