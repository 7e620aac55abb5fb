//! Analysis callbacks and the hourly analysis refresh.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Months, TimeDelta, Utc};
use ff_client::{AnalysisClient, AnalysisRequestBody};
use ff_core::AnalysisEntry;
use ff_db::{Database, NewAnalysisRequest};
use serde::Deserialize;

/// How far back each analysis looks.
const ANALYSIS_WINDOW_MONTHS: u32 = 3;

/// The analysis engine's callback payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisCallback {
    #[serde(alias = "request_id")]
    request_id: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Vec<AnalysisEntry>,
}

/// Records a callback read from `path`.
pub fn ingest<W: Write>(writer: &mut W, db: &Database, path: &Path, now: DateTime<Utc>) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let callback: AnalysisCallback = serde_json::from_str(&text)
        .with_context(|| format!("invalid analysis callback in {}", path.display()))?;
    let error = callback.error.as_deref().filter(|e| !e.is_empty());

    db.record_analysis_result(&callback.request_id, error, &callback.result, now)
        .with_context(|| format!("cannot record analysis {}", callback.request_id))?;

    match error {
        Some(error) => writeln!(writer, "Analysis {} failed: {error}", callback.request_id)?,
        None => writeln!(
            writer,
            "Recorded {} contributor(s) for analysis {}",
            callback.result.len(),
            callback.request_id
        )?,
    }
    Ok(())
}

/// Requests a fresh analysis for every repository whose latest one ended
/// more than a day before `now`. Returns the number of requests sent.
///
/// A failed request is stored with its error and waits for the next day.
pub async fn request_stale(db: &Database, client: &AnalysisClient, now: DateTime<Utc>) -> Result<usize> {
    if !client.is_configured() {
        tracing::debug!("no analysis engine configured, skipping refresh");
        return Ok(0);
    }
    let stale = db.stale_analysis_repos(now - TimeDelta::days(1))?;
    let date_from = now
        .checked_sub_months(Months::new(ANALYSIS_WINDOW_MONTHS))
        .unwrap_or(now);

    let mut sent = 0;
    for repo in stale {
        let id = db.insert_analysis_request(
            &NewAnalysisRequest {
                repo: repo.repo.clone(),
                git_url: repo.git_url.clone(),
                date_from,
                date_to: now,
            },
            now,
        )?;
        let body = AnalysisRequestBody {
            req_id: id.clone(),
            date_from,
            date_to: now,
            git_url: repo.git_url,
        };
        match client.request_analysis(&body).await {
            Ok(()) => sent += 1,
            Err(err) => {
                tracing::warn!(repo = %repo.repo, error = %err, "analysis request failed");
                db.record_analysis_result(&id, Some(&err.to_string()), &[], now)?;
            }
        }
    }
    Ok(sent)
}
