//! Repositories, git email links and contribution-analysis results.

use chrono::{DateTime, Utc};
use ff_core::money::weight_ratio;
use ff_core::{AnalysisEntry, RepoId, UserId, WeightResolution, resolve_weights};
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use crate::{Database, DbError, format_timestamp, parse_optional_timestamp, parse_timestamp};

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub id: RepoId,
    pub git_url: String,
    pub name: String,
}

/// An analysis request about to be sent to the analysis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnalysisRequest {
    pub repo: RepoId,
    pub git_url: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

/// A stored analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequestRecord {
    pub id: String,
    pub repo: RepoId,
    pub git_url: String,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A repository whose latest analysis is older than the cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRepo {
    pub repo: RepoId,
    pub git_url: String,
}

impl Database {
    pub fn insert_repo(
        &self,
        id: &RepoId,
        git_url: &str,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO repos (id, git_url, name, created_at) VALUES (?, ?, ?, ?)",
            params![id.as_str(), git_url, name, format_timestamp(created_at)],
        )?;
        Ok(())
    }

    pub fn find_repo(&self, id: &RepoId) -> Result<Option<RepoRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, git_url, name FROM repos WHERE id = ?",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, git_url, name)| {
            Ok(RepoRecord {
                id: RepoId::new(id)?,
                git_url,
                name,
            })
        })
        .transpose()
    }

    /// Links `email` to `user`. A link without `confirmed_at` does not resolve.
    pub fn link_git_email(
        &self,
        email: &str,
        user: &UserId,
        confirmed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO git_email (email, user_id, confirmed_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                user_id = excluded.user_id,
                confirmed_at = excluded.confirmed_at
            ",
            params![
                email,
                user.as_str(),
                confirmed_at.map(format_timestamp),
                format_timestamp(now)
            ],
        )?;
        Ok(())
    }

    pub fn unlink_git_email(&self, email: &str, user: &UserId) -> Result<(), DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM git_email WHERE email = ? AND user_id = ?",
            params![email, user.as_str()],
        )?;
        if deleted == 0 {
            return Err(DbError::NotFound {
                entity: "git email",
                id: email.to_string(),
            });
        }
        Ok(())
    }

    /// The account owning a confirmed git email.
    pub fn git_email_owner(&self, email: &str) -> Result<Option<UserId>, DbError> {
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM git_email WHERE email = ? AND confirmed_at IS NOT NULL",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.map(UserId::new).transpose()?)
    }

    /// Stores a new analysis request and returns its id.
    pub fn insert_analysis_request(
        &self,
        request: &NewAnalysisRequest,
        now: DateTime<Utc>,
    ) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "
            INSERT INTO analysis_request (id, repo_id, date_from, date_to, git_url, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            params![
                id,
                request.repo.as_str(),
                format_timestamp(request.date_from),
                format_timestamp(request.date_to),
                request.git_url,
                format_timestamp(now),
            ],
        )?;
        Ok(id)
    }

    /// Records the analysis engine's answer for a request.
    ///
    /// With `error` set the entries are ignored and the request never
    /// resolves weights. A negative or non-finite weight rejects the whole
    /// result and leaves the request pending.
    pub fn record_analysis_result(
        &self,
        request_id: &str,
        error: Option<&str>,
        entries: &[AnalysisEntry],
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if error.is_none() {
            for entry in entries {
                weight_ratio(&entry.email, entry.weight)?;
            }
        }
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let updated = tx.execute(
            "
            UPDATE analysis_request SET received_at = ?, error = ?
            WHERE id = ? AND received_at IS NULL
            ",
            params![format_timestamp(now), error, request_id],
        )?;
        if updated != 1 {
            return Err(DbError::AnalysisAlreadyReceived {
                id: request_id.to_string(),
            });
        }
        if error.is_none() {
            let mut stmt = tx.prepare(
                "
                INSERT INTO analysis_response (request_id, git_email, git_names, weight)
                VALUES (?, ?, ?, ?)
                ",
            )?;
            for entry in entries {
                let names = serde_json::to_string(&entry.names).map_err(|source| DbError::Json {
                    context: format!("analysis_response for {request_id}"),
                    source,
                })?;
                stmt.execute(params![request_id, entry.email, names, entry.weight])?;
            }
        }
        tx.commit()?;

        match error {
            Some(error) => tracing::warn!(request_id, error, "analysis failed"),
            None => tracing::info!(request_id, entries = entries.len(), "analysis received"),
        }
        Ok(())
    }

    pub fn find_analysis_request(
        &self,
        request_id: &str,
    ) -> Result<Option<AnalysisRequestRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, repo_id, git_url, date_from, date_to, received_at, error
                FROM analysis_request WHERE id = ?
                ",
                params![request_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, repo, git_url, date_from, date_to, received_at, error)) = row else {
            return Ok(None);
        };
        let context = format!("analysis_request {id}");
        Ok(Some(AnalysisRequestRecord {
            repo: RepoId::new(repo)?,
            git_url,
            date_from: parse_timestamp(&date_from, &context)?,
            date_to: parse_timestamp(&date_to, &context)?,
            received_at: parse_optional_timestamp(received_at, &context)?,
            error,
            id,
        }))
    }

    /// Repositories never analysed or whose newest request ends before `cutoff`.
    pub fn stale_analysis_repos(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleRepo>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT r.id, r.git_url
            FROM repos r
            LEFT JOIN (
                SELECT repo_id, MAX(date_to) AS latest
                FROM analysis_request
                GROUP BY repo_id
            ) a ON a.repo_id = r.id
            WHERE a.latest IS NULL OR a.latest < ?
            ORDER BY r.git_url ASC, r.id ASC
            ",
        )?;
        let rows = stmt.query_map(params![format_timestamp(cutoff)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut repos = Vec::new();
        for row in rows {
            let (repo, git_url) = row?;
            repos.push(StaleRepo {
                repo: RepoId::new(repo)?,
                git_url,
            });
        }
        Ok(repos)
    }

    /// Entries of the newest completed, error-free analysis of `repo`.
    fn latest_analysis_entries(&self, repo: &RepoId) -> Result<Option<Vec<AnalysisEntry>>, DbError> {
        let request_id: Option<String> = self
            .conn
            .query_row(
                "
                SELECT id FROM analysis_request
                WHERE repo_id = ? AND received_at IS NOT NULL AND error IS NULL
                ORDER BY date_to DESC, received_at DESC
                LIMIT 1
                ",
                params![repo.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(request_id) = request_id else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "
            SELECT git_email, git_names, weight FROM analysis_response
            WHERE request_id = ?
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map(params![request_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (email, names, weight) = row?;
            let names = serde_json::from_str(&names).map_err(|source| DbError::Json {
                context: format!("analysis_response for {request_id}"),
                source,
            })?;
            entries.push(AnalysisEntry {
                email,
                names,
                weight,
            });
        }
        Ok(Some(entries))
    }

    /// Resolves `repo`'s latest analysis against confirmed git email links.
    pub fn resolve_repo_weights(&self, repo: &RepoId) -> Result<WeightResolution, DbError> {
        let Some(entries) = self.latest_analysis_entries(repo)? else {
            return Ok(WeightResolution::NoAnalysis);
        };
        let weights = resolve_weights(&entries, |email| self.git_email_owner(email))?;
        Ok(WeightResolution::Analysed(weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_core::ValidationError;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn entry(email: &str, weight: f64) -> AnalysisEntry {
        AnalysisEntry {
            email: email.to_string(),
            names: vec![email.to_string()],
            weight,
        }
    }

    fn setup() -> (Database, RepoId) {
        let db = Database::open_in_memory().expect("open in-memory db");
        let repo = RepoId::new("repo-1").unwrap();
        db.insert_repo(&repo, "https://git.example/repo-1", "repo-1", at("2025-01-01T00:00:00Z"))
            .unwrap();
        (db, repo)
    }

    fn analyse(db: &Database, repo: &RepoId, date_to: &str, entries: &[AnalysisEntry]) -> String {
        let id = db
            .insert_analysis_request(
                &NewAnalysisRequest {
                    repo: repo.clone(),
                    git_url: "https://git.example/repo-1".to_string(),
                    date_from: at("2024-10-01T00:00:00Z"),
                    date_to: at(date_to),
                },
                at(date_to),
            )
            .unwrap();
        db.record_analysis_result(&id, None, entries, at(date_to))
            .unwrap();
        id
    }

    #[test]
    fn never_analysed_repo_signals_no_analysis() {
        let (db, repo) = setup();
        assert_eq!(
            db.resolve_repo_weights(&repo).unwrap(),
            WeightResolution::NoAnalysis
        );
    }

    #[test]
    fn failed_analysis_is_ignored() {
        let (db, repo) = setup();
        let id = db
            .insert_analysis_request(
                &NewAnalysisRequest {
                    repo: repo.clone(),
                    git_url: "https://git.example/repo-1".to_string(),
                    date_from: at("2024-10-01T00:00:00Z"),
                    date_to: at("2025-01-01T00:00:00Z"),
                },
                at("2025-01-01T00:00:00Z"),
            )
            .unwrap();
        db.record_analysis_result(&id, Some("timeout"), &[], at("2025-01-01T00:00:10Z"))
            .unwrap();
        assert_eq!(
            db.resolve_repo_weights(&repo).unwrap(),
            WeightResolution::NoAnalysis
        );
        let stored = db.find_analysis_request(&id).unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("timeout"));

        let again = db.record_analysis_result(&id, None, &[], at("2025-01-01T00:01:00Z"));
        assert!(matches!(again, Err(DbError::AnalysisAlreadyReceived { .. })));
    }

    #[test]
    fn negative_weight_rejects_the_result() {
        let (db, repo) = setup();
        let id = db
            .insert_analysis_request(
                &NewAnalysisRequest {
                    repo: repo.clone(),
                    git_url: "https://git.example/repo-1".to_string(),
                    date_from: at("2024-10-01T00:00:00Z"),
                    date_to: at("2025-01-01T00:00:00Z"),
                },
                at("2025-01-01T00:00:00Z"),
            )
            .unwrap();

        let err = db
            .record_analysis_result(
                &id,
                None,
                &[entry("bob@git", 1.0), entry("ghost@git", -0.5)],
                at("2025-01-01T00:00:10Z"),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Validation(ValidationError::InvalidWeight { ref email, .. }) if email == "ghost@git"
        ));
        let stored = db.find_analysis_request(&id).unwrap().unwrap();
        assert!(stored.received_at.is_none());
        assert_eq!(
            db.resolve_repo_weights(&repo).unwrap(),
            WeightResolution::NoAnalysis
        );
    }

    #[test]
    fn latest_analysis_wins_and_only_confirmed_links_resolve() {
        let (db, repo) = setup();
        let bob = UserId::new("bob").unwrap();
        db.insert_user(&bob, "bob@example.com", at("2025-01-01T00:00:00Z"))
            .unwrap();
        db.link_git_email("bob@git", &bob, Some(at("2025-01-01T00:00:00Z")), at("2025-01-01T00:00:00Z"))
            .unwrap();
        db.link_git_email("pending@git", &bob, None, at("2025-01-01T00:00:00Z"))
            .unwrap();

        analyse(&db, &repo, "2025-01-01T00:00:00Z", &[entry("old@git", 1.0)]);
        analyse(
            &db,
            &repo,
            "2025-01-05T00:00:00Z",
            &[entry("bob@git", 0.5), entry("pending@git", 0.25)],
        );

        let WeightResolution::Analysed(weights) = db.resolve_repo_weights(&repo).unwrap() else {
            panic!("expected analysis");
        };
        assert_eq!(weights.resolved[&bob], weight_ratio("bob@git", 0.5).unwrap());
        assert!(weights.unresolved.contains_key("pending@git"));
        assert!(!weights.unresolved.contains_key("old@git"));
    }

    #[test]
    fn unlink_requires_existing_link() {
        let (db, _repo) = setup();
        let bob = UserId::new("bob").unwrap();
        db.insert_user(&bob, "bob@example.com", at("2025-01-01T00:00:00Z"))
            .unwrap();
        db.link_git_email("bob@git", &bob, Some(at("2025-01-01T00:00:00Z")), at("2025-01-01T00:00:00Z"))
            .unwrap();
        assert_eq!(db.git_email_owner("bob@git").unwrap(), Some(bob.clone()));
        db.unlink_git_email("bob@git", &bob).unwrap();
        assert_eq!(db.git_email_owner("bob@git").unwrap(), None);
        assert!(matches!(
            db.unlink_git_email("bob@git", &bob),
            Err(DbError::NotFound { .. })
        ));
    }

    #[test]
    fn stale_repos_include_never_analysed() {
        let (db, repo) = setup();
        let fresh = RepoId::new("repo-2").unwrap();
        db.insert_repo(&fresh, "https://git.example/repo-2", "repo-2", at("2025-01-01T00:00:00Z"))
            .unwrap();
        analyse(&db, &fresh, "2025-01-10T00:00:00Z", &[]);

        let stale = db.stale_analysis_repos(at("2025-01-09T00:00:00Z")).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].repo, repo);
    }
}
