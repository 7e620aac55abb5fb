//! Sponsor, trust and multiplier transitions.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ff_core::{RelationshipKind, RelationshipStore, Transition, TransitionRequest};
use ff_db::Database;

use super::util::{parse_at, repo_id, user_id};

/// Records one activation or deactivation.
#[allow(clippy::too_many_arguments)]
pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    kind: RelationshipKind,
    transition: Transition,
    actor: Option<&str>,
    repo: &str,
    at: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let actor = actor.map(user_id).transpose()?;
    let repo = repo_id(repo)?;
    let at = parse_at(at, now)?;
    if let Some(actor) = &actor {
        db.require_user(actor)?;
    }
    db.find_repo(&repo)?
        .with_context(|| format!("unknown repository: {repo}"))?;

    let request = match transition {
        Transition::Activate => TransitionRequest::activate(kind, actor.clone(), repo.clone(), at),
        Transition::Deactivate => {
            TransitionRequest::deactivate(kind, actor.clone(), repo.clone(), at)
        }
    };
    db.record_transition(&request)
        .with_context(|| format!("cannot {transition} {kind} on {repo}"))?;

    match actor {
        Some(actor) => writeln!(writer, "{kind} {transition}: {actor} -> {repo} at {at}")?,
        None => writeln!(writer, "{kind} {transition}: {repo} at {at}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_core::{RepoId, UserId};

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_user(&UserId::new("alice").unwrap(), "alice@example.com", now)
            .unwrap();
        db.insert_repo(&RepoId::new("repo-1").unwrap(), "https://git.example/r", "r", now)
            .unwrap();
        db
    }

    #[test]
    fn sponsoring_twice_is_rejected() {
        let db = setup();
        let now = Utc::now();
        let mut out = Vec::new();
        let sponsor = |out: &mut Vec<u8>, at: &str| {
            run(
                out,
                &db,
                RelationshipKind::Sponsor,
                Transition::Activate,
                Some("alice"),
                "repo-1",
                Some(at),
                now,
            )
        };

        sponsor(&mut out, "2025-01-01T00:00:00Z").unwrap();
        let err = sponsor(&mut out, "2025-01-02T00:00:00Z").unwrap_err();

        assert!(format!("{err:#}").contains("already active"));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "sponsor activate: alice -> repo-1 at 2025-01-01 00:00:00 UTC\n"
        );
    }

    #[test]
    fn trust_has_no_actor() {
        let db = setup();
        let mut out = Vec::new();
        run(
            &mut out,
            &db,
            RelationshipKind::Trust,
            Transition::Activate,
            None,
            "repo-1",
            Some("2025-01-01T00:00:00Z"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "trust activate: repo-1 at 2025-01-01 00:00:00 UTC\n"
        );
    }

    #[test]
    fn unknown_repository_is_reported() {
        let db = setup();
        let mut out = Vec::new();
        let err = run(
            &mut out,
            &db,
            RelationshipKind::Sponsor,
            Transition::Activate,
            Some("alice"),
            "missing",
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown repository"));
    }
}
