//! Status command for showing ledger counts.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use ff_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    let summary = db.status_summary()?;

    writeln!(writer, "Settlement status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(writer, "Users: {}", summary.users)?;
    writeln!(writer, "Repositories: {}", summary.repos)?;
    writeln!(writer, "Open sponsorships: {}", summary.open_sponsors)?;
    writeln!(writer, "Trusted repositories: {}", summary.trusted_repos)?;
    writeln!(writer, "Foundation repositories: {}", summary.open_multipliers)?;
    writeln!(writer, "Daily contributions: {}", summary.daily_contributions)?;
    writeln!(writer, "Pending analyses: {}", summary.pending_analyses)?;
    writeln!(
        writer,
        "Last settled day: {}",
        summary.last_settled_day.as_deref().unwrap_or("never")
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, NaiveDate, Utc};
    use ff_core::{RelationshipKind, RelationshipStore, RepoId, SettlementDay, TransitionRequest, UserId};

    use insta::assert_snapshot;

    #[test]
    fn status_command_outputs_counts() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("ffs.db");
        let db = Database::open(&db_path).unwrap();
        let t0 = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let alice = UserId::new("alice").unwrap();
        let repo = RepoId::new("repo-1").unwrap();
        db.insert_user(&alice, "alice@example.com", t0).unwrap();
        db.insert_repo(&repo, "https://git.example/r", "r", t0).unwrap();
        db.record_transition(&TransitionRequest::activate(
            RelationshipKind::Sponsor,
            Some(alice),
            repo.clone(),
            t0,
        ))
        .unwrap();
        db.record_transition(&TransitionRequest::activate(RelationshipKind::Trust, None, repo, t0))
            .unwrap();
        db.settle_day(
            SettlementDay::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            t0 + chrono::TimeDelta::days(1),
        )
        .unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &db_path).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&db_path.display().to_string(), "[TEMP]/ffs.db");
        assert_snapshot!(output, @r"
        Settlement status
        Database: [TEMP]/ffs.db
        Users: 1
        Repositories: 1
        Open sponsorships: 1
        Trusted repositories: 1
        Foundation repositories: 0
        Daily contributions: 0
        Pending analyses: 0
        Last settled day: 2025-01-01
        ");
    }
}
