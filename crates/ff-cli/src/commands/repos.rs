//! Repository registry and git email links.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ff_db::Database;

use super::util::{repo_id, user_id};

pub fn add<W: Write>(
    writer: &mut W,
    db: &Database,
    id: &str,
    git_url: &str,
    name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let repo = repo_id(id)?;
    db.insert_repo(&repo, git_url, name.unwrap_or(id), now)
        .with_context(|| format!("failed to add repository {repo}"))?;
    writeln!(writer, "Added repository {repo} ({git_url})")?;
    Ok(())
}

pub fn link_email<W: Write>(
    writer: &mut W,
    db: &Database,
    email: &str,
    user: &str,
    confirmed: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let user = user_id(user)?;
    db.require_user(&user)?;
    db.link_git_email(email, &user, confirmed.then_some(now), now)?;
    if confirmed {
        writeln!(writer, "Linked {email} to {user}")?;
    } else {
        writeln!(writer, "Linked {email} to {user} (unconfirmed)")?;
    }
    Ok(())
}

pub fn unlink_email<W: Write>(writer: &mut W, db: &Database, email: &str, user: &str) -> Result<()> {
    let user = user_id(user)?;
    db.unlink_git_email(email, &user)?;
    writeln!(writer, "Unlinked {email} from {user}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_core::UserId;

    #[test]
    fn only_confirmed_links_resolve() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let bob = UserId::new("bob").unwrap();
        db.insert_user(&bob, "bob@example.com", now).unwrap();
        let mut out = Vec::new();

        link_email(&mut out, &db, "bob@git", "bob", false, now).unwrap();
        assert_eq!(db.git_email_owner("bob@git").unwrap(), None);

        link_email(&mut out, &db, "bob@git", "bob", true, now).unwrap();
        assert_eq!(db.git_email_owner("bob@git").unwrap(), Some(bob));

        unlink_email(&mut out, &db, "bob@git", "bob").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Linked bob@git to bob (unconfirmed)\nLinked bob@git to bob\nUnlinked bob@git from bob\n"
        );
    }

    #[test]
    fn repo_name_defaults_to_id() {
        let db = Database::open_in_memory().unwrap();
        let mut out = Vec::new();
        add(&mut out, &db, "repo-1", "https://git.example/r", None, Utc::now()).unwrap();
        let repo = db.find_repo(&repo_id("repo-1").unwrap()).unwrap().unwrap();
        assert_eq!(repo.name, "repo-1");
    }
}
