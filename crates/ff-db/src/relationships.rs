//! Relationship event store backed by `relationship_event`.

use ff_core::{
    RelationshipEvent, RelationshipKind, RelationshipStore, RepoId, SettlementDay,
    TransitionPlan, TransitionRequest, UserId, validate_transition,
};
use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::{Database, DbError, format_timestamp, is_constraint_violation, parse_timestamp};

type EventRow = (i64, String, Option<String>, String, String, Option<String>);

fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_event(
    (id, kind, actor, repo, activated_at, deactivated_at): EventRow,
) -> Result<RelationshipEvent, DbError> {
    let context = format!("relationship_event {id}");
    Ok(RelationshipEvent {
        id,
        kind: kind.parse()?,
        actor: actor.map(UserId::new).transpose()?,
        repo: RepoId::new(repo)?,
        activated_at: parse_timestamp(&activated_at, &context)?,
        deactivated_at: deactivated_at
            .map(|value| parse_timestamp(&value, &context))
            .transpose()?,
    })
}

impl RelationshipStore for Database {
    type Error = DbError;

    fn record_transition(&self, request: &TransitionRequest) -> Result<i64, DbError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let last = self.last_event(request.kind, request.actor.as_ref(), &request.repo)?;
        let plan = validate_transition(request, last.as_ref())?;
        let at = format_timestamp(request.at);

        let id = match plan {
            TransitionPlan::Insert => {
                let inserted = tx.execute(
                    "
                    INSERT INTO relationship_event (kind, actor_id, repo_id, activated_at)
                    VALUES (?, ?, ?, ?)
                    ",
                    params![
                        request.kind.as_str(),
                        request.actor.as_ref().map(UserId::as_str),
                        request.repo.as_str(),
                        at,
                    ],
                );
                match inserted {
                    Ok(_) => tx.last_insert_rowid(),
                    Err(err) if is_constraint_violation(&err) => {
                        return Err(ff_core::TransitionError::AlreadyActive {
                            kind: request.kind,
                            repo: request.repo.clone(),
                        }
                        .into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            TransitionPlan::Close { id } => {
                let updated = tx.execute(
                    "
                    UPDATE relationship_event
                    SET deactivated_at = ?
                    WHERE id = ? AND deactivated_at IS NULL
                    ",
                    params![at, id],
                )?;
                if updated != 1 {
                    return Err(ff_core::TransitionError::NotActive {
                        kind: request.kind,
                        repo: request.repo.clone(),
                    }
                    .into());
                }
                id
            }
        };
        tx.commit()?;

        tracing::info!(
            kind = %request.kind,
            actor = ?request.actor.as_ref().map(UserId::as_str),
            repo = %request.repo,
            transition = %request.transition,
            id,
            "recorded relationship transition"
        );
        Ok(id)
    }

    fn last_event(
        &self,
        kind: RelationshipKind,
        actor: Option<&UserId>,
        repo: &RepoId,
    ) -> Result<Option<RelationshipEvent>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, kind, actor_id, repo_id, activated_at, deactivated_at
                FROM relationship_event
                WHERE kind = ? AND actor_id IS ? AND repo_id = ?
                ORDER BY activated_at DESC, id DESC
                LIMIT 1
                ",
                params![kind.as_str(), actor.map(UserId::as_str), repo.as_str()],
                event_row,
            )
            .optional()?;
        row.map(into_event).transpose()
    }

    fn active_during(
        &self,
        kind: RelationshipKind,
        day: &SettlementDay,
    ) -> Result<Vec<RelationshipEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, kind, actor_id, repo_id, activated_at, deactivated_at
            FROM relationship_event
            WHERE kind = ?
              AND activated_at < ?
              AND (deactivated_at IS NULL OR deactivated_at >= ?)
            ORDER BY actor_id ASC, repo_id ASC, activated_at ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![
                kind.as_str(),
                format_timestamp(day.end()),
                format_timestamp(day.start())
            ],
            event_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(into_event(row?)?);
        }
        Ok(events)
    }
}
