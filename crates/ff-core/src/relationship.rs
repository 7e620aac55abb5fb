//! Activation intervals for sponsor, trust and multiplier relationships.
//!
//! All three relationship kinds share one shape: a row is inserted when the
//! relationship is activated and closed (never deleted) when it is
//! deactivated. At most one open row exists per `(kind, actor, repo)`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::SettlementDay;
use crate::types::{RepoId, UserId, ValidationError};

/// Which relationship an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// A user funds a repository.
    Sponsor,
    /// An admin marks a repository as eligible for foundation matching.
    Trust,
    /// A foundation matches sponsorships of a repository.
    Multiplier,
}

impl RelationshipKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sponsor => "sponsor",
            Self::Trust => "trust",
            Self::Multiplier => "multiplier",
        }
    }

    /// Trust is curated per repository and carries no actor.
    #[must_use]
    pub const fn has_actor(&self) -> bool {
        !matches!(self, Self::Trust)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sponsor" => Ok(Self::Sponsor),
            "trust" => Ok(Self::Trust),
            "multiplier" => Ok(Self::Multiplier),
            _ => Err(ValidationError::InvalidRelationshipKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A stored activation interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEvent {
    pub id: i64,
    pub kind: RelationshipKind,
    pub actor: Option<UserId>,
    pub repo: RepoId,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl RelationshipEvent {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.deactivated_at.is_none()
    }

    /// `true` if the interval overlaps `[day.start, day.end)`.
    ///
    /// A relationship closed exactly at the day's start still counts.
    #[must_use]
    pub fn active_during(&self, day: &SettlementDay) -> bool {
        self.activated_at < day.end() && self.deactivated_at.is_none_or(|d| d >= day.start())
    }
}

/// Direction of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Activate,
    Deactivate,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activate => f.write_str("activate"),
            Self::Deactivate => f.write_str("deactivate"),
        }
    }
}

/// A requested activation or deactivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub kind: RelationshipKind,
    pub actor: Option<UserId>,
    pub repo: RepoId,
    pub transition: Transition,
    pub at: DateTime<Utc>,
}

impl TransitionRequest {
    pub fn activate(
        kind: RelationshipKind,
        actor: Option<UserId>,
        repo: RepoId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            actor,
            repo,
            transition: Transition::Activate,
            at,
        }
    }

    pub fn deactivate(
        kind: RelationshipKind,
        actor: Option<UserId>,
        repo: RepoId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            actor,
            repo,
            transition: Transition::Deactivate,
            at,
        }
    }
}

/// A rejected transition. Nothing is written when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{kind} relationships require an actor")]
    ActorRequired { kind: RelationshipKind },

    #[error("{kind} relationships do not take an actor")]
    ActorNotAllowed { kind: RelationshipKind },

    #[error("{kind} relationship for repository {repo} is already active")]
    AlreadyActive { kind: RelationshipKind, repo: RepoId },

    #[error("{kind} relationship for repository {repo} is not active")]
    NotActive { kind: RelationshipKind, repo: RepoId },

    #[error("activation at {at} precedes previous activation at {last}")]
    BeforeLastActivation {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("activation at {at} precedes previous deactivation at {last}")]
    BeforeLastDeactivation {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("deactivation at {at} precedes activation at {activated_at}")]
    DeactivateBeforeActivation {
        at: DateTime<Utc>,
        activated_at: DateTime<Utc>,
    },
}

/// The write a valid transition turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Insert a new open row.
    Insert,
    /// Close the open row with this id.
    Close { id: i64 },
}

/// Checks `request` against the most recent event for the same key.
///
/// `last` must be the event with the latest `activated_at` for
/// `(request.kind, request.actor, request.repo)`, open or closed.
pub fn validate_transition(
    request: &TransitionRequest,
    last: Option<&RelationshipEvent>,
) -> Result<TransitionPlan, TransitionError> {
    let kind = request.kind;
    match (kind.has_actor(), request.actor.is_some()) {
        (true, false) => return Err(TransitionError::ActorRequired { kind }),
        (false, true) => return Err(TransitionError::ActorNotAllowed { kind }),
        _ => {}
    }

    match request.transition {
        Transition::Activate => {
            let Some(last) = last else {
                return Ok(TransitionPlan::Insert);
            };
            if last.is_open() {
                return Err(TransitionError::AlreadyActive {
                    kind,
                    repo: request.repo.clone(),
                });
            }
            if request.at < last.activated_at {
                return Err(TransitionError::BeforeLastActivation {
                    at: request.at,
                    last: last.activated_at,
                });
            }
            if let Some(closed) = last.deactivated_at.filter(|closed| request.at < *closed) {
                return Err(TransitionError::BeforeLastDeactivation {
                    at: request.at,
                    last: closed,
                });
            }
            Ok(TransitionPlan::Insert)
        }
        Transition::Deactivate => {
            let open = last.filter(|e| e.is_open()).ok_or_else(|| {
                TransitionError::NotActive {
                    kind,
                    repo: request.repo.clone(),
                }
            })?;
            if request.at < open.activated_at {
                return Err(TransitionError::DeactivateBeforeActivation {
                    at: request.at,
                    activated_at: open.activated_at,
                });
            }
            Ok(TransitionPlan::Close { id: open.id })
        }
    }
}

/// Storage for relationship intervals.
///
/// Implementations must run [`validate_transition`] and the resulting write
/// atomically so the one-open-row invariant holds under concurrent callers.
pub trait RelationshipStore {
    type Error: From<TransitionError>;

    /// Validates and applies a transition, returning the affected row id.
    fn record_transition(&self, request: &TransitionRequest) -> Result<i64, Self::Error>;

    /// The latest event for the key, open or closed.
    fn last_event(
        &self,
        kind: RelationshipKind,
        actor: Option<&UserId>,
        repo: &RepoId,
    ) -> Result<Option<RelationshipEvent>, Self::Error>;

    /// Every event of `kind` whose interval overlaps `day`.
    fn active_during(
        &self,
        kind: RelationshipKind,
        day: &SettlementDay,
    ) -> Result<Vec<RelationshipEvent>, Self::Error>;
}
