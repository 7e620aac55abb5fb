//! Domain logic for daily sponsorship settlement.
//!
//! This crate contains the pure parts of the settlement engine:
//! - Relationship intervals: validating sponsor/trust/multiplier transitions
//! - Weights: turning an analysis result into resolved and unresolved shares
//! - Strategy: choosing the currency and daily rate a payer draws from
//! - Foundation matching: pool splitting and the daily/funds caps
//!
//! Nothing here performs I/O; storage lives in `ff-db`.

pub mod clock;
mod foundation;
pub mod money;
pub mod notice;
pub mod relationship;
mod strategy;
pub mod types;
mod weights;

pub use clock::{Clock, FixedClock, SettlementDay, SystemClock};
pub use foundation::{CapCheck, Exhausted, FoundationBudget, MatchPart, payout_ceiling, plan_matching};
pub use notice::{Outreach, TopUpChannel, TopUpReminder};
pub use relationship::{
    RelationshipEvent, RelationshipKind, RelationshipStore, Transition, TransitionError,
    TransitionPlan, TransitionRequest, validate_transition,
};
pub use strategy::{Allocation, CurrencyPosition, LatestPayIn, RepoShares, deduct_max};
pub use types::{Currency, PayInStatus, RepoId, UserId, ValidationError};
pub use weights::{AnalysisEntry, ContributorWeights, WeightResolution, resolve_weights};

/// Re-exported so downstream crates share one big-integer type.
pub use num_bigint::BigInt;
pub use num_rational::BigRational;
