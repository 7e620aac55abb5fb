//! Contributor weights from a completed repository analysis.

use std::collections::BTreeMap;

use num_rational::BigRational;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::money::weight_ratio;
use crate::types::{UserId, ValidationError};

/// One row of an analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub email: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub weight: f64,
}

/// Weights split by whether the git email belongs to a known account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorWeights {
    /// Account id to the sum of the weights of all its confirmed emails.
    pub resolved: BTreeMap<UserId, BigRational>,
    /// Raw git email to weight, for emails without a confirmed owner.
    pub unresolved: BTreeMap<String, BigRational>,
    /// Sum of the resolved weights; the denominator of every paid share.
    pub resolved_total: BigRational,
}

impl ContributorWeights {
    pub fn empty() -> Self {
        Self {
            resolved: BTreeMap::new(),
            unresolved: BTreeMap::new(),
            resolved_total: BigRational::zero(),
        }
    }

    /// `true` when some resolved contributor can be paid a non-zero share.
    pub fn has_resolved(&self) -> bool {
        !self.resolved.is_empty() && !self.resolved_total.is_zero()
    }
}

/// Outcome of resolving a repository's weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightResolution {
    /// The repository has no completed, error-free analysis.
    NoAnalysis,
    Analysed(ContributorWeights),
}

/// Partitions analysis entries using `owner_of` to map emails to accounts.
///
/// Duplicate emails and multiple emails of the same account are summed.
pub fn resolve_weights<E>(
    entries: &[AnalysisEntry],
    mut owner_of: impl FnMut(&str) -> Result<Option<UserId>, E>,
) -> Result<ContributorWeights, E>
where
    E: From<ValidationError>,
{
    let mut weights = ContributorWeights::empty();
    for entry in entries {
        let weight = weight_ratio(&entry.email, entry.weight)?;
        match owner_of(&entry.email)? {
            Some(user) => {
                weights.resolved_total += &weight;
                *weights
                    .resolved
                    .entry(user)
                    .or_insert_with(BigRational::zero) += weight;
            }
            None => {
                *weights
                    .unresolved
                    .entry(entry.email.clone())
                    .or_insert_with(BigRational::zero) += weight;
            }
        }
    }
    Ok(weights)
}
