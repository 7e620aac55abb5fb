//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Currency codes are upper-case ASCII letters and digits.
    #[error("invalid currency code: {value}")]
    InvalidCurrency { value: String },

    /// Invalid pay-in status value.
    #[error("invalid pay-in status: {value}")]
    InvalidPayInStatus { value: String },

    /// Invalid relationship kind value.
    #[error("invalid relationship kind: {value}")]
    InvalidRelationshipKind { value: String },

    /// An amount column or argument was not a base-10 integer.
    #[error("invalid amount: {value}")]
    InvalidAmount { value: String },

    /// A contribution weight was NaN, infinite or negative.
    #[error("invalid weight for {email}: {weight}")]
    InvalidWeight { email: String, weight: f64 },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A user account identifier (sponsors, contributors and foundations alike).
    UserId, "user ID"
);

define_string_id!(
    /// A repository identifier.
    RepoId, "repository ID"
);

/// An ISO-style currency code such as `USD` or `ETH`.
///
/// Currencies are settled independently; the code is the partition key of every
/// ledger table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Creates a currency code, normalizing to upper case.
    pub fn new(code: impl Into<String>) -> Result<Self, ValidationError> {
        let code = code.into().trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ValidationError::Empty { field: "currency" });
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidCurrency { value: code });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lifecycle status of a pay-in row.
///
/// A confirmed external payment is stored as two rows sharing the external ID:
/// [`PayInStatus::Success`] carrying the net amount and [`PayInStatus::Fee`]
/// carrying the provider fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayInStatus {
    Request,
    Success,
    Fee,
    Action,
    Method,
    Partially,
    Expired,
    Failed,
    Refunded,
}

impl PayInStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Success => "SUCCESS",
            Self::Fee => "FEE",
            Self::Action => "ACTION",
            Self::Method => "METHOD",
            Self::Partially => "PARTIALLY",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for PayInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PayInStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEST" => Ok(Self::Request),
            "SUCCESS" => Ok(Self::Success),
            "FEE" => Ok(Self::Fee),
            "ACTION" => Ok(Self::Action),
            "METHOD" => Ok(Self::Method),
            "PARTIALLY" => Ok(Self::Partially),
            "EXPIRED" => Ok(Self::Expired),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(ValidationError::InvalidPayInStatus {
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
        assert!(UserId::new("alice").is_ok());
    }

    #[test]
    fn repo_id_serde_rejects_empty() {
        let result: Result<RepoId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn currency_normalizes_case() {
        let usd = Currency::new(" usd ").unwrap();
        assert_eq!(usd.as_str(), "USD");
        assert!(Currency::new("US-D").is_err());
        assert!(Currency::new("").is_err());
    }

    #[test]
    fn currency_orders_lexicographically() {
        let eth = Currency::new("ETH").unwrap();
        let usd = Currency::new("USD").unwrap();
        assert!(eth < usd);
    }

    #[test]
    fn pay_in_status_round_trips_through_storage_form() {
        for status in [
            PayInStatus::Request,
            PayInStatus::Success,
            PayInStatus::Fee,
            PayInStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PayInStatus>().unwrap(), status);
        }
        assert!("success".parse::<PayInStatus>().is_err());
    }
}
