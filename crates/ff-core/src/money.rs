//! Smallest-unit money arithmetic.
//!
//! Every monetary value is a [`BigInt`] in the currency's smallest unit. Ratios
//! are evaluated as exact [`BigRational`]s and truncated toward zero, never
//! rounded, so a settlement can be recomputed bit for bit.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;

use crate::types::ValidationError;

/// Parses a base-10 integer amount as stored in the ledger.
pub fn parse_amount(value: &str) -> Result<BigInt, ValidationError> {
    value
        .trim()
        .parse::<BigInt>()
        .map_err(|_| ValidationError::InvalidAmount {
            value: value.to_string(),
        })
}

/// Converts an analysis weight into an exact rational.
///
/// The binary value of the float is taken verbatim, so `0.3` becomes the
/// exact dyadic fraction closest to 0.3.
pub fn weight_ratio(email: &str, weight: f64) -> Result<BigRational, ValidationError> {
    let invalid = || ValidationError::InvalidWeight {
        email: email.to_string(),
        weight,
    };
    if !weight.is_finite() || weight < 0.0 {
        return Err(invalid());
    }
    BigRational::from_float(weight).ok_or_else(invalid)
}

/// `trunc(amount × weight / total)`.
///
/// Returns zero when `total` is zero.
pub fn share(amount: &BigInt, weight: &BigRational, total: &BigRational) -> BigInt {
    if total.is_zero() {
        return BigInt::zero();
    }
    let exact = BigRational::from_integer(amount.clone()) * weight / total;
    exact.to_integer()
}

/// `trunc(amount × numerator / denominator)` for small integer factors.
pub fn scale(amount: &BigInt, numerator: u32, denominator: u32) -> BigInt {
    if denominator == 0 {
        return BigInt::zero();
    }
    amount * BigInt::from(numerator) / BigInt::from(denominator)
}

/// Integer division truncating toward zero; zero divisor yields zero.
pub fn div_trunc(amount: &BigInt, divisor: &BigInt) -> BigInt {
    if divisor.is_zero() {
        return BigInt::zero();
    }
    amount / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_accepts_signed_big_values() {
        let big = parse_amount("123456789012345678901234567890").unwrap();
        assert_eq!(big.to_string(), "123456789012345678901234567890");
        assert_eq!(parse_amount("-42").unwrap(), BigInt::from(-42));
        assert!(parse_amount("12.5").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn weight_ratio_rejects_nan_and_negative() {
        assert!(weight_ratio("a@x", f64::NAN).is_err());
        assert!(weight_ratio("a@x", -0.1).is_err());
        assert!(weight_ratio("a@x", f64::INFINITY).is_err());
        assert!(weight_ratio("a@x", 0.0).unwrap().is_zero());
    }

    #[test]
    fn share_truncates_instead_of_rounding() {
        let third = weight_ratio("a@x", 1.0).unwrap();
        let total = weight_ratio("a@x", 3.0).unwrap();
        // 100 / 3 = 33.33.. and 200 / 3 = 66.66.. both truncate down.
        assert_eq!(share(&BigInt::from(100), &third, &total), BigInt::from(33));
        let two = weight_ratio("a@x", 2.0).unwrap();
        assert_eq!(share(&BigInt::from(100), &two, &total), BigInt::from(66));
    }

    #[test]
    fn share_of_sole_contributor_is_whole_amount() {
        let half = weight_ratio("a@x", 0.5).unwrap();
        assert_eq!(
            share(&BigInt::from(343_750), &half, &half),
            BigInt::from(343_750)
        );
    }

    #[test]
    fn share_with_zero_total_is_zero() {
        let w = weight_ratio("a@x", 0.5).unwrap();
        assert!(share(&BigInt::from(10), &w, &BigRational::zero()).is_zero());
    }

    #[test]
    fn scale_withholds_ten_percent() {
        assert_eq!(scale(&BigInt::from(1_001), 9, 10), BigInt::from(900));
        assert_eq!(div_trunc(&BigInt::from(7), &BigInt::from(2)), BigInt::from(3));
        assert!(div_trunc(&BigInt::from(7), &BigInt::zero()).is_zero());
    }
}
