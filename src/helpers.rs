//! Fixed-point conversions between human quantities and chain integer units.
//!
//! Every size comparison against a chain order goes through these helpers;
//! floats are never compared for equality at the chain boundary.

use log::warn;

use crate::errors::{BotError, BotResult};

fn scale(precision: u32) -> f64 {
    10f64.powi(precision as i32)
}

/// Convert a human quantity to integer units at the given precision,
/// saturating to the signed 64-bit range.
pub fn to_int(value: f64, precision: u32) -> i64 {
    let scaled = (value * scale(precision)).round();
    if scaled >= i64::MAX as f64 {
        warn!(
            "amount {} exceeds chain integer range at precision {}, clamping",
            value, precision
        );
        i64::MAX
    } else if scaled <= i64::MIN as f64 {
        warn!(
            "amount {} below chain integer range at precision {}, clamping",
            value, precision
        );
        i64::MIN
    } else {
        scaled as i64
    }
}

/// Convert integer units back to a human quantity.
pub fn to_float(units: i64, precision: u32) -> f64 {
    units as f64 / scale(precision)
}

/// Two sizes are equal when they are within one integer unit of each other
/// at the asset's precision.
pub fn sizes_equal(a: f64, b: f64, precision: u32) -> bool {
    (to_int(a, precision) - to_int(b, precision)).abs() <= 1
}

/// Validate an order amount before submission: the scaled value must land
/// strictly above zero and inside the signed 64-bit range.
pub fn validate_amount(value: f64, precision: u32) -> BotResult<i64> {
    let scaled = (value * scale(precision)).round();
    if !(scaled > 0.0) || scaled >= i64::MAX as f64 {
        return Err(BotError::AmountOutOfRange { value, precision });
    }
    Ok(scaled as i64)
}

/// Maximum accepted price delta between a chain order and a grid slot.
///
/// One integer unit of either asset moves the implied price by roughly
/// `price / (size * 10^precision)`; the tolerance is the sum of both
/// contributions.
pub fn price_tolerance(price: f64, size_a: f64, size_b: f64, prec_a: u32, prec_b: u32) -> f64 {
    if size_a <= 0.0 || size_b <= 0.0 {
        return 0.0;
    }
    (1.0 / (size_a * scale(prec_a)) + 1.0 / (size_b * scale(prec_b))) * price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        // Values with at most `precision` decimals survive the round trip.
        for &(value, precision) in &[
            (1.85f64, 5u32),
            (0.00001, 5),
            (1800.0, 5),
            (123.456, 3),
            (10.0, 0),
        ] {
            assert_eq!(to_float(to_int(value, precision), precision), value);
        }
    }

    #[test]
    fn test_to_int_rounds() {
        assert_eq!(to_int(1.999999, 5), 200000);
        assert_eq!(to_int(1.000004, 5), 100000);
        assert_eq!(to_int(-1.5, 0), -2);
    }

    #[test]
    fn test_overflow_saturates() {
        // 9.3e13 at precision 5 scales past the signed 64-bit range.
        assert_eq!(to_int(9.3e13, 5), i64::MAX);
        assert_eq!(to_int(-9.3e13, 5), i64::MIN);
    }

    #[test]
    fn test_sizes_equal_tolerance() {
        assert!(sizes_equal(10.0, 10.00001, 5));
        assert!(sizes_equal(10.0, 10.0, 5));
        assert!(!sizes_equal(10.0, 10.00002, 5));
    }

    #[test]
    fn test_validate_amount_bounds() {
        assert_eq!(validate_amount(10.0, 5).unwrap(), 1_000_000);
        assert!(validate_amount(0.0, 5).is_err());
        assert!(validate_amount(-1.0, 5).is_err());
        // Rounds to zero units.
        assert!(validate_amount(0.000001, 5).is_err());
        // Saturating values are rejected rather than clamped.
        assert!(validate_amount(9.3e13, 5).is_err());
    }

    #[test]
    fn test_price_tolerance() {
        // 10 A at 1.85 against 18.5 B, both precision 5: one unit on either
        // side is worth about 1.85e-6 in price.
        let tau = price_tolerance(1.85, 10.0, 18.5, 5, 5);
        assert!(tau > 0.0);
        assert!(tau < 1e-5);
        assert_eq!(price_tolerance(1.85, 0.0, 18.5, 5, 5), 0.0);
    }
}
