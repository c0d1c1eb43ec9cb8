//! Fixed-point codec.
//!
//! A real `x` is encoded at accuracy `A` as `round(x·10^A)`, rounding half away from zero. The
//! product of two encoded values carries the factor `10^(2A)` and is decoded at accuracy `2A`.

use num::{
    bigint::BigInt,
    traits::{FromPrimitive, ToPrimitive},
};

use super::DataError;

/// Encodes a real at accuracy `accuracy`.
///
/// # Errors
/// Fails if `x` is not finite.
pub fn to_fixed(x: f64, accuracy: u32) -> Result<BigInt, DataError> {
    let scaled = (x * 10_f64.powi(accuracy as i32)).round();
    BigInt::from_f64(scaled).ok_or(DataError::NonFinite(x))
}

/// Decodes a fixed-point value encoded at accuracy `accuracy`.
pub fn from_fixed(x: &BigInt, accuracy: u32) -> f64 {
    x.to_f64().unwrap_or(f64::NAN) / 10_f64.powi(accuracy as i32)
}

/// Gets the fixed-point scale `10^accuracy`.
pub fn scale(accuracy: u32) -> BigInt {
    num::pow(BigInt::from(10), accuracy as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fixed_rounds_half_away_from_zero() {
        assert_eq!(to_fixed(1.25, 1).unwrap(), BigInt::from(13));
        assert_eq!(to_fixed(-1.25, 1).unwrap(), BigInt::from(-13));
        assert_eq!(to_fixed(0.123_456_789_012_3, 10).unwrap(), BigInt::from(1_234_567_890_i64));
        assert_eq!(to_fixed(-3.0, 0).unwrap(), BigInt::from(-3));
    }

    #[test]
    fn test_roundtrip_within_half_ulp() {
        for x in &[0.0, 1.5, -2.718_281_828, 123.456_789, -0.000_000_000_04] {
            let decoded = from_fixed(&to_fixed(*x, 10).unwrap(), 10);
            assert!((decoded - x).abs() <= 0.5e-10, "{} decoded as {}", x, decoded);
        }
    }

    #[test]
    fn test_products_decode_at_double_accuracy() {
        let a = to_fixed(1.5, 6).unwrap();
        let b = to_fixed(-4.0, 6).unwrap();
        assert!((from_fixed(&(a * b), 12) + 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(to_fixed(f64::INFINITY, 2), Err(DataError::NonFinite(f64::INFINITY)));
        assert!(to_fixed(f64::NAN, 2).is_err());
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale(0), BigInt::from(1));
        assert_eq!(scale(3), BigInt::from(1000));
        assert_eq!(scale(20).to_string(), "100000000000000000000");
    }
}
