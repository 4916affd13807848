//! Exact-decimal money handling.
//!
//! Monetary amounts travel the wire as fixed-point decimal strings with two
//! fractional digits. All comparison and arithmetic goes through
//! [`rust_decimal::Decimal`]; binary floats never touch an amount.

use rust_decimal::Decimal;

use crate::error::GavelError;

/// Parse a wire amount string into a 2-dp decimal.
///
/// Accepts `^\d+(\.\d+)?$` with at most two fractional digits and a value
/// strictly greater than zero. The result is rescaled to exactly two
/// fractional digits so that `1050` and `1050.00` normalize identically.
pub fn parse_amount(s: &str) -> Result<Decimal, GavelError> {
    if s.is_empty() || !amount_shape_ok(s) {
        return Err(GavelError::InvalidAmount(s.to_string()));
    }
    let d: Decimal = s
        .parse()
        .map_err(|_| GavelError::InvalidAmount(s.to_string()))?;
    if d <= Decimal::ZERO {
        return Err(GavelError::InvalidAmount(s.to_string()));
    }
    if d.scale() > 2 {
        return Err(GavelError::InvalidAmount(s.to_string()));
    }
    Ok(normalize(d))
}

/// Digits, optionally one dot followed by digits. No sign, no exponent.
pub fn amount_shape_ok(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let int = parts.next().unwrap_or("");
    if int.is_empty() || !int.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match parts.next() {
        None => true,
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// Rescale to exactly two fractional digits.
pub fn normalize(d: Decimal) -> Decimal {
    let mut d = d;
    d.rescale(2);
    d
}

/// Render with exactly two fractional digits, e.g. `1050.00`.
pub fn format_amount(d: Decimal) -> String {
    normalize(d).to_string()
}

/// Minimum-increment rule: `amount >= current + increment`.
pub fn meets_minimum_increment(amount: Decimal, current: Decimal, increment: Decimal) -> bool {
    amount >= current + increment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_normalizes_to_two_dp() {
        assert_eq!(format_amount(parse_amount("1050").unwrap()), "1050.00");
        assert_eq!(format_amount(parse_amount("1050.5").unwrap()), "1050.50");
        assert_eq!(format_amount(parse_amount("1050.00").unwrap()), "1050.00");
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", "-5", "+5", "1,000", "1.2.3", "abc", "1e3", ".50", "5.", "5.005"] {
            assert!(parse_amount(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_zero() {
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("0.00").is_err());
    }

    #[test]
    fn normalized_amounts_compare_equal() {
        assert_eq!(parse_amount("1000").unwrap(), parse_amount("1000.00").unwrap());
    }

    #[test]
    fn increment_boundary_is_inclusive() {
        // current 1000.00, increment 50.00: 1050.00 accepted, 1049.99 rejected.
        let current = dec("1000.00");
        let inc = dec("50.00");
        assert!(meets_minimum_increment(dec("1050.00"), current, inc));
        assert!(meets_minimum_increment(dec("1050.01"), current, inc));
        assert!(!meets_minimum_increment(dec("1049.99"), current, inc));
    }

    #[test]
    fn no_float_drift_on_cent_arithmetic() {
        // 0.1 + 0.2 is exactly 0.3 in decimal.
        assert_eq!(dec("0.1") + dec("0.2"), dec("0.3"));
    }
}
