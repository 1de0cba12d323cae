//! Strict numeric parsing and Redis-style float formatting.
//!
//! Integer arguments follow the reference rules: base-10, optional leading
//! minus, no whitespace, no leading zeros. Float arguments accept the usual
//! IEEE-754 spellings plus `inf`/`-inf`; NaN is rejected everywhere.

use crate::error::{EngineError, Result};

/// Parse a canonical base-10 signed 64-bit integer.
pub fn parse_i64(bytes: &[u8]) -> Result<i64> {
    let (neg, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(EngineError::NotInteger);
    }
    // "0" is fine, "01" is not.
    if digits[0] == b'0' && digits.len() > 1 {
        return Err(EngineError::NotInteger);
    }
    let mut acc: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(EngineError::NotInteger);
        }
        acc = acc
            .checked_mul(10)
            .and_then(|v| {
                if neg {
                    v.checked_sub(i64::from(b - b'0'))
                } else {
                    v.checked_add(i64::from(b - b'0'))
                }
            })
            .ok_or(EngineError::NotInteger)?;
    }
    Ok(acc)
}

/// Parse an i64 and reject anything outside `[min, max]`.
pub fn parse_i64_in_range(bytes: &[u8], min: i64, max: i64) -> Result<i64> {
    let v = parse_i64(bytes)?;
    if v < min || v > max {
        return Err(EngineError::NotInteger);
    }
    Ok(v)
}

/// Parse a finite or infinite double. NaN is rejected.
pub fn parse_f64(bytes: &[u8]) -> Result<f64> {
    let s = std::str::from_utf8(bytes).map_err(|_| EngineError::NotFloat)?;
    if s.is_empty() || s.chars().any(|c| c.is_whitespace()) {
        return Err(EngineError::NotFloat);
    }
    let v: f64 = s.parse().map_err(|_| EngineError::NotFloat)?;
    if v.is_nan() {
        return Err(EngineError::NotFloat);
    }
    Ok(v)
}

/// Format a double the way the reference formats score and increment
/// replies: integers lose the decimal point, infinities print as `inf`.
pub fn format_f64(v: f64) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if v == v.trunc() && v.abs() < 1e17 {
        return format!("{}", v as i64);
    }
    // Rust's shortest round-trip formatting matches %.17g after zero-trim.
    format!("{v}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_i64_strictness() {
        assert_eq!(parse_i64(b"0").unwrap(), 0);
        assert_eq!(parse_i64(b"-1").unwrap(), -1);
        assert_eq!(parse_i64(b"9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(parse_i64(b"-9223372036854775808").unwrap(), i64::MIN);
        assert!(parse_i64(b"").is_err());
        assert!(parse_i64(b"+1").is_err());
        assert!(parse_i64(b"01").is_err());
        assert!(parse_i64(b" 1").is_err());
        assert!(parse_i64(b"1.0").is_err());
        assert!(parse_i64(b"9223372036854775808").is_err());
    }

    #[test]
    fn parse_f64_rejects_nan() {
        assert_eq!(parse_f64(b"1.5").unwrap(), 1.5);
        assert_eq!(parse_f64(b"inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_f64(b"-inf").unwrap(), f64::NEG_INFINITY);
        assert!(parse_f64(b"nan").is_err());
        assert!(parse_f64(b" 1").is_err());
        assert!(parse_f64(b"").is_err());
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_f64(1.0), "1");
        assert_eq!(format_f64(-3.0), "-3");
        assert_eq!(format_f64(1.5), "1.5");
        assert_eq!(format_f64(10.5), "10.5");
        assert_eq!(format_f64(f64::INFINITY), "inf");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_f64(3.0e30), "3e30");
    }
}
