//! Command handlers, one module per family. Handlers receive the argument
//! tail (command name stripped, arity already validated by the dispatcher)
//! and return a protocol-agnostic reply frame.

pub mod admin;
pub mod bitmaps;
pub mod geo;
pub mod hashes;
pub mod hyperloglog;
pub mod keyspace;
pub mod lists;
pub mod pubsub;
pub mod scripting;
pub mod sets;
pub mod strings;
pub mod streams;
pub mod zsets;

use crate::error::{EngineError, Result};
use crate::num::parse_i64;
use crate::resp::RespValue;

/// Case-insensitive keyword comparison for option parsing.
pub(crate) fn keyword(arg: &[u8], word: &str) -> bool {
    arg.eq_ignore_ascii_case(word.as_bytes())
}

pub(crate) fn bulk_array(items: Vec<Vec<u8>>) -> RespValue {
    RespValue::Array(Some(items.into_iter().map(RespValue::bulk).collect()))
}

/// LRANGE-style index normalization: negative indexes count from the end,
/// the stop index is inclusive. `None` when the range selects nothing.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Fractional-second timeout for the blocking family.
pub(crate) fn parse_timeout(arg: &[u8]) -> Result<f64> {
    let s = std::str::from_utf8(arg).map_err(|_| EngineError::TimeoutNotFloat)?;
    let v: f64 = s.parse().map_err(|_| EngineError::TimeoutNotFloat)?;
    if v.is_nan() || v.is_infinite() {
        return Err(EngineError::TimeoutNotFloat);
    }
    if v < 0.0 {
        return Err(EngineError::TimeoutNegative);
    }
    Ok(v)
}

/// Cursor-based pagination shared by SCAN/HSCAN/SSCAN/ZSCAN: items arrive
/// sorted, the cursor is a position into that ordering.
pub(crate) fn scan_page<T>(items: Vec<T>, cursor: u64, count: usize) -> (u64, Vec<T>) {
    let start = cursor as usize;
    if start >= items.len() {
        return (0, Vec::new());
    }
    let end = (start + count.max(1)).min(items.len());
    let next = if end >= items.len() { 0 } else { end as u64 };
    (next, items.into_iter().skip(start).take(end - start).collect())
}

pub(crate) fn parse_cursor(arg: &[u8]) -> Result<u64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(EngineError::InvalidCursor)
}

/// MATCH/COUNT option tail shared by the SCAN family. Returns
/// `(pattern, count)`.
pub(crate) fn parse_scan_opts(args: &[Vec<u8>]) -> Result<(Option<Vec<u8>>, usize)> {
    let mut pattern = None;
    let mut count = 10usize;
    let mut i = 0;
    while i < args.len() {
        if keyword(&args[i], "MATCH") && i + 1 < args.len() {
            pattern = Some(args[i + 1].clone());
            i += 2;
        } else if keyword(&args[i], "COUNT") && i + 1 < args.len() {
            let n = parse_i64(&args[i + 1])?;
            if n < 1 {
                return Err(EngineError::Syntax);
            }
            count = n as usize;
            i += 2;
        } else {
            return Err(EngineError::Syntax);
        }
    }
    Ok((pattern, count))
}

pub(crate) fn scan_reply(next_cursor: u64, items: Vec<Vec<u8>>) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk(next_cursor.to_string().into_bytes()),
        bulk_array(items),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_normalization() {
        assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
        assert_eq!(normalize_range(-2, -1, 3), Some((1, 2)));
        assert_eq!(normalize_range(1, 0, 3), None);
        assert_eq!(normalize_range(5, 10, 3), None);
        assert_eq!(normalize_range(0, 100, 3), Some((0, 2)));
        assert_eq!(normalize_range(0, 0, 0), None);
    }

    #[test]
    fn timeouts() {
        assert_eq!(parse_timeout(b"0").unwrap(), 0.0);
        assert_eq!(parse_timeout(b"1.5").unwrap(), 1.5);
        assert!(matches!(
            parse_timeout(b"-1"),
            Err(EngineError::TimeoutNegative)
        ));
        assert!(matches!(
            parse_timeout(b"abc"),
            Err(EngineError::TimeoutNotFloat)
        ));
    }

    #[test]
    fn scan_pagination() {
        let items: Vec<i32> = (0..25).collect();
        let (next, page) = scan_page(items.clone(), 0, 10);
        assert_eq!(next, 10);
        assert_eq!(page.len(), 10);
        let (next, page) = scan_page(items.clone(), 20, 10);
        assert_eq!(next, 0);
        assert_eq!(page.len(), 5);
        let (next, page) = scan_page(items, 99, 10);
        assert_eq!(next, 0);
        assert!(page.is_empty());
    }
}
