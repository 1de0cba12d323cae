//! Bitmap overlay on string values: SETBIT/GETBIT, counting, positions,
//! BITOP and BITFIELD.

use crate::error::EngineError;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;

use super::keyword;

/// 512 MiB string cap expressed in bits.
const MAX_BIT_OFFSET: i64 = 4 * 1024 * 1024 * 1024 - 1;

fn parse_bit_offset(raw: &[u8]) -> Result<usize, EngineError> {
    match parse_i64(raw) {
        Ok(n) if (0..=MAX_BIT_OFFSET).contains(&n) => Ok(n as usize),
        _ => Err(EngineError::BitOffsetNotInteger),
    }
}

pub fn setbit(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let offset = match parse_bit_offset(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let bit = match parse_i64(&args[2]) {
        Ok(0) => 0u8,
        Ok(1) => 1u8,
        _ => return EngineError::BitNotInteger.into(),
    };

    let byte_index = offset / 8;
    let bit_index = 7 - (offset % 8);
    match st.str_value(s.db, &args[0]) {
        Ok(Some(_)) => {}
        Ok(None) => st.write_string(s.db, &args[0], Vec::new(), false),
        Err(e) => return e.into(),
    }
    let old = {
        let value = match st.str_value_mut(s.db, &args[0]) {
            Ok(Some(v)) => v,
            _ => return EngineError::WrongType.into(),
        };
        if value.len() <= byte_index {
            value.resize(byte_index + 1, 0);
        }
        let old = (value[byte_index] >> bit_index) & 1;
        if bit == 1 {
            value[byte_index] |= 1 << bit_index;
        } else {
            value[byte_index] &= !(1 << bit_index);
        }
        old
    };
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "setbit", &args[0]);
    RespValue::Integer(i64::from(old))
}

pub fn getbit(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let offset = match parse_bit_offset(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => {
            let byte_index = offset / 8;
            let bit = if byte_index < v.len() {
                (v[byte_index] >> (7 - (offset % 8))) & 1
            } else {
                0
            };
            RespValue::Integer(i64::from(bit))
        }
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

/// Resolve a BYTE/BIT range over a value of `total` units to inclusive
/// bounds, or `None` for an empty selection.
fn resolve_range(start: i64, end: i64, total: usize) -> Option<(usize, usize)> {
    super::normalize_range(start, end, total)
}

pub fn bitcount(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let value = match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => v.clone(),
        Ok(None) => return RespValue::Integer(0),
        Err(e) => return e.into(),
    };
    let (mut start, mut end, mut by_bit) = (0i64, -1i64, false);
    match args.len() {
        1 => {}
        3 | 4 => {
            match (parse_i64(&args[1]), parse_i64(&args[2])) {
                (Ok(a), Ok(b)) => {
                    start = a;
                    end = b;
                }
                _ => return EngineError::NotInteger.into(),
            }
            if args.len() == 4 {
                if keyword(&args[3], "BIT") {
                    by_bit = true;
                } else if !keyword(&args[3], "BYTE") {
                    return EngineError::Syntax.into();
                }
            }
        }
        _ => return EngineError::Syntax.into(),
    }

    let count = if by_bit {
        match resolve_range(start, end, value.len() * 8) {
            Some((lo, hi)) => (lo..=hi)
                .filter(|&i| (value[i / 8] >> (7 - (i % 8))) & 1 == 1)
                .count(),
            None => 0,
        }
    } else {
        match resolve_range(start, end, value.len()) {
            Some((lo, hi)) => value[lo..=hi]
                .iter()
                .map(|b| b.count_ones() as usize)
                .sum(),
            None => 0,
        }
    };
    RespValue::Integer(count as i64)
}

pub fn bitpos(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let bit = match parse_i64(&args[1]) {
        Ok(0) => 0u8,
        Ok(1) => 1u8,
        _ => {
            return RespValue::error("ERR The bit argument must be 1 or 0.");
        }
    };
    let value = match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => v.clone(),
        Ok(None) => {
            // Absent key acts as an all-zeros string.
            return RespValue::Integer(if bit == 0 { 0 } else { -1 });
        }
        Err(e) => return e.into(),
    };

    let mut start = 0i64;
    let mut end = -1i64;
    let mut by_bit = false;
    let mut end_given = false;
    if args.len() >= 3 {
        match parse_i64(&args[2]) {
            Ok(v) => start = v,
            Err(e) => return e.into(),
        }
    }
    if args.len() >= 4 {
        end_given = true;
        match parse_i64(&args[3]) {
            Ok(v) => end = v,
            Err(e) => return e.into(),
        }
    }
    if args.len() == 5 {
        if keyword(&args[4], "BIT") {
            by_bit = true;
        } else if !keyword(&args[4], "BYTE") {
            return EngineError::Syntax.into();
        }
    } else if args.len() > 5 {
        return EngineError::Syntax.into();
    }

    let total_bits = value.len() * 8;
    let (lo_bit, hi_bit) = if by_bit {
        match resolve_range(start, end, total_bits) {
            Some(r) => r,
            None => return RespValue::Integer(-1),
        }
    } else {
        match resolve_range(start, end, value.len()) {
            Some((lo, hi)) => (lo * 8, hi * 8 + 7),
            None => return RespValue::Integer(-1),
        }
    };

    for i in lo_bit..=hi_bit.min(total_bits - 1) {
        if (value[i / 8] >> (7 - (i % 8))) & 1 == bit {
            return RespValue::Integer(i as i64);
        }
    }
    // Looking for 0 in an all-ones string with an open-ended range acts as
    // if the string had one more zero byte.
    if bit == 0 && !end_given {
        return RespValue::Integer(total_bits as i64);
    }
    RespValue::Integer(-1)
}

pub fn bitop(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let op = args[0].to_ascii_uppercase();
    let dest = &args[1];
    let sources = &args[2..];
    if op == b"NOT" && sources.len() != 1 {
        return RespValue::error("ERR BITOP NOT must be called with a single source key.");
    }

    let mut values = Vec::with_capacity(sources.len());
    for key in sources {
        match st.str_value(s.db, key) {
            Ok(v) => values.push(v.cloned().unwrap_or_default()),
            Err(e) => return e.into(),
        }
    }

    let result: Vec<u8> = match op.as_slice() {
        b"NOT" => values[0].iter().map(|b| !b).collect(),
        b"AND" | b"OR" | b"XOR" => {
            let max_len = values.iter().map(Vec::len).max().unwrap_or(0);
            let mut out = vec![0u8; max_len];
            for (i, slot) in out.iter_mut().enumerate() {
                let mut acc: Option<u8> = None;
                for v in &values {
                    let byte = v.get(i).copied().unwrap_or(0);
                    acc = Some(match (acc, op.as_slice()) {
                        (None, _) => byte,
                        (Some(a), b"AND") => a & byte,
                        (Some(a), b"OR") => a | byte,
                        (Some(a), _) => a ^ byte,
                    });
                }
                *slot = acc.unwrap_or(0);
            }
            out
        }
        _ => return EngineError::Syntax.into(),
    };

    st.expire_if_needed(s.db, dest);
    if result.is_empty() {
        if st.dbs[s.db].remove(dest).is_some() {
            st.mark_write(s.db, dest);
            st.notify_event(s.db, classes::GENERIC, "del", dest);
        }
        return RespValue::Integer(0);
    }
    let len = result.len();
    st.write_string(s.db, dest, result, false);
    st.mark_write(s.db, dest);
    st.notify_event(s.db, classes::STRING, "set", dest);
    RespValue::Integer(len as i64)
}

// --- BITFIELD ------------------------------------------------------------

#[derive(Clone, Copy)]
struct FieldType {
    signed: bool,
    bits: u32,
}

fn parse_field_type(raw: &[u8]) -> Result<FieldType, EngineError> {
    let err = || {
        EngineError::other(
            "Invalid bitfield type. Use something like i16 u8. Note that u64 is not supported but i64 is.",
        )
    };
    let (signed, rest) = match raw.split_first() {
        Some((b'i', rest)) => (true, rest),
        Some((b'u', rest)) => (false, rest),
        _ => return Err(err()),
    };
    let bits: u32 = std::str::from_utf8(rest)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(err)?;
    if bits == 0 || bits > 64 || (!signed && bits > 63) {
        return Err(err());
    }
    Ok(FieldType { signed, bits })
}

fn parse_field_offset(raw: &[u8], ty: FieldType) -> Result<usize, EngineError> {
    let (multiply, digits) = match raw.split_first() {
        Some((b'#', rest)) => (true, rest),
        _ => (false, raw),
    };
    let n = parse_i64(digits).map_err(|_| EngineError::BitOffsetNotInteger)?;
    if n < 0 {
        return Err(EngineError::BitOffsetNotInteger);
    }
    let offset = if multiply {
        (n as u64).checked_mul(u64::from(ty.bits))
    } else {
        Some(n as u64)
    }
    .ok_or(EngineError::BitOffsetNotInteger)?;
    if offset > MAX_BIT_OFFSET as u64 {
        return Err(EngineError::BitOffsetNotInteger);
    }
    Ok(offset as usize)
}

fn read_field(value: &[u8], offset: usize, ty: FieldType) -> i64 {
    let mut acc: u64 = 0;
    for i in 0..ty.bits as usize {
        let bit_index = offset + i;
        let byte = bit_index / 8;
        let bit = if byte < value.len() {
            (value[byte] >> (7 - (bit_index % 8))) & 1
        } else {
            0
        };
        acc = (acc << 1) | u64::from(bit);
    }
    if ty.signed && ty.bits < 64 && (acc >> (ty.bits - 1)) & 1 == 1 {
        (acc as i64) - (1i64 << ty.bits)
    } else {
        acc as i64
    }
}

fn write_field(value: &mut Vec<u8>, offset: usize, ty: FieldType, raw: i64) {
    let needed = (offset + ty.bits as usize + 7) / 8;
    if value.len() < needed {
        value.resize(needed, 0);
    }
    let unsigned = raw as u64;
    for i in 0..ty.bits as usize {
        let bit = (unsigned >> (ty.bits as usize - 1 - i)) & 1;
        let bit_index = offset + i;
        let byte = bit_index / 8;
        let shift = 7 - (bit_index % 8);
        if bit == 1 {
            value[byte] |= 1 << shift;
        } else {
            value[byte] &= !(1 << shift);
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Overflow {
    Wrap,
    Sat,
    Fail,
}

fn field_bounds(ty: FieldType) -> (i64, i64) {
    if ty.signed {
        if ty.bits == 64 {
            (i64::MIN, i64::MAX)
        } else {
            (-(1i64 << (ty.bits - 1)), (1i64 << (ty.bits - 1)) - 1)
        }
    } else {
        (0, (1i64 << ty.bits) - 1)
    }
}

/// Apply overflow policy; `None` means FAIL suppressed the write.
fn clamp(value: i128, ty: FieldType, overflow: Overflow) -> Option<i64> {
    let (min, max) = field_bounds(ty);
    if value >= i128::from(min) && value <= i128::from(max) {
        return Some(value as i64);
    }
    match overflow {
        Overflow::Fail => None,
        Overflow::Sat => Some(if value < i128::from(min) { min } else { max }),
        Overflow::Wrap => {
            let span = i128::from(max) - i128::from(min) + 1;
            let mut v = (value - i128::from(min)) % span;
            if v < 0 {
                v += span;
            }
            Some((v + i128::from(min)) as i64)
        }
    }
}

pub fn bitfield(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    read_only: bool,
) -> RespValue {
    let key = &args[0];
    let mut value = match st.str_value(s.db, key) {
        Ok(v) => v.cloned().unwrap_or_default(),
        Err(e) => return e.into(),
    };

    let mut overflow = Overflow::Wrap;
    let mut results = Vec::new();
    let mut wrote = false;
    let mut i = 1;
    while i < args.len() {
        if keyword(&args[i], "OVERFLOW") {
            if read_only {
                return RespValue::error(
                    "ERR BITFIELD_RO only supports the GET subcommand",
                );
            }
            let Some(mode) = args.get(i + 1) else {
                return EngineError::Syntax.into();
            };
            overflow = if keyword(mode, "WRAP") {
                Overflow::Wrap
            } else if keyword(mode, "SAT") {
                Overflow::Sat
            } else if keyword(mode, "FAIL") {
                Overflow::Fail
            } else {
                return RespValue::error("ERR Invalid OVERFLOW type specified");
            };
            i += 2;
        } else if keyword(&args[i], "GET") {
            if i + 2 >= args.len() {
                return EngineError::Syntax.into();
            }
            let ty = match parse_field_type(&args[i + 1]) {
                Ok(t) => t,
                Err(e) => return e.into(),
            };
            let offset = match parse_field_offset(&args[i + 2], ty) {
                Ok(o) => o,
                Err(e) => return e.into(),
            };
            results.push(RespValue::Integer(read_field(&value, offset, ty)));
            i += 3;
        } else if keyword(&args[i], "SET") || keyword(&args[i], "INCRBY") {
            if read_only {
                return RespValue::error(
                    "ERR BITFIELD_RO only supports the GET subcommand",
                );
            }
            if i + 3 >= args.len() {
                return EngineError::Syntax.into();
            }
            let is_set = keyword(&args[i], "SET");
            let ty = match parse_field_type(&args[i + 1]) {
                Ok(t) => t,
                Err(e) => return e.into(),
            };
            let offset = match parse_field_offset(&args[i + 2], ty) {
                Ok(o) => o,
                Err(e) => return e.into(),
            };
            let operand = match parse_i64(&args[i + 3]) {
                Ok(v) => v,
                Err(e) => return e.into(),
            };
            let current = read_field(&value, offset, ty);
            if is_set {
                match clamp(i128::from(operand), ty, overflow) {
                    Some(next) => {
                        write_field(&mut value, offset, ty, next);
                        wrote = true;
                        results.push(RespValue::Integer(current));
                    }
                    None => results.push(RespValue::null()),
                }
            } else {
                match clamp(i128::from(current) + i128::from(operand), ty, overflow) {
                    Some(next) => {
                        write_field(&mut value, offset, ty, next);
                        wrote = true;
                        results.push(RespValue::Integer(next));
                    }
                    None => results.push(RespValue::null()),
                }
            }
            i += 4;
        } else {
            return EngineError::Syntax.into();
        }
    }

    if wrote {
        match st.str_value_mut(s.db, key) {
            Ok(Some(v)) => *v = value,
            Ok(None) => st.write_string(s.db, key, value, false),
            Err(e) => return e.into(),
        }
        st.mark_write(s.db, key);
        st.notify_event(s.db, classes::STRING, "setbit", key);
    }
    RespValue::Array(Some(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    const U8: FieldType = FieldType {
        signed: false,
        bits: 8,
    };
    const I8: FieldType = FieldType {
        signed: true,
        bits: 8,
    };

    #[test]
    fn field_round_trip() {
        let mut v = Vec::new();
        write_field(&mut v, 0, U8, 255);
        assert_eq!(read_field(&v, 0, U8), 255);
        write_field(&mut v, 3, I8, -1);
        assert_eq!(read_field(&v, 3, I8), -1);
    }

    #[test]
    fn overflow_policies() {
        assert_eq!(clamp(300, U8, Overflow::Wrap), Some(44));
        assert_eq!(clamp(300, U8, Overflow::Sat), Some(255));
        assert_eq!(clamp(300, U8, Overflow::Fail), None);
        assert_eq!(clamp(-1, U8, Overflow::Wrap), Some(255));
        assert_eq!(clamp(-200, I8, Overflow::Sat), Some(-128));
        assert_eq!(clamp(130, I8, Overflow::Wrap), Some(-126));
    }

    #[test]
    fn type_parsing() {
        assert!(parse_field_type(b"u8").is_ok());
        assert!(parse_field_type(b"i64").is_ok());
        assert!(parse_field_type(b"u64").is_err());
        assert!(parse_field_type(b"x8").is_err());
        assert!(parse_field_type(b"u0").is_err());
    }
}
