//! String commands, including the numeric interpretations and LCS.

use crate::error::{EngineError, Result};
use crate::num::{format_f64, parse_f64, parse_i64};
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::store::{Entry, Value};

use super::keyword;

const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

pub fn get(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => RespValue::bulk(v.clone()),
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

#[derive(Default)]
struct SetOptions {
    nx: bool,
    xx: bool,
    get: bool,
    keep_ttl: bool,
    expire_at: Option<u64>,
}

fn parse_set_options(st: &ServerState, args: &[Vec<u8>]) -> Result<SetOptions> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if keyword(arg, "NX") {
            opts.nx = true;
        } else if keyword(arg, "XX") {
            opts.xx = true;
        } else if keyword(arg, "GET") {
            opts.get = true;
        } else if keyword(arg, "KEEPTTL") {
            opts.keep_ttl = true;
        } else if keyword(arg, "EX") || keyword(arg, "PX") || keyword(arg, "EXAT")
            || keyword(arg, "PXAT")
        {
            i += 1;
            let Some(raw) = args.get(i) else {
                return Err(EngineError::Syntax);
            };
            let n = parse_i64(raw)?;
            if n <= 0 && (keyword(arg, "EX") || keyword(arg, "PX")) {
                return Err(EngineError::InvalidExpireTime("set".into()));
            }
            let at = if keyword(arg, "EX") {
                st.now_ms.saturating_add((n as u64).saturating_mul(1000))
            } else if keyword(arg, "PX") {
                st.now_ms.saturating_add(n as u64)
            } else if keyword(arg, "EXAT") {
                (n.max(0) as u64).saturating_mul(1000)
            } else {
                n.max(0) as u64
            };
            if opts.expire_at.is_some() || opts.keep_ttl {
                return Err(EngineError::Syntax);
            }
            opts.expire_at = Some(at);
        } else {
            return Err(EngineError::Syntax);
        }
        i += 1;
    }
    if opts.nx && opts.xx {
        return Err(EngineError::Syntax);
    }
    if opts.keep_ttl && opts.expire_at.is_some() {
        return Err(EngineError::Syntax);
    }
    Ok(opts)
}

pub fn set(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let value = args[1].clone();
    let opts = match parse_set_options(st, &args[2..]) {
        Ok(o) => o,
        Err(e) => return e.into(),
    };

    st.expire_if_needed(s.db, key);
    let existing_kind = st.dbs[s.db].get(key).map(|e| e.value.kind());
    let old = if opts.get {
        match st.dbs[s.db].get(key) {
            Some(e) => match &e.value {
                Value::Str(v) => Some(v.clone()),
                _ => return EngineError::WrongType.into(),
            },
            None => None,
        }
    } else {
        None
    };

    let exists = existing_kind.is_some();
    if (opts.nx && exists) || (opts.xx && !exists) {
        return if opts.get {
            RespValue::Bulk(old)
        } else {
            RespValue::null()
        };
    }

    let prior_expiry = st.dbs[s.db].get(key).and_then(|e| e.expires_at);
    let expires_at = if opts.keep_ttl {
        prior_expiry
    } else {
        opts.expire_at
    };
    if !exists {
        st.notify_event(s.db, classes::NEW, "new", key);
    }
    st.dbs[s.db].insert(key.clone(), Entry::with_expiry(Value::Str(value), expires_at));
    st.mark_write(s.db, key);
    st.notify_event(s.db, classes::STRING, "set", key);

    if opts.get {
        RespValue::Bulk(old)
    } else {
        RespValue::ok()
    }
}

pub fn setnx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if st.exists(s.db, &args[0]) {
        return RespValue::Integer(0);
    }
    st.write_string(s.db, &args[0], args[1].clone(), false);
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "set", &args[0]);
    RespValue::Integer(1)
}

fn setex_like(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    unit_ms: u64,
    name: &str,
) -> RespValue {
    let secs = match parse_i64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    if secs <= 0 {
        return EngineError::InvalidExpireTime(name.into()).into();
    }
    let at = st
        .now_ms
        .saturating_add((secs as u64).saturating_mul(unit_ms));
    st.write_string(s.db, &args[0], args[2].clone(), false);
    if let Some(e) = st.entry_mut(s.db, &args[0]) {
        e.expires_at = Some(at);
    }
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "set", &args[0]);
    RespValue::ok()
}

pub fn setex(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    setex_like(st, s, args, 1000, "setex")
}

pub fn psetex(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    setex_like(st, s, args, 1, "psetex")
}

pub fn getset(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let old = match st.str_value(s.db, &args[0]) {
        Ok(v) => v.cloned(),
        Err(e) => return e.into(),
    };
    st.write_string(s.db, &args[0], args[1].clone(), false);
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "set", &args[0]);
    RespValue::Bulk(old)
}

pub fn getdel(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let old = match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => v.clone(),
        Ok(None) => return RespValue::null(),
        Err(e) => return e.into(),
    };
    st.dbs[s.db].remove(&args[0]);
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::GENERIC, "del", &args[0]);
    RespValue::bulk(old)
}

pub fn getex(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let value = match st.str_value(s.db, key) {
        Ok(Some(v)) => v.clone(),
        Ok(None) => return RespValue::null(),
        Err(e) => return e.into(),
    };

    let tail = &args[1..];
    let mut new_expiry: Option<Option<u64>> = None;
    let mut i = 0;
    while i < tail.len() {
        let arg = &tail[i];
        if keyword(arg, "PERSIST") {
            if new_expiry.is_some() {
                return EngineError::Syntax.into();
            }
            new_expiry = Some(None);
        } else if keyword(arg, "EX") || keyword(arg, "PX") || keyword(arg, "EXAT")
            || keyword(arg, "PXAT")
        {
            i += 1;
            let Some(raw) = tail.get(i) else {
                return EngineError::Syntax.into();
            };
            let n = match parse_i64(raw) {
                Ok(v) => v,
                Err(e) => return e.into(),
            };
            if n <= 0 && (keyword(arg, "EX") || keyword(arg, "PX")) {
                return EngineError::InvalidExpireTime("getex".into()).into();
            }
            let at = if keyword(arg, "EX") {
                st.now_ms.saturating_add((n as u64).saturating_mul(1000))
            } else if keyword(arg, "PX") {
                st.now_ms.saturating_add(n as u64)
            } else if keyword(arg, "EXAT") {
                (n.max(0) as u64).saturating_mul(1000)
            } else {
                n.max(0) as u64
            };
            if new_expiry.is_some() {
                return EngineError::Syntax.into();
            }
            new_expiry = Some(Some(at));
        } else {
            return EngineError::Syntax.into();
        }
        i += 1;
    }

    if let Some(expiry) = new_expiry {
        if let Some(e) = st.entry_mut(s.db, key) {
            e.expires_at = expiry;
        }
        st.mark_write(s.db, key);
        let event = if expiry.is_some() { "expire" } else { "persist" };
        st.notify_event(s.db, classes::GENERIC, event, key);
    }
    RespValue::bulk(value)
}

pub fn append(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let len = match st.str_value_mut(s.db, &args[0]) {
        Ok(Some(v)) => {
            if v.len() + args[1].len() > MAX_STRING_LEN {
                return EngineError::StringTooLong.into();
            }
            v.extend_from_slice(&args[1]);
            v.len()
        }
        Ok(None) => {
            st.write_string(s.db, &args[0], args[1].clone(), false);
            args[1].len()
        }
        Err(e) => return e.into(),
    };
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "append", &args[0]);
    RespValue::Integer(len as i64)
}

pub fn strlen(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => RespValue::Integer(v.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn getrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (start, end) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::NotInteger.into(),
    };
    match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => match super::normalize_range(start, end, v.len()) {
            Some((s0, e0)) => RespValue::bulk(v[s0..=e0].to_vec()),
            None => RespValue::bulk(Vec::new()),
        },
        Ok(None) => RespValue::bulk(Vec::new()),
        Err(e) => e.into(),
    }
}

pub fn setrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let offset = match parse_i64(&args[1]) {
        Ok(v) if v >= 0 => v as usize,
        Ok(_) => return EngineError::OffsetOutOfRange.into(),
        Err(e) => return e.into(),
    };
    let patch = &args[2];
    if offset + patch.len() > MAX_STRING_LEN {
        return EngineError::StringTooLong.into();
    }

    let existing = match st.str_value(s.db, &args[0]) {
        Ok(v) => v.cloned(),
        Err(e) => return e.into(),
    };
    if existing.is_none() && patch.is_empty() {
        return RespValue::Integer(0);
    }

    let mut value = existing.unwrap_or_default();
    if value.len() < offset + patch.len() {
        value.resize(offset + patch.len(), 0);
    }
    value[offset..offset + patch.len()].copy_from_slice(patch);
    let len = value.len();

    match st.str_value_mut(s.db, &args[0]) {
        Ok(Some(v)) => *v = value,
        Ok(None) => st.write_string(s.db, &args[0], value, false),
        Err(e) => return e.into(),
    }
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "setrange", &args[0]);
    RespValue::Integer(len as i64)
}

fn incr_decr(st: &mut ServerState, s: &mut Session, key: &[u8], delta: i64) -> RespValue {
    let current = match st.str_value(s.db, key) {
        Ok(Some(v)) => match parse_i64(v) {
            Ok(n) => n,
            Err(e) => return e.into(),
        },
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    let Some(next) = current.checked_add(delta) else {
        return EngineError::IntegerOverflow.into();
    };
    let encoded = next.to_string().into_bytes();
    match st.str_value_mut(s.db, key) {
        Ok(Some(v)) => *v = encoded,
        Ok(None) => st.write_string(s.db, key, encoded, false),
        Err(e) => return e.into(),
    }
    st.mark_write(s.db, key);
    st.notify_event(s.db, classes::STRING, "incrby", key);
    RespValue::Integer(next)
}

pub fn incr(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    incr_decr(st, s, &args[0], 1)
}

pub fn decr(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    incr_decr(st, s, &args[0], -1)
}

pub fn incrby(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match parse_i64(&args[1]) {
        Ok(delta) => incr_decr(st, s, &args[0], delta),
        Err(e) => e.into(),
    }
}

pub fn decrby(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match parse_i64(&args[1]) {
        Ok(delta) if delta != i64::MIN => incr_decr(st, s, &args[0], -delta),
        Ok(_) => EngineError::IntegerOverflow.into(),
        Err(e) => e.into(),
    }
}

pub fn incrbyfloat(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let delta = match parse_f64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let current = match st.str_value(s.db, &args[0]) {
        Ok(Some(v)) => match parse_f64(v) {
            Ok(n) => n,
            Err(e) => return e.into(),
        },
        Ok(None) => 0.0,
        Err(e) => return e.into(),
    };
    let next = current + delta;
    if next.is_nan() || next.is_infinite() {
        return EngineError::FloatNanOrInfinity.into();
    }
    let encoded = format_f64(next).into_bytes();
    match st.str_value_mut(s.db, &args[0]) {
        Ok(Some(v)) => *v = encoded.clone(),
        Ok(None) => st.write_string(s.db, &args[0], encoded.clone(), false),
        Err(e) => return e.into(),
    }
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::STRING, "incrbyfloat", &args[0]);
    RespValue::bulk(encoded)
}

pub fn mget(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let values = args
        .iter()
        .map(|key| match st.entry(s.db, key) {
            Some(e) => match &e.value {
                Value::Str(v) => RespValue::bulk(v.clone()),
                _ => RespValue::null(),
            },
            None => RespValue::null(),
        })
        .collect();
    RespValue::Array(Some(values))
}

pub fn mset(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() % 2 != 0 {
        return RespValue::error("ERR wrong number of arguments for 'mset' command");
    }
    for pair in args.chunks(2) {
        st.write_string(s.db, &pair[0], pair[1].clone(), false);
        st.mark_write(s.db, &pair[0]);
        st.notify_event(s.db, classes::STRING, "set", &pair[0]);
    }
    RespValue::ok()
}

pub fn msetnx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() % 2 != 0 {
        return RespValue::error("ERR wrong number of arguments for 'msetnx' command");
    }
    for pair in args.chunks(2) {
        if st.exists(s.db, &pair[0]) {
            return RespValue::Integer(0);
        }
    }
    for pair in args.chunks(2) {
        st.write_string(s.db, &pair[0], pair[1].clone(), false);
        st.mark_write(s.db, &pair[0]);
        st.notify_event(s.db, classes::STRING, "set", &pair[0]);
    }
    RespValue::Integer(1)
}

// --- LCS ----------------------------------------------------------------

struct LcsMatch {
    a_start: usize,
    a_end: usize,
    b_start: usize,
    b_end: usize,
}

fn lcs_table(a: &[u8], b: &[u8]) -> Vec<Vec<u32>> {
    let mut dp = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp
}

fn lcs_backtrack(a: &[u8], b: &[u8], dp: &[Vec<u32>]) -> (Vec<u8>, Vec<LcsMatch>) {
    let mut sequence = Vec::new();
    let mut matches = Vec::new();
    let (mut i, mut j) = (a.len(), b.len());
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            let (a_end, b_end) = (i - 1, j - 1);
            while i > 0 && j > 0 && a[i - 1] == b[j - 1] {
                sequence.push(a[i - 1]);
                i -= 1;
                j -= 1;
            }
            matches.push(LcsMatch {
                a_start: i,
                a_end,
                b_start: j,
                b_end,
            });
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    sequence.reverse();
    (sequence, matches)
}

pub fn lcs(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut want_len = false;
    let mut want_idx = false;
    let mut with_match_len = false;
    let mut min_match_len = 0usize;
    let mut i = 2;
    while i < args.len() {
        if keyword(&args[i], "LEN") {
            want_len = true;
        } else if keyword(&args[i], "IDX") {
            want_idx = true;
        } else if keyword(&args[i], "WITHMATCHLEN") {
            with_match_len = true;
        } else if keyword(&args[i], "MINMATCHLEN") && i + 1 < args.len() {
            i += 1;
            match parse_i64(&args[i]) {
                Ok(n) if n >= 0 => min_match_len = n as usize,
                _ => return EngineError::NotInteger.into(),
            }
        } else {
            return EngineError::Syntax.into();
        }
        i += 1;
    }
    if want_len && want_idx {
        return RespValue::error(
            "ERR If you want both the length and indexes, please just use IDX.",
        );
    }

    let a = match st.str_value(s.db, &args[0]) {
        Ok(v) => v.cloned().unwrap_or_default(),
        Err(e) => return e.into(),
    };
    let b = match st.str_value(s.db, &args[1]) {
        Ok(v) => v.cloned().unwrap_or_default(),
        Err(e) => return e.into(),
    };

    let dp = lcs_table(&a, &b);
    let total = dp[a.len()][b.len()] as i64;
    if want_len {
        return RespValue::Integer(total);
    }
    let (sequence, matches) = lcs_backtrack(&a, &b, &dp);
    if !want_idx {
        return RespValue::bulk(sequence);
    }

    let match_frames = matches
        .into_iter()
        .filter(|m| m.a_end - m.a_start + 1 >= min_match_len)
        .map(|m| {
            let mut parts = vec![
                RespValue::array(vec![
                    RespValue::Integer(m.a_start as i64),
                    RespValue::Integer(m.a_end as i64),
                ]),
                RespValue::array(vec![
                    RespValue::Integer(m.b_start as i64),
                    RespValue::Integer(m.b_end as i64),
                ]),
            ];
            if with_match_len {
                parts.push(RespValue::Integer((m.a_end - m.a_start + 1) as i64));
            }
            RespValue::array(parts)
        })
        .collect();
    RespValue::Map(vec![
        (
            RespValue::bulk(b"matches".to_vec()),
            RespValue::Array(Some(match_frames)),
        ),
        (RespValue::bulk(b"len".to_vec()), RespValue::Integer(total)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcs_of_reference_example() {
        let a = b"ohmytext";
        let b = b"mynewtext";
        let dp = lcs_table(a, b);
        assert_eq!(dp[a.len()][b.len()], 6);
        let (seq, matches) = lcs_backtrack(a, b, &dp);
        assert_eq!(seq, b"mytext".to_vec());
        // Two runs: "text" (reported first) and "my".
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].a_start, 4);
        assert_eq!(matches[0].a_end, 7);
        assert_eq!(matches[0].b_start, 5);
        assert_eq!(matches[0].b_end, 8);
        assert_eq!(matches[1].a_start, 2);
        assert_eq!(matches[1].a_end, 3);
    }

    #[test]
    fn lcs_empty_inputs() {
        let dp = lcs_table(b"", b"abc");
        assert_eq!(dp[0][3], 0);
        let (seq, matches) = lcs_backtrack(b"", b"abc", &dp);
        assert!(seq.is_empty());
        assert!(matches.is_empty());
    }
}
