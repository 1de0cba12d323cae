//! Generic keyspace commands: existence, expiry, renaming, scanning,
//! OBJECT introspection.

use rand::Rng;

use crate::error::EngineError;
use crate::glob::glob_match;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::store::{Value, ValueKind};

use super::{bulk_array, keyword, parse_cursor, parse_scan_opts, scan_page, scan_reply};

pub fn del(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut removed = 0i64;
    for key in args {
        st.expire_if_needed(s.db, key);
        if st.dbs[s.db].remove(key).is_some() {
            st.mark_write(s.db, key);
            st.notify_event(s.db, classes::GENERIC, "del", key);
            removed += 1;
        }
    }
    RespValue::Integer(removed)
}

pub fn exists(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut n = 0i64;
    for key in args {
        if st.exists(s.db, key) {
            n += 1;
        }
    }
    RespValue::Integer(n)
}

pub fn type_cmd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.kind_of(s.db, &args[0]) {
        Some(kind) => RespValue::simple(kind.as_str()),
        None => RespValue::simple("none"),
    }
}

pub fn keys(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let pattern = &args[0];
    let candidates: Vec<Vec<u8>> = st.dbs[s.db].keys().cloned().collect();
    let mut out = Vec::new();
    for key in candidates {
        if st.exists(s.db, &key) && glob_match(pattern, &key) {
            out.push(key);
        }
    }
    out.sort();
    bulk_array(out)
}

pub fn scan(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let cursor = match parse_cursor(&args[0]) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };
    // TYPE is SCAN-only; strip it before the shared MATCH/COUNT parser. An
    // unknown type name matches nothing, like the reference.
    let mut type_given = false;
    let mut type_filter: Option<ValueKind> = None;
    let mut rest: Vec<Vec<u8>> = Vec::new();
    let mut i = 1;
    while i < args.len() {
        if keyword(&args[i], "TYPE") && i + 1 < args.len() {
            type_given = true;
            let name = args[i + 1].to_ascii_lowercase();
            type_filter = match name.as_slice() {
                b"string" => Some(ValueKind::Str),
                b"list" => Some(ValueKind::List),
                b"hash" => Some(ValueKind::Hash),
                b"set" => Some(ValueKind::Set),
                b"zset" => Some(ValueKind::ZSet),
                b"stream" => Some(ValueKind::Stream),
                _ => None,
            };
            i += 2;
        } else {
            rest.push(args[i].clone());
            i += 1;
        }
    }
    let (pattern, count) = match parse_scan_opts(&rest) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };

    let mut all: Vec<Vec<u8>> = st.dbs[s.db].keys().cloned().collect();
    all.sort();
    let (next, page) = scan_page(all, cursor, count);
    let mut out = Vec::new();
    for key in page {
        if !st.exists(s.db, &key) {
            continue;
        }
        if let Some(p) = &pattern {
            if !glob_match(p, &key) {
                continue;
            }
        }
        if type_given && st.kind_of(s.db, &key) != type_filter {
            continue;
        }
        out.push(key);
    }
    scan_reply(next, out)
}

pub fn randomkey(st: &mut ServerState, s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    let mut keys: Vec<Vec<u8>> = st.dbs[s.db].keys().cloned().collect();
    keys.sort();
    while !keys.is_empty() {
        let idx = st.rng.gen_range(0..keys.len());
        let key = keys.swap_remove(idx);
        if st.exists(s.db, &key) {
            return RespValue::bulk(key);
        }
    }
    RespValue::null()
}

pub fn rename(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match do_rename(st, s, args, false) {
        Ok(v) => v,
        Err(e) => e.into(),
    }
}

pub fn renamenx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match do_rename(st, s, args, true) {
        Ok(v) => v,
        Err(e) => e.into(),
    }
}

fn do_rename(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    nx: bool,
) -> crate::error::Result<RespValue> {
    let (src, dst) = (&args[0], &args[1]);
    if !st.exists(s.db, src) {
        return Err(EngineError::NoSuchKey);
    }
    if nx && src != dst && st.exists(s.db, dst) {
        return Ok(RespValue::Integer(0));
    }
    if src != dst {
        let entry = st.dbs[s.db].remove(src).expect("checked above");
        st.dbs[s.db].insert(dst.clone(), entry);
    }
    st.mark_write(s.db, src);
    st.mark_write(s.db, dst);
    st.notify_event(s.db, classes::GENERIC, "rename_from", src);
    st.notify_event(s.db, classes::GENERIC, "rename_to", dst);
    Ok(if nx {
        RespValue::Integer(1)
    } else {
        RespValue::ok()
    })
}

pub fn copy(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (src, dst) = (&args[0], &args[1]);
    let mut dst_db = s.db;
    let mut replace = false;
    let mut i = 2;
    while i < args.len() {
        if keyword(&args[i], "DB") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 && (n as usize) < st.db_count() => dst_db = n as usize,
                Ok(_) => return EngineError::DbIndexOutOfRange.into(),
                Err(e) => return e.into(),
            }
            i += 2;
        } else if keyword(&args[i], "REPLACE") {
            replace = true;
            i += 1;
        } else {
            return EngineError::Syntax.into();
        }
    }
    if dst_db == s.db && src == dst {
        return EngineError::SameObject.into();
    }
    let Some(entry) = st.entry(s.db, src).cloned() else {
        return RespValue::Integer(0);
    };
    if !replace && st.exists(dst_db, dst) {
        return RespValue::Integer(0);
    }
    st.dbs[dst_db].insert(dst.clone(), entry);
    st.mark_write(dst_db, dst);
    st.notify_event(dst_db, classes::GENERIC, "copy_to", dst);
    RespValue::Integer(1)
}

pub fn move_cmd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let target = match parse_i64(&args[1]) {
        Ok(n) if n >= 0 && (n as usize) < st.db_count() => n as usize,
        Ok(_) => return EngineError::DbIndexOutOfRange.into(),
        Err(e) => return e.into(),
    };
    if target == s.db {
        return RespValue::error("ERR source and destination objects are the same");
    }
    if !st.exists(s.db, key) || st.exists(target, key) {
        return RespValue::Integer(0);
    }
    let entry = st.dbs[s.db].remove(key).expect("checked above");
    st.dbs[target].insert(key.clone(), entry);
    st.mark_write(s.db, key);
    st.mark_write(target, key);
    st.notify_event(s.db, classes::GENERIC, "move_from", key);
    st.notify_event(target, classes::GENERIC, "move_to", key);
    RespValue::Integer(1)
}

// --- expiry --------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum ExpireFlag {
    None,
    Nx,
    Xx,
    Gt,
    Lt,
}

fn parse_expire_flag(args: &[Vec<u8>]) -> Result<ExpireFlag, EngineError> {
    match args {
        [] => Ok(ExpireFlag::None),
        [flag] => {
            if keyword(flag, "NX") {
                Ok(ExpireFlag::Nx)
            } else if keyword(flag, "XX") {
                Ok(ExpireFlag::Xx)
            } else if keyword(flag, "GT") {
                Ok(ExpireFlag::Gt)
            } else if keyword(flag, "LT") {
                Ok(ExpireFlag::Lt)
            } else {
                Err(EngineError::other(format!(
                    "Unsupported option {}",
                    String::from_utf8_lossy(flag)
                )))
            }
        }
        _ => Err(EngineError::other(
            "NX and XX, GT or LT options at the same time are not compatible",
        )),
    }
}

/// Shared EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT implementation working on an
/// absolute millisecond deadline.
fn expire_generic(
    st: &mut ServerState,
    s: &mut Session,
    key: &[u8],
    when_ms: i64,
    flag: ExpireFlag,
) -> RespValue {
    if !st.exists(s.db, key) {
        return RespValue::Integer(0);
    }
    let current = st.entry_mut(s.db, key).and_then(|e| e.expires_at);
    let allowed = match flag {
        ExpireFlag::None => true,
        ExpireFlag::Nx => current.is_none(),
        ExpireFlag::Xx => current.is_some(),
        // A key without TTL behaves as an infinite deadline.
        ExpireFlag::Gt => current.map_or(false, |c| (when_ms as i128) > c as i128),
        ExpireFlag::Lt => current.map_or(true, |c| (when_ms as i128) < c as i128),
    };
    if !allowed {
        return RespValue::Integer(0);
    }

    if when_ms <= st.now_ms as i64 {
        st.dbs[s.db].remove(key);
        st.mark_write(s.db, key);
        st.notify_event(s.db, classes::GENERIC, "del", key);
        return RespValue::Integer(1);
    }
    if let Some(e) = st.entry_mut(s.db, key) {
        e.expires_at = Some(when_ms as u64);
    }
    st.mark_write(s.db, key);
    st.notify_event(s.db, classes::GENERIC, "expire", key);
    RespValue::Integer(1)
}

pub fn expire(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], unit_ms: i64) -> RespValue {
    let ttl = match parse_i64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let flag = match parse_expire_flag(&args[2..]) {
        Ok(f) => f,
        Err(e) => return e.into(),
    };
    let when = (st.now_ms as i64).saturating_add(ttl.saturating_mul(unit_ms));
    expire_generic(st, s, &args[0], when, flag)
}

pub fn expire_at(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    unit_ms: i64,
) -> RespValue {
    let when = match parse_i64(&args[1]) {
        Ok(v) => v.saturating_mul(unit_ms),
        Err(e) => return e.into(),
    };
    let flag = match parse_expire_flag(&args[2..]) {
        Ok(f) => f,
        Err(e) => return e.into(),
    };
    expire_generic(st, s, &args[0], when, flag)
}

pub fn ttl(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], in_ms: bool) -> RespValue {
    let pttl = st.pttl(s.db, &args[0]);
    if pttl < 0 || in_ms {
        return RespValue::Integer(pttl);
    }
    RespValue::Integer((pttl + 500) / 1000)
}

pub fn expiretime(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    in_ms: bool,
) -> RespValue {
    st.expire_if_needed(s.db, &args[0]);
    match st.dbs[s.db].get(&args[0]) {
        None => RespValue::Integer(-2),
        Some(e) => match e.expires_at {
            None => RespValue::Integer(-1),
            Some(at) => RespValue::Integer(if in_ms { at as i64 } else { at as i64 / 1000 }),
        },
    }
}

pub fn persist(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    st.expire_if_needed(s.db, &args[0]);
    match st.dbs[s.db].get_mut(&args[0]) {
        Some(e) if e.expires_at.is_some() => {
            e.expires_at = None;
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::GENERIC, "persist", &args[0]);
            RespValue::Integer(1)
        }
        _ => RespValue::Integer(0),
    }
}

// --- OBJECT --------------------------------------------------------------

fn all_parse_as_int(items: impl Iterator<Item = impl AsRef<[u8]>>) -> bool {
    for item in items {
        if parse_i64(item.as_ref()).is_err() {
            return false;
        }
    }
    true
}

pub fn encoding_of(st: &ServerState, value: &Value) -> &'static str {
    match value {
        Value::Str(v) => {
            if parse_i64(v).is_ok() {
                "int"
            } else if v.len() <= 44 {
                "embstr"
            } else {
                "raw"
            }
        }
        Value::List(l) => {
            let max = st.config_int("list-max-listpack-size", 128);
            if l.len() as i64 <= max && l.iter().all(|v| v.len() <= 64) {
                "listpack"
            } else {
                "quicklist"
            }
        }
        Value::Hash(h) => {
            let max_entries = st.config_int("hash-max-listpack-entries", 128);
            let max_value = st.config_int("hash-max-listpack-value", 64) as usize;
            if h.len() as i64 <= max_entries
                && h.iter()
                    .all(|(k, v)| k.len() <= max_value && v.len() <= max_value)
            {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::Set(set) => {
            if all_parse_as_int(set.iter())
                && set.len() as i64 <= st.config_int("set-max-intset-entries", 512)
            {
                "intset"
            } else if set.len() as i64 <= st.config_int("set-max-listpack-entries", 128)
                && set
                    .iter()
                    .all(|v| v.len() as i64 <= st.config_int("set-max-listpack-value", 64))
            {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::ZSet(z) => {
            let max_entries = st.config_int("zset-max-listpack-entries", 128);
            let max_value = st.config_int("zset-max-listpack-value", 64) as usize;
            if z.len() as i64 <= max_entries && z.iter().all(|(m, _)| m.len() <= max_value) {
                "listpack"
            } else {
                "skiplist"
            }
        }
        Value::Stream(_) => "stream",
    }
}

pub fn object(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"HELP" => bulk_array(vec![
            b"OBJECT <subcommand> [<arg> [value] [opt] ...]. Subcommands are:".to_vec(),
            b"ENCODING <key>".to_vec(),
            b"FREQ <key>".to_vec(),
            b"IDLETIME <key>".to_vec(),
            b"REFCOUNT <key>".to_vec(),
        ]),
        b"ENCODING" | b"REFCOUNT" | b"IDLETIME" | b"FREQ" => {
            let Some(key) = args.get(1) else {
                return RespValue::error(
                    "ERR Unknown subcommand or wrong number of arguments for 'OBJECT'. Try OBJECT HELP.",
                );
            };
            let Some(entry) = st.entry(s.db, key) else {
                return EngineError::NoSuchKey.into();
            };
            match sub.as_slice() {
                b"ENCODING" => {
                    let value = entry.value.clone();
                    RespValue::bulk(encoding_of(st, &value).as_bytes().to_vec())
                }
                b"REFCOUNT" => RespValue::Integer(1),
                b"IDLETIME" => RespValue::Integer(0),
                _ => RespValue::Integer(0),
            }
        }
        _ => RespValue::error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try OBJECT HELP.",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_encodings() {
        let st = test_state();
        assert_eq!(encoding_of(&st, &Value::Str(b"123".to_vec())), "int");
        assert_eq!(encoding_of(&st, &Value::Str(b"short".to_vec())), "embstr");
        assert_eq!(encoding_of(&st, &Value::Str(vec![b'x'; 45])), "raw");
    }

    #[test]
    fn set_encodings() {
        let st = test_state();
        let mut ints = std::collections::HashSet::new();
        ints.insert(b"1".to_vec());
        ints.insert(b"2".to_vec());
        assert_eq!(encoding_of(&st, &Value::Set(ints)), "intset");

        let mut strs = std::collections::HashSet::new();
        strs.insert(b"abc".to_vec());
        assert_eq!(encoding_of(&st, &Value::Set(strs)), "listpack");
    }

    fn test_state() -> ServerState {
        use crate::clock::ManualClock;
        use crate::script::NullScriptEngine;
        use crate::snapshot::MemorySnapshotter;
        use std::sync::Arc;
        ServerState::new(
            1,
            Arc::new(ManualClock::new(0)),
            Arc::new(NullScriptEngine),
            Arc::new(MemorySnapshotter::default()),
            0,
            None,
        )
    }
}
