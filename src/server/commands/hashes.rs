//! Hash commands.

use rand::Rng;

use crate::error::EngineError;
use crate::num::{format_f64, parse_f64, parse_i64};
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;

use super::{bulk_array, parse_cursor, parse_scan_opts, scan_page};

pub fn hset(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() % 2 != 1 {
        return RespValue::error("ERR wrong number of arguments for 'hset' command");
    }
    let added = {
        let hash = match st.hash_or_create(s.db, &args[0]) {
            Ok(h) => h,
            Err(e) => return e.into(),
        };
        let mut added = 0i64;
        for pair in args[1..].chunks(2) {
            if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        added
    };
    st.mark_write(s.db, &args[0]);
    st.notify_event(s.db, classes::HASH, "hset", &args[0]);
    RespValue::Integer(added)
}

pub fn hsetnx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let inserted = {
        let hash = match st.hash_or_create(s.db, &args[0]) {
            Ok(h) => h,
            Err(e) => return e.into(),
        };
        if hash.contains_key(&args[1]) {
            false
        } else {
            hash.insert(args[1].clone(), args[2].clone());
            true
        }
    };
    if inserted {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::HASH, "hset", &args[0]);
    } else {
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(if inserted { 1 } else { 0 })
}

pub fn hmset(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() % 2 != 1 {
        return RespValue::error("ERR wrong number of arguments for 'hmset' command");
    }
    match hset(st, s, args) {
        RespValue::Integer(_) => RespValue::ok(),
        other => other,
    }
}

pub fn hget(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => RespValue::Bulk(hash.get(&args[1]).cloned()),
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

pub fn hmget(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => RespValue::Array(Some(
            args[1..]
                .iter()
                .map(|f| RespValue::Bulk(hash.get(f).cloned()))
                .collect(),
        )),
        Ok(None) => RespValue::Array(Some(
            args[1..].iter().map(|_| RespValue::null()).collect(),
        )),
        Err(e) => e.into(),
    }
}

pub fn hdel(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let removed = match st.hash_mut(s.db, &args[0]) {
        Ok(Some(hash)) => {
            let mut n = 0i64;
            for field in &args[1..] {
                if hash.remove(field).is_some() {
                    n += 1;
                }
            }
            n
        }
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if removed > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::HASH, "hdel", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(removed)
}

pub fn hlen(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => RespValue::Integer(hash.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn hexists(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => RespValue::Integer(i64::from(hash.contains_key(&args[1]))),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn hstrlen(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => {
            RespValue::Integer(hash.get(&args[1]).map_or(0, |v| v.len() as i64))
        }
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

fn sorted_fields(hash: &std::collections::HashMap<Vec<u8>, Vec<u8>>) -> Vec<Vec<u8>> {
    let mut fields: Vec<Vec<u8>> = hash.keys().cloned().collect();
    fields.sort();
    fields
}

pub fn hkeys(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => bulk_array(sorted_fields(hash)),
        Ok(None) => RespValue::Array(Some(Vec::new())),
        Err(e) => e.into(),
    }
}

pub fn hvals(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => {
            let fields = sorted_fields(hash);
            bulk_array(
                fields
                    .into_iter()
                    .map(|f| hash.get(&f).cloned().unwrap_or_default())
                    .collect(),
            )
        }
        Ok(None) => RespValue::Array(Some(Vec::new())),
        Err(e) => e.into(),
    }
}

pub fn hgetall(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => {
            let pairs = sorted_fields(hash)
                .into_iter()
                .map(|f| {
                    let v = hash.get(&f).cloned().unwrap_or_default();
                    (RespValue::bulk(f), RespValue::bulk(v))
                })
                .collect();
            RespValue::Map(pairs)
        }
        Ok(None) => RespValue::Map(Vec::new()),
        Err(e) => e.into(),
    }
}

pub fn hincrby(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let delta = match parse_i64(&args[2]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let result = {
        let hash = match st.hash_or_create(s.db, &args[0]) {
            Ok(h) => h,
            Err(e) => return e.into(),
        };
        let current = match hash.get(&args[1]) {
            Some(v) => match parse_i64(v) {
                Ok(n) => n,
                Err(_) => {
                    return RespValue::error("ERR hash value is not an integer");
                }
            },
            None => 0,
        };
        match current.checked_add(delta) {
            Some(next) => {
                hash.insert(args[1].clone(), next.to_string().into_bytes());
                Ok(next)
            }
            None => Err(EngineError::IntegerOverflow),
        }
    };
    match result {
        Ok(next) => {
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::HASH, "hincrby", &args[0]);
            RespValue::Integer(next)
        }
        Err(e) => {
            st.drop_if_empty(s.db, &args[0]);
            e.into()
        }
    }
}

pub fn hincrbyfloat(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let delta = match parse_f64(&args[2]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let result = {
        let hash = match st.hash_or_create(s.db, &args[0]) {
            Ok(h) => h,
            Err(e) => return e.into(),
        };
        let current = match hash.get(&args[1]) {
            Some(v) => match parse_f64(v) {
                Ok(n) => n,
                Err(_) => {
                    return RespValue::error("ERR hash value is not a float");
                }
            },
            None => 0.0,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            Err(EngineError::FloatNanOrInfinity)
        } else {
            let encoded = format_f64(next).into_bytes();
            hash.insert(args[1].clone(), encoded.clone());
            Ok(encoded)
        }
    };
    match result {
        Ok(encoded) => {
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::HASH, "hincrbyfloat", &args[0]);
            RespValue::bulk(encoded)
        }
        Err(e) => {
            st.drop_if_empty(s.db, &args[0]);
            e.into()
        }
    }
}

pub fn hrandfield(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (count, with_values) = match args.get(1) {
        None => (None, false),
        Some(raw) => {
            let n = match parse_i64(raw) {
                Ok(v) => v,
                Err(e) => return e.into(),
            };
            let with_values = match args.get(2) {
                Some(w) if super::keyword(w, "WITHVALUES") => true,
                Some(_) => return EngineError::Syntax.into(),
                None => false,
            };
            (Some(n), with_values)
        }
    };

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => {
            let fields = sorted_fields(hash);
            fields
                .into_iter()
                .map(|f| {
                    let v = hash.get(&f).cloned().unwrap_or_default();
                    (f, v)
                })
                .collect()
        }
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };

    match count {
        None => {
            if pairs.is_empty() {
                return RespValue::null();
            }
            let idx = st.rng.gen_range(0..pairs.len());
            RespValue::bulk(pairs[idx].0.clone())
        }
        Some(n) => {
            if pairs.is_empty() {
                return RespValue::Array(Some(Vec::new()));
            }
            let chosen = sample(st, &pairs, n);
            let mut out = Vec::new();
            for (f, v) in chosen {
                out.push(RespValue::bulk(f));
                if with_values {
                    out.push(RespValue::bulk(v));
                }
            }
            RespValue::Array(Some(out))
        }
    }
}

/// Positive count: distinct sample, capped at the population. Negative
/// count: that many draws with repetition.
fn sample(
    st: &mut ServerState,
    pairs: &[(Vec<u8>, Vec<u8>)],
    count: i64,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    if count >= 0 {
        let take = (count as usize).min(pairs.len());
        let mut remaining: Vec<usize> = (0..pairs.len()).collect();
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let i = st.rng.gen_range(0..remaining.len());
            out.push(pairs[remaining.swap_remove(i)].clone());
        }
        out
    } else {
        let take = (-count) as usize;
        (0..take)
            .map(|_| pairs[st.rng.gen_range(0..pairs.len())].clone())
            .collect()
    }
}

pub fn hscan(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let cursor = match parse_cursor(&args[1]) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };
    let (pattern, count) = match parse_scan_opts(&args[2..]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = match st.hash(s.db, &args[0]) {
        Ok(Some(hash)) => sorted_fields(hash)
            .into_iter()
            .map(|f| {
                let v = hash.get(&f).cloned().unwrap_or_default();
                (f, v)
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };
    let (next, page) = scan_page(pairs, cursor, count);
    let mut flat = Vec::new();
    for (f, v) in page {
        if let Some(p) = &pattern {
            if !crate::glob::glob_match(p, &f) {
                continue;
            }
        }
        flat.push(RespValue::bulk(f));
        flat.push(RespValue::bulk(v));
    }
    RespValue::array(vec![
        RespValue::bulk(next.to_string().into_bytes()),
        RespValue::Array(Some(flat)),
    ])
}
