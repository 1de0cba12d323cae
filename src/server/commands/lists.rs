//! List commands: both-end push/pop, ranges, pivots, moves, and the
//! blocking variants.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::blocking::WaitKind;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::server::Shared;

use super::{bulk_array, keyword, normalize_range, parse_timeout};

fn push(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    left: bool,
    require_existing: bool,
) -> RespValue {
    let key = &args[0];
    if require_existing {
        match st.list(s.db, key) {
            Ok(None) => return RespValue::Integer(0),
            Ok(Some(_)) => {}
            Err(e) => return e.into(),
        }
    }
    let len = {
        let list = match st.list_or_create(s.db, key) {
            Ok(l) => l,
            Err(e) => return e.into(),
        };
        for value in &args[1..] {
            if left {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        list.len()
    };
    st.mark_write(s.db, key);
    let event = if left { "lpush" } else { "rpush" };
    st.notify_event(s.db, classes::LIST, event, key);
    RespValue::Integer(len as i64)
}

pub fn lpush(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    push(st, s, args, true, false)
}

pub fn rpush(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    push(st, s, args, false, false)
}

pub fn lpushx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    push(st, s, args, true, true)
}

pub fn rpushx(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    push(st, s, args, false, true)
}

pub fn pop(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], left: bool) -> RespValue {
    let key = &args[0];
    let count = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) if n >= 0 => Some(n as usize),
            Ok(_) => return EngineError::NegativeCount.into(),
            Err(e) => return e.into(),
        },
        None => None,
    };

    let popped = {
        let list = match st.list_mut(s.db, key) {
            Ok(Some(l)) => l,
            Ok(None) => {
                return if count.is_some() {
                    RespValue::null_array()
                } else {
                    RespValue::null()
                };
            }
            Err(e) => return e.into(),
        };
        let take = count.unwrap_or(1).min(list.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let item = if left {
                list.pop_front()
            } else {
                list.pop_back()
            };
            match item {
                Some(v) => out.push(v),
                None => break,
            }
        }
        out
    };

    if !popped.is_empty() {
        st.mark_write(s.db, key);
        let event = if left { "lpop" } else { "rpop" };
        st.notify_event(s.db, classes::LIST, event, key);
        st.drop_if_empty(s.db, key);
    }

    match count {
        None => match popped.into_iter().next() {
            Some(v) => RespValue::bulk(v),
            None => RespValue::null(),
        },
        Some(_) => {
            if popped.is_empty() {
                RespValue::null_array()
            } else {
                bulk_array(popped)
            }
        }
    }
}

pub fn llen(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.list(s.db, &args[0]) {
        Ok(Some(l)) => RespValue::Integer(l.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn lrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::NotInteger.into(),
    };
    match st.list(s.db, &args[0]) {
        Ok(Some(list)) => match normalize_range(start, stop, list.len()) {
            Some((s0, e0)) => {
                bulk_array(list.iter().skip(s0).take(e0 - s0 + 1).cloned().collect())
            }
            None => RespValue::Array(Some(Vec::new())),
        },
        Ok(None) => RespValue::Array(Some(Vec::new())),
        Err(e) => e.into(),
    }
}

pub fn lindex(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let index = match parse_i64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    match st.list(s.db, &args[0]) {
        Ok(Some(list)) => {
            let len = list.len() as i64;
            let idx = if index < 0 { len + index } else { index };
            if idx < 0 || idx >= len {
                RespValue::null()
            } else {
                RespValue::bulk(list[idx as usize].clone())
            }
        }
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

pub fn lset(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let index = match parse_i64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let result = match st.list_mut(s.db, &args[0]) {
        Ok(Some(list)) => {
            let len = list.len() as i64;
            let idx = if index < 0 { len + index } else { index };
            if idx < 0 || idx >= len {
                Err(EngineError::IndexOutOfRange)
            } else {
                list[idx as usize] = args[2].clone();
                Ok(())
            }
        }
        Ok(None) => Err(EngineError::NoSuchKey),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::LIST, "lset", &args[0]);
            RespValue::ok()
        }
        Err(e) => e.into(),
    }
}

pub fn ltrim(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::NotInteger.into(),
    };
    match st.list_mut(s.db, &args[0]) {
        Ok(Some(list)) => {
            match normalize_range(start, stop, list.len()) {
                Some((s0, e0)) => {
                    let kept: VecDeque<Vec<u8>> =
                        list.iter().skip(s0).take(e0 - s0 + 1).cloned().collect();
                    *list = kept;
                }
                None => list.clear(),
            }
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::LIST, "ltrim", &args[0]);
            st.drop_if_empty(s.db, &args[0]);
            RespValue::ok()
        }
        Ok(None) => RespValue::ok(),
        Err(e) => e.into(),
    }
}

pub fn lrem(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let count = match parse_i64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let target = &args[2];
    let removed = match st.list_mut(s.db, &args[0]) {
        Ok(Some(list)) => {
            let mut indexes: Vec<usize> = Vec::new();
            if count >= 0 {
                let limit = if count == 0 { usize::MAX } else { count as usize };
                for (i, v) in list.iter().enumerate() {
                    if v == target {
                        indexes.push(i);
                        if indexes.len() == limit {
                            break;
                        }
                    }
                }
            } else {
                let limit = (-count) as usize;
                for (i, v) in list.iter().enumerate().rev() {
                    if v == target {
                        indexes.push(i);
                        if indexes.len() == limit {
                            break;
                        }
                    }
                }
                indexes.reverse();
            }
            for &i in indexes.iter().rev() {
                list.remove(i);
            }
            indexes.len()
        }
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if removed > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::LIST, "lrem", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(removed as i64)
}

pub fn linsert(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let before = if keyword(&args[1], "BEFORE") {
        true
    } else if keyword(&args[1], "AFTER") {
        false
    } else {
        return EngineError::Syntax.into();
    };
    let pivot = &args[2];
    let value = &args[3];
    let len = match st.list_mut(s.db, &args[0]) {
        Ok(Some(list)) => match list.iter().position(|v| v == pivot) {
            Some(pos) => {
                let at = if before { pos } else { pos + 1 };
                list.insert(at, value.clone());
                list.len() as i64
            }
            None => -1,
        },
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if len > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::LIST, "linsert", &args[0]);
    }
    RespValue::Integer(len)
}

pub fn lpos(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let target = &args[1];
    let mut rank = 1i64;
    let mut count: Option<usize> = None;
    let mut maxlen = 0usize;
    let mut i = 2;
    while i < args.len() {
        if keyword(&args[i], "RANK") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(0) => {
                    return RespValue::error(
                        "ERR RANK can't be zero, use 1 to start searching from the first matching element in the head of the list or a negative rank to start searching from the tail",
                    );
                }
                Ok(r) => rank = r,
                Err(e) => return e.into(),
            }
            i += 2;
        } else if keyword(&args[i], "COUNT") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(c) if c >= 0 => count = Some(c as usize),
                Ok(_) => return RespValue::error("ERR COUNT can't be negative"),
                Err(e) => return e.into(),
            }
            i += 2;
        } else if keyword(&args[i], "MAXLEN") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(m) if m >= 0 => maxlen = m as usize,
                Ok(_) => return RespValue::error("ERR MAXLEN can't be negative"),
                Err(e) => return e.into(),
            }
            i += 2;
        } else {
            return EngineError::Syntax.into();
        }
    }

    let list = match st.list(s.db, &args[0]) {
        Ok(Some(l)) => l,
        Ok(None) => {
            return match count {
                Some(_) => RespValue::Array(Some(Vec::new())),
                None => RespValue::null(),
            };
        }
        Err(e) => return e.into(),
    };

    let limit = match count {
        Some(0) => usize::MAX,
        Some(c) => c,
        None => 1,
    };
    let scan_limit = if maxlen == 0 { usize::MAX } else { maxlen };
    let mut found: Vec<i64> = Vec::new();
    let mut skip = rank.unsigned_abs() as usize - 1;
    if rank > 0 {
        for (i, v) in list.iter().enumerate().take(scan_limit) {
            if v == target {
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                found.push(i as i64);
                if found.len() >= limit {
                    break;
                }
            }
        }
    } else {
        for (i, v) in list.iter().enumerate().rev().take(scan_limit) {
            if v == target {
                if skip > 0 {
                    skip -= 1;
                    continue;
                }
                found.push(i as i64);
                if found.len() >= limit {
                    break;
                }
            }
        }
    }

    match count {
        Some(_) => RespValue::Array(Some(found.into_iter().map(RespValue::Integer).collect())),
        None => match found.first() {
            Some(&i) => RespValue::Integer(i),
            None => RespValue::null(),
        },
    }
}

/// Shared RPOPLPUSH/LMOVE core. Returns the moved element.
fn move_element(
    st: &mut ServerState,
    db: usize,
    src: &[u8],
    dst: &[u8],
    from_left: bool,
    to_left: bool,
) -> Result<Option<Vec<u8>>> {
    // Type-check the destination before popping the source.
    st.check_kind(db, dst, crate::store::ValueKind::List)?;
    let value = match st.list_mut(db, src)? {
        Some(list) => {
            let v = if from_left {
                list.pop_front()
            } else {
                list.pop_back()
            };
            match v {
                Some(v) => v,
                None => return Ok(None),
            }
        }
        None => return Ok(None),
    };
    st.mark_write(db, src);
    st.notify_event(db, classes::LIST, if from_left { "lpop" } else { "rpop" }, src);

    let dst_list = st.list_or_create(db, dst)?;
    if to_left {
        dst_list.push_front(value.clone());
    } else {
        dst_list.push_back(value.clone());
    }
    st.mark_write(db, dst);
    st.notify_event(db, classes::LIST, if to_left { "lpush" } else { "rpush" }, dst);
    st.drop_if_empty(db, src);
    Ok(Some(value))
}

pub fn rpoplpush(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match move_element(st, s.db, &args[0], &args[1], false, true) {
        Ok(Some(v)) => RespValue::bulk(v),
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

fn parse_side(arg: &[u8]) -> Result<bool> {
    if keyword(arg, "LEFT") {
        Ok(true)
    } else if keyword(arg, "RIGHT") {
        Ok(false)
    } else {
        Err(EngineError::Syntax)
    }
}

pub fn lmove(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (from_left, to_left) = match (parse_side(&args[2]), parse_side(&args[3])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::Syntax.into(),
    };
    match move_element(st, s.db, &args[0], &args[1], from_left, to_left) {
        Ok(Some(v)) => RespValue::bulk(v),
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

// --- blocking variants ---------------------------------------------------

fn try_bpop(
    st: &mut ServerState,
    db: usize,
    keys: &[Vec<u8>],
    left: bool,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    for key in keys {
        let popped = match st.list_mut(db, key)? {
            Some(list) => {
                if left {
                    list.pop_front()
                } else {
                    list.pop_back()
                }
            }
            None => None,
        };
        if let Some(value) = popped {
            st.mark_write(db, key);
            st.notify_event(db, classes::LIST, if left { "lpop" } else { "rpop" }, key);
            st.drop_if_empty(db, key);
            return Ok(Some((key.clone(), value)));
        }
    }
    Ok(None)
}

/// Degenerate non-blocking form used inside MULTI and scripts.
pub fn bpop_now(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], left: bool) -> RespValue {
    let (keys, timeout_raw) = args.split_at(args.len() - 1);
    if let Err(e) = parse_timeout(&timeout_raw[0]) {
        return e.into();
    }
    match try_bpop(st, s.db, keys, left) {
        Ok(Some((key, value))) => bulk_array(vec![key, value]),
        Ok(None) => RespValue::null_array(),
        Err(e) => e.into(),
    }
}

pub fn bmove_now(
    st: &mut ServerState,
    s: &mut Session,
    src: &[u8],
    dst: &[u8],
    from_left: bool,
    to_left: bool,
    timeout_raw: &[u8],
) -> RespValue {
    if let Err(e) = parse_timeout(timeout_raw) {
        return e.into();
    }
    match move_element(st, s.db, src, dst, from_left, to_left) {
        Ok(Some(v)) => RespValue::bulk(v),
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

pub async fn bpop(
    shared: &Arc<Shared>,
    s: &mut Session,
    args: &[Vec<u8>],
    left: bool,
) -> RespValue {
    let (keys, timeout_raw) = args.split_at(args.len() - 1);
    let timeout = match parse_timeout(&timeout_raw[0]) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    let deadline = deadline_for(timeout);
    loop {
        let waiter = {
            let mut st = shared.lock_refreshed();
            match try_bpop(&mut st, s.db, keys, left) {
                Ok(Some((key, value))) => return bulk_array(vec![key, value]),
                Ok(None) => {}
                Err(e) => return e.into(),
            }
            if s.no_blocking {
                return RespValue::null_array();
            }
            let w = st.blocking.new_waiter(s.id, WaitKind::List);
            for key in keys {
                st.blocking.register(s.db, key.clone(), w.clone());
            }
            w
        };
        if !park(shared, s.db, keys, &waiter, deadline).await {
            return RespValue::null_array();
        }
    }
}

pub async fn bmove(
    shared: &Arc<Shared>,
    s: &mut Session,
    src: &[u8],
    dst: &[u8],
    from_left: bool,
    to_left: bool,
    timeout_raw: &[u8],
) -> RespValue {
    let timeout = match parse_timeout(timeout_raw) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    let deadline = deadline_for(timeout);
    let keys = [src.to_vec()];
    loop {
        let waiter = {
            let mut st = shared.lock_refreshed();
            match move_element(&mut st, s.db, src, dst, from_left, to_left) {
                Ok(Some(v)) => return RespValue::bulk(v),
                Ok(None) => {}
                Err(e) => return e.into(),
            }
            if s.no_blocking {
                return RespValue::null();
            }
            let w = st.blocking.new_waiter(s.id, WaitKind::List);
            st.blocking.register(s.db, src.to_vec(), w.clone());
            w
        };
        if !park(shared, s.db, &keys, &waiter, deadline).await {
            return RespValue::null();
        }
    }
}

pub(crate) fn deadline_for(timeout_secs: f64) -> Option<tokio::time::Instant> {
    if timeout_secs == 0.0 {
        None
    } else {
        Some(tokio::time::Instant::now() + std::time::Duration::from_secs_f64(timeout_secs))
    }
}

/// Sleep until signaled or the deadline passes, then drop the registrations.
/// Returns false on timeout.
pub(crate) async fn park(
    shared: &Arc<Shared>,
    db: usize,
    keys: &[Vec<u8>],
    waiter: &Arc<crate::server::blocking::Waiter>,
    deadline: Option<tokio::time::Instant>,
) -> bool {
    let woken = match deadline {
        None => {
            waiter.notify.notified().await;
            true
        }
        Some(d) => tokio::select! {
            _ = waiter.notify.notified() => true,
            _ = tokio::time::sleep_until(d) => false,
        },
    };
    let mut st = shared.lock();
    for key in keys {
        st.blocking.unregister(db, key, waiter.seq);
    }
    woken
}
