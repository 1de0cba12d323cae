//! Set commands: membership, algebra, seedable random sampling.

use std::collections::HashSet;

use rand::Rng;

use crate::error::EngineError;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::store::ValueKind;

use super::{bulk_array, keyword, parse_cursor, parse_scan_opts, scan_page};

pub fn sadd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let added = {
        let set = match st.set_or_create(s.db, &args[0]) {
            Ok(v) => v,
            Err(e) => return e.into(),
        };
        let mut n = 0i64;
        for member in &args[1..] {
            if set.insert(member.clone()) {
                n += 1;
            }
        }
        n
    };
    if added > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::SET, "sadd", &args[0]);
    } else {
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(added)
}

pub fn srem(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let removed = match st.set_mut(s.db, &args[0]) {
        Ok(Some(set)) => {
            let mut n = 0i64;
            for member in &args[1..] {
                if set.remove(member) {
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
        st.notify_event(s.db, classes::SET, "srem", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(removed)
}

fn sorted_members(set: &HashSet<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut members: Vec<Vec<u8>> = set.iter().cloned().collect();
    members.sort();
    members
}

pub fn smembers(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => {
            RespValue::Set(sorted_members(set).into_iter().map(RespValue::bulk).collect())
        }
        Ok(None) => RespValue::Set(Vec::new()),
        Err(e) => e.into(),
    }
}

pub fn sismember(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => RespValue::Integer(i64::from(set.contains(&args[1]))),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn smismember(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => RespValue::Array(Some(
            args[1..]
                .iter()
                .map(|m| RespValue::Integer(i64::from(set.contains(m))))
                .collect(),
        )),
        Ok(None) => RespValue::Array(Some(
            args[1..].iter().map(|_| RespValue::Integer(0)).collect(),
        )),
        Err(e) => e.into(),
    }
}

pub fn scard(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => RespValue::Integer(set.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn spop(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let count = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) if n >= 0 => Some(n as usize),
            Ok(_) => return EngineError::NegativeCount.into(),
            Err(e) => return e.into(),
        },
        None => None,
    };

    let members = match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => sorted_members(set),
        Ok(None) => {
            return match count {
                Some(_) => RespValue::Set(Vec::new()),
                None => RespValue::null(),
            };
        }
        Err(e) => return e.into(),
    };

    let take = count.unwrap_or(1).min(members.len());
    let mut pool: Vec<Vec<u8>> = members;
    let mut picked = Vec::with_capacity(take);
    for _ in 0..take {
        let i = st.rng.gen_range(0..pool.len());
        picked.push(pool.swap_remove(i));
    }

    if !picked.is_empty() {
        if let Ok(Some(set)) = st.set_mut(s.db, &args[0]) {
            for m in &picked {
                set.remove(m);
            }
        }
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::SET, "spop", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }

    match count {
        None => match picked.into_iter().next() {
            Some(m) => RespValue::bulk(m),
            None => RespValue::null(),
        },
        Some(_) => RespValue::Set(picked.into_iter().map(RespValue::bulk).collect()),
    }
}

pub fn srandmember(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let count = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) => Some(n),
            Err(e) => return e.into(),
        },
        None => None,
    };
    let members = match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => sorted_members(set),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };

    match count {
        None => {
            if members.is_empty() {
                RespValue::null()
            } else {
                let i = st.rng.gen_range(0..members.len());
                RespValue::bulk(members[i].clone())
            }
        }
        Some(n) => {
            if members.is_empty() {
                return RespValue::Array(Some(Vec::new()));
            }
            let picked: Vec<Vec<u8>> = if n >= 0 {
                let take = (n as usize).min(members.len());
                let mut pool = members;
                let mut out = Vec::with_capacity(take);
                for _ in 0..take {
                    let i = st.rng.gen_range(0..pool.len());
                    out.push(pool.swap_remove(i));
                }
                out
            } else {
                (0..(-n) as usize)
                    .map(|_| members[st.rng.gen_range(0..members.len())].clone())
                    .collect()
            };
            bulk_array(picked)
        }
    }
}

pub fn smove(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (src, dst, member) = (&args[0], &args[1], &args[2]);
    if let Err(e) = st.check_kind(s.db, dst, ValueKind::Set) {
        return e.into();
    }
    let present = match st.set_mut(s.db, src) {
        Ok(Some(set)) => set.remove(member),
        Ok(None) => false,
        Err(e) => return e.into(),
    };
    if !present {
        return RespValue::Integer(0);
    }
    st.mark_write(s.db, src);
    st.notify_event(s.db, classes::SET, "srem", src);
    {
        let dst_set = match st.set_or_create(s.db, dst) {
            Ok(v) => v,
            Err(e) => return e.into(),
        };
        dst_set.insert(member.clone());
    }
    st.mark_write(s.db, dst);
    st.notify_event(s.db, classes::SET, "sadd", dst);
    st.drop_if_empty(s.db, src);
    RespValue::Integer(1)
}

#[derive(Clone, Copy)]
enum SetOp {
    Diff,
    Inter,
    Union,
}

fn set_algebra(
    st: &mut ServerState,
    db: usize,
    keys: &[Vec<u8>],
    op: SetOp,
) -> crate::error::Result<Vec<Vec<u8>>> {
    let mut sets: Vec<HashSet<Vec<u8>>> = Vec::with_capacity(keys.len());
    for key in keys {
        let set = st.set_ref(db, key)?.cloned().unwrap_or_default();
        sets.push(set);
    }
    let mut iter = sets.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for other in iter {
        match op {
            SetOp::Diff => acc.retain(|m| !other.contains(m)),
            SetOp::Inter => acc.retain(|m| other.contains(m)),
            SetOp::Union => acc.extend(other),
        }
    }
    let mut out: Vec<Vec<u8>> = acc.into_iter().collect();
    out.sort();
    Ok(out)
}

fn algebra_reply(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], op: SetOp) -> RespValue {
    match set_algebra(st, s.db, args, op) {
        Ok(members) => RespValue::Set(members.into_iter().map(RespValue::bulk).collect()),
        Err(e) => e.into(),
    }
}

pub fn sdiff(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_reply(st, s, args, SetOp::Diff)
}

pub fn sinter(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_reply(st, s, args, SetOp::Inter)
}

pub fn sunion(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_reply(st, s, args, SetOp::Union)
}

fn algebra_store(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    op: SetOp,
    event: &str,
) -> RespValue {
    let dest = &args[0];
    let members = match set_algebra(st, s.db, &args[1..], op) {
        Ok(m) => m,
        Err(e) => return e.into(),
    };
    st.expire_if_needed(s.db, dest);
    if members.is_empty() {
        if st.dbs[s.db].remove(dest).is_some() {
            st.mark_write(s.db, dest);
            st.notify_event(s.db, classes::GENERIC, "del", dest);
        }
        return RespValue::Integer(0);
    }
    let len = members.len();
    st.dbs[s.db].insert(
        dest.clone(),
        crate::store::Entry::new(crate::store::Value::Set(members.into_iter().collect())),
    );
    st.mark_write(s.db, dest);
    st.notify_event(s.db, classes::SET, event, dest);
    RespValue::Integer(len as i64)
}

pub fn sdiffstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_store(st, s, args, SetOp::Diff, "sdiffstore")
}

pub fn sinterstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_store(st, s, args, SetOp::Inter, "sinterstore")
}

pub fn sunionstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    algebra_store(st, s, args, SetOp::Union, "sunionstore")
}

pub fn sintercard(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let numkeys = match parse_i64(&args[0]) {
        Ok(n) if n > 0 => n as usize,
        Ok(_) => return RespValue::error("ERR numkeys should be greater than 0"),
        Err(e) => return e.into(),
    };
    if args.len() < 1 + numkeys {
        return RespValue::error("ERR Number of keys can't be greater than number of args");
    }
    let keys = &args[1..1 + numkeys];
    let mut limit = usize::MAX;
    let rest = &args[1 + numkeys..];
    if !rest.is_empty() {
        if rest.len() != 2 || !keyword(&rest[0], "LIMIT") {
            return EngineError::Syntax.into();
        }
        match parse_i64(&rest[1]) {
            Ok(0) => {}
            Ok(n) if n > 0 => limit = n as usize,
            Ok(_) => return RespValue::error("ERR LIMIT can't be negative"),
            Err(e) => return e.into(),
        }
    }
    match set_algebra(st, s.db, keys, SetOp::Inter) {
        Ok(members) => RespValue::Integer(members.len().min(limit) as i64),
        Err(e) => e.into(),
    }
}

pub fn sscan(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let cursor = match parse_cursor(&args[1]) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };
    let (pattern, count) = match parse_scan_opts(&args[2..]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let members = match st.set_ref(s.db, &args[0]) {
        Ok(Some(set)) => sorted_members(set),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };
    let (next, page) = scan_page(members, cursor, count);
    let filtered = page
        .into_iter()
        .filter(|m| pattern.as_ref().map_or(true, |p| crate::glob::glob_match(p, m)))
        .collect();
    super::scan_reply(next, filtered)
}
