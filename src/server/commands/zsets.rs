//! Sorted-set commands: ZADD's flag algebra, the three range grammars,
//! store variants, set algebra with weights, and the blocking pops.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use crate::error::EngineError;
use crate::num::{format_f64, parse_f64, parse_i64};
use crate::resp::RespValue;
use crate::server::blocking::WaitKind;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::server::Shared;
use crate::store::zset::{LexBound, ScoreBound, SortedSet};
use crate::store::{Entry, Value};

use super::lists::{deadline_for, park};
use super::{keyword, parse_cursor, parse_scan_opts, parse_timeout, scan_page};

fn score_reply(score: f64) -> RespValue {
    RespValue::Double(score)
}

fn with_scores_array(items: Vec<(Vec<u8>, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(RespValue::bulk(member));
        if with_scores {
            out.push(RespValue::bulk(format_f64(score).into_bytes()));
        }
    }
    RespValue::Array(Some(out))
}

// --- ZADD ----------------------------------------------------------------

pub fn zadd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let mut nx = false;
    let mut xx = false;
    let mut gt = false;
    let mut lt = false;
    let mut ch = false;
    let mut incr = false;
    let mut i = 1;
    while i < args.len() {
        let a = &args[i];
        if keyword(a, "NX") {
            nx = true;
        } else if keyword(a, "XX") {
            xx = true;
        } else if keyword(a, "GT") {
            gt = true;
        } else if keyword(a, "LT") {
            lt = true;
        } else if keyword(a, "CH") {
            ch = true;
        } else if keyword(a, "INCR") {
            incr = true;
        } else {
            break;
        }
        i += 1;
    }
    if nx && xx {
        return RespValue::error("ERR XX and NX options at the same time are not compatible");
    }
    if (gt && lt) || (nx && (gt || lt)) {
        return RespValue::error(
            "ERR GT, LT, and/or NX options at the same time are not compatible",
        );
    }

    let tail = &args[i..];
    if tail.is_empty() || tail.len() % 2 != 0 {
        return EngineError::Syntax.into();
    }
    let mut pairs = Vec::with_capacity(tail.len() / 2);
    for chunk in tail.chunks(2) {
        match parse_f64(&chunk[0]) {
            Ok(score) => pairs.push((score, chunk[1].clone())),
            Err(e) => return e.into(),
        }
    }
    if incr && pairs.len() != 1 {
        return RespValue::error("ERR INCR option supports a single increment-element pair");
    }

    let mut added = 0i64;
    let mut changed = 0i64;
    let mut incr_result: Option<Option<f64>> = None;
    {
        let zset = match st.zset_or_create(s.db, key) {
            Ok(z) => z,
            Err(e) => return e.into(),
        };
        for (score, member) in pairs {
            let current = zset.score(&member);
            if incr {
                let next = match current {
                    Some(old) => {
                        if nx {
                            incr_result = Some(None);
                            break;
                        }
                        let sum = old + score;
                        if sum.is_nan() {
                            return RespValue::error(
                                "ERR resulting score is not a number (NaN)",
                            );
                        }
                        if (gt && sum <= old) || (lt && sum >= old) {
                            incr_result = Some(None);
                            break;
                        }
                        sum
                    }
                    None => {
                        if xx {
                            incr_result = Some(None);
                            break;
                        }
                        score
                    }
                };
                zset.insert(member, next);
                incr_result = Some(Some(next));
                break;
            }
            match current {
                Some(old) => {
                    if nx || (gt && score <= old) || (lt && score >= old) {
                        continue;
                    }
                    if score != old {
                        zset.insert(member, score);
                        changed += 1;
                    }
                }
                None => {
                    if xx {
                        continue;
                    }
                    zset.insert(member, score);
                    added += 1;
                }
            }
        }
    }

    st.drop_if_empty(s.db, key);
    let wrote = added > 0 || changed > 0 || matches!(incr_result, Some(Some(_)));
    if wrote {
        st.mark_write(s.db, key);
        st.notify_event(s.db, classes::ZSET, "zadd", key);
    }

    if incr {
        return match incr_result {
            Some(Some(score)) => score_reply(score),
            _ => RespValue::null(),
        };
    }
    RespValue::Integer(if ch { added + changed } else { added })
}

pub fn zincrby(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let delta = match parse_f64(&args[1]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let result = {
        let zset = match st.zset_or_create(s.db, &args[0]) {
            Ok(z) => z,
            Err(e) => return e.into(),
        };
        let next = zset.score(&args[2]).unwrap_or(0.0) + delta;
        if next.is_nan() {
            Err(())
        } else {
            zset.insert(args[2].clone(), next);
            Ok(next)
        }
    };
    match result {
        Ok(next) => {
            st.mark_write(s.db, &args[0]);
            st.notify_event(s.db, classes::ZSET, "zincr", &args[0]);
            score_reply(next)
        }
        Err(()) => {
            st.drop_if_empty(s.db, &args[0]);
            RespValue::error("ERR resulting score is not a number (NaN)")
        }
    }
}

pub fn zrem(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let removed = match st.zset_mut(s.db, &args[0]) {
        Ok(Some(zset)) => {
            let mut n = 0i64;
            for member in &args[1..] {
                if zset.remove(member).is_some() {
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
        st.notify_event(s.db, classes::ZSET, "zrem", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(removed)
}

pub fn zscore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => match zset.score(&args[1]) {
            Some(score) => score_reply(score),
            None => RespValue::null(),
        },
        Ok(None) => RespValue::null(),
        Err(e) => e.into(),
    }
}

pub fn zmscore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => RespValue::Array(Some(
            args[1..]
                .iter()
                .map(|m| match zset.score(m) {
                    Some(score) => score_reply(score),
                    None => RespValue::null(),
                })
                .collect(),
        )),
        Ok(None) => RespValue::Array(Some(
            args[1..].iter().map(|_| RespValue::null()).collect(),
        )),
        Err(e) => e.into(),
    }
}

pub fn zcard(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => RespValue::Integer(zset.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn zcount(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (min, max) = match (ScoreBound::parse(&args[1]), ScoreBound::parse(&args[2])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::ScoreRangeItem.into(),
    };
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => RespValue::Integer(zset.count_by_score(&min, &max) as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn zlexcount(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (min, max) = match (LexBound::parse(&args[1]), LexBound::parse(&args[2])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::LexRangeItem.into(),
    };
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => RespValue::Integer(zset.count_by_lex(&min, &max) as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn zrank(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], rev: bool) -> RespValue {
    let with_score = match args.get(2) {
        Some(w) if keyword(w, "WITHSCORE") => true,
        Some(_) => return EngineError::Syntax.into(),
        None => false,
    };
    match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => match zset.rank(&args[1], rev) {
            Some(rank) => {
                if with_score {
                    let score = zset.score(&args[1]).unwrap_or(0.0);
                    RespValue::array(vec![
                        RespValue::Integer(rank as i64),
                        RespValue::bulk(format_f64(score).into_bytes()),
                    ])
                } else {
                    RespValue::Integer(rank as i64)
                }
            }
            None => {
                if with_score {
                    RespValue::null_array()
                } else {
                    RespValue::null()
                }
            }
        },
        Ok(None) => {
            if with_score {
                RespValue::null_array()
            } else {
                RespValue::null()
            }
        }
        Err(e) => e.into(),
    }
}

// --- range machinery -----------------------------------------------------

enum RangeSpec {
    Rank(i64, i64),
    Score(ScoreBound, ScoreBound),
    Lex(LexBound, LexBound),
}

fn fetch_range(
    zset: &SortedSet,
    spec: &RangeSpec,
    rev: bool,
    offset: usize,
    count: Option<usize>,
) -> Vec<(Vec<u8>, f64)> {
    match spec {
        RangeSpec::Rank(start, stop) => zset.range_by_rank(*start, *stop, rev),
        RangeSpec::Score(min, max) => zset.range_by_score(min, max, rev, offset, count),
        RangeSpec::Lex(min, max) => zset.range_by_lex(min, max, rev, offset, count),
    }
}

/// Unified ZRANGE: rank/score/lex sub-grammars, REV, LIMIT, WITHSCORES.
/// When `store_dest` is set this is ZRANGESTORE and the result lands in a
/// new sorted set instead of the reply.
fn zrange_generic(
    st: &mut ServerState,
    s: &mut Session,
    key: &[u8],
    start_raw: &[u8],
    stop_raw: &[u8],
    opts: &[Vec<u8>],
    fixed_rev: Option<bool>,
    fixed_mode: Option<&str>,
    store_dest: Option<&[u8]>,
) -> RespValue {
    let mut rev = fixed_rev.unwrap_or(false);
    let mut mode = fixed_mode.unwrap_or("rank").to_string();
    let mut with_scores = false;
    let mut limit: Option<(i64, i64)> = None;
    let mut i = 0;
    while i < opts.len() {
        let a = &opts[i];
        if keyword(a, "WITHSCORES") && store_dest.is_none() {
            with_scores = true;
        } else if keyword(a, "REV") && fixed_rev.is_none() {
            rev = true;
        } else if keyword(a, "BYSCORE") && fixed_mode.is_none() {
            mode = "score".into();
        } else if keyword(a, "BYLEX") && fixed_mode.is_none() {
            mode = "lex".into();
        } else if keyword(a, "LIMIT") && i + 2 < opts.len() {
            let (off, cnt) = match (parse_i64(&opts[i + 1]), parse_i64(&opts[i + 2])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return EngineError::NotInteger.into(),
            };
            limit = Some((off, cnt));
            i += 2;
        } else {
            return EngineError::Syntax.into();
        }
        i += 1;
    }

    if limit.is_some() && mode == "rank" {
        return RespValue::error(
            "ERR syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX",
        );
    }
    if with_scores && mode == "lex" {
        return RespValue::error(
            "ERR syntax error, WITHSCORES not supported in combination with BYLEX",
        );
    }

    // In REV mode the score/lex grammars take (max, min).
    let (lo_raw, hi_raw) = if rev && mode != "rank" {
        (stop_raw, start_raw)
    } else {
        (start_raw, stop_raw)
    };
    let spec = match mode.as_str() {
        "rank" => {
            let (a, b) = match (parse_i64(start_raw), parse_i64(stop_raw)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return EngineError::NotInteger.into(),
            };
            RangeSpec::Rank(a, b)
        }
        "score" => {
            let (min, max) = match (ScoreBound::parse(lo_raw), ScoreBound::parse(hi_raw)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return EngineError::ScoreRangeItem.into(),
            };
            RangeSpec::Score(min, max)
        }
        _ => {
            let (min, max) = match (LexBound::parse(lo_raw), LexBound::parse(hi_raw)) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return EngineError::LexRangeItem.into(),
            };
            RangeSpec::Lex(min, max)
        }
    };

    let (offset, count) = match limit {
        None => (0usize, None),
        Some((off, _)) if off < 0 => {
            return match store_dest {
                Some(_) => RespValue::Integer(0),
                None => RespValue::Array(Some(Vec::new())),
            };
        }
        Some((off, cnt)) => (
            off as usize,
            if cnt < 0 { None } else { Some(cnt as usize) },
        ),
    };

    let items = match st.zset(s.db, key) {
        Ok(Some(zset)) => fetch_range(zset, &spec, rev, offset, count),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };

    match store_dest {
        None => with_scores_array(items, with_scores),
        Some(dest) => {
            st.expire_if_needed(s.db, dest);
            if items.is_empty() {
                if st.dbs[s.db].remove(dest).is_some() {
                    st.mark_write(s.db, dest);
                    st.notify_event(s.db, classes::GENERIC, "del", dest);
                }
                return RespValue::Integer(0);
            }
            let mut out = SortedSet::new();
            for (member, score) in &items {
                out.insert(member.clone(), *score);
            }
            let len = out.len();
            st.dbs[s.db].insert(dest.to_vec(), Entry::new(Value::ZSet(out)));
            st.mark_write(s.db, dest);
            st.notify_event(s.db, classes::ZSET, "zrangestore", dest);
            RespValue::Integer(len as i64)
        }
    }
}

pub fn zrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zrange_generic(st, s, &args[0], &args[1], &args[2], &args[3..], None, None, None)
}

pub fn zrevrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zrange_generic(
        st, s, &args[0], &args[1], &args[2], &args[3..],
        Some(true), Some("rank"), None,
    )
}

pub fn zrangebyscore(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    rev: bool,
) -> RespValue {
    zrange_generic(
        st, s, &args[0], &args[1], &args[2], &args[3..],
        Some(rev), Some("score"), None,
    )
}

pub fn zrangebylex(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    rev: bool,
) -> RespValue {
    zrange_generic(
        st, s, &args[0], &args[1], &args[2], &args[3..],
        Some(rev), Some("lex"), None,
    )
}

pub fn zrangestore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let dest = args[0].clone();
    zrange_generic(
        st, s, &args[1], &args[2], &args[3], &args[4..],
        None, None, Some(&dest),
    )
}

// --- pops ----------------------------------------------------------------

fn pop_extremes(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    min: bool,
) -> RespValue {
    let count = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) if n >= 0 => Some(n as usize),
            Ok(_) => return EngineError::NegativeCount.into(),
            Err(e) => return e.into(),
        },
        None => None,
    };
    let popped = match st.zset_mut(s.db, &args[0]) {
        Ok(Some(zset)) => {
            let take = count.unwrap_or(1);
            if min {
                zset.pop_min(take)
            } else {
                zset.pop_max(take)
            }
        }
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };
    if !popped.is_empty() {
        st.mark_write(s.db, &args[0]);
        let event = if min { "zpopmin" } else { "zpopmax" };
        st.notify_event(s.db, classes::ZSET, event, &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    with_scores_array(popped, true)
}

pub fn zpopmin(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    pop_extremes(st, s, args, true)
}

pub fn zpopmax(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    pop_extremes(st, s, args, false)
}

fn try_bzpop(
    st: &mut ServerState,
    db: usize,
    keys: &[Vec<u8>],
    min: bool,
) -> crate::error::Result<Option<(Vec<u8>, Vec<u8>, f64)>> {
    for key in keys {
        let popped = match st.zset_mut(db, key)? {
            Some(zset) => {
                let mut items = if min { zset.pop_min(1) } else { zset.pop_max(1) };
                items.pop()
            }
            None => None,
        };
        if let Some((member, score)) = popped {
            st.mark_write(db, key);
            let event = if min { "zpopmin" } else { "zpopmax" };
            st.notify_event(db, classes::ZSET, event, key);
            st.drop_if_empty(db, key);
            return Ok(Some((key.clone(), member, score)));
        }
    }
    Ok(None)
}

/// Degenerate non-blocking form used inside MULTI and scripts.
pub fn bzpop_now(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    min: bool,
) -> RespValue {
    let (keys, timeout_raw) = args.split_at(args.len() - 1);
    if let Err(e) = parse_timeout(&timeout_raw[0]) {
        return e.into();
    }
    match try_bzpop(st, s.db, keys, min) {
        Ok(Some((key, member, score))) => RespValue::array(vec![
            RespValue::bulk(key),
            RespValue::bulk(member),
            RespValue::bulk(format_f64(score).into_bytes()),
        ]),
        Ok(None) => RespValue::null_array(),
        Err(e) => e.into(),
    }
}

pub async fn bzpop(
    shared: &Arc<Shared>,
    s: &mut Session,
    args: &[Vec<u8>],
    min: bool,
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
            match try_bzpop(&mut st, s.db, keys, min) {
                Ok(Some((key, member, score))) => {
                    return RespValue::array(vec![
                        RespValue::bulk(key),
                        RespValue::bulk(member),
                        RespValue::bulk(format_f64(score).into_bytes()),
                    ]);
                }
                Ok(None) => {}
                Err(e) => return e.into(),
            }
            if s.no_blocking {
                return RespValue::null_array();
            }
            let w = st.blocking.new_waiter(s.id, WaitKind::ZSet);
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

pub fn zrandmember(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (count, with_scores) = match args.get(1) {
        None => (None, false),
        Some(raw) => {
            let n = match parse_i64(raw) {
                Ok(v) => v,
                Err(e) => return e.into(),
            };
            let ws = match args.get(2) {
                Some(w) if keyword(w, "WITHSCORES") => true,
                Some(_) => return EngineError::Syntax.into(),
                None => false,
            };
            (Some(n), ws)
        }
    };
    let items: Vec<(Vec<u8>, f64)> = match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => zset.iter().map(|(m, sc)| (m.to_vec(), sc)).collect(),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };
    match count {
        None => {
            if items.is_empty() {
                return RespValue::null();
            }
            let i = st.rng.gen_range(0..items.len());
            RespValue::bulk(items[i].0.clone())
        }
        Some(n) => {
            if items.is_empty() {
                return RespValue::Array(Some(Vec::new()));
            }
            let picked: Vec<(Vec<u8>, f64)> = if n >= 0 {
                let take = (n as usize).min(items.len());
                let mut pool = items;
                let mut out = Vec::with_capacity(take);
                for _ in 0..take {
                    let i = st.rng.gen_range(0..pool.len());
                    out.push(pool.swap_remove(i));
                }
                out
            } else {
                (0..(-n) as usize)
                    .map(|_| items[st.rng.gen_range(0..items.len())].clone())
                    .collect()
            };
            with_scores_array(picked, with_scores)
        }
    }
}

// --- remove ranges -------------------------------------------------------

pub fn zremrange(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    mode: &str,
) -> RespValue {
    let spec = match mode {
        "rank" => {
            let (a, b) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
                (Ok(a), Ok(b)) => (a, b),
                _ => return EngineError::NotInteger.into(),
            };
            RangeSpec::Rank(a, b)
        }
        "score" => match (ScoreBound::parse(&args[1]), ScoreBound::parse(&args[2])) {
            (Ok(a), Ok(b)) => RangeSpec::Score(a, b),
            _ => return EngineError::ScoreRangeItem.into(),
        },
        _ => match (LexBound::parse(&args[1]), LexBound::parse(&args[2])) {
            (Ok(a), Ok(b)) => RangeSpec::Lex(a, b),
            _ => return EngineError::LexRangeItem.into(),
        },
    };
    let removed = match st.zset_mut(s.db, &args[0]) {
        Ok(Some(zset)) => {
            let targets = fetch_range(zset, &spec, false, 0, None);
            for (member, _) in &targets {
                zset.remove(member);
            }
            targets.len()
        }
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if removed > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::ZSET, "zremrangebyscore", &args[0]);
        st.drop_if_empty(s.db, &args[0]);
    }
    RespValue::Integer(removed as i64)
}

// --- algebra -------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Agg {
    Sum,
    Min,
    Max,
}

fn combine(a: f64, b: f64, how: Agg) -> f64 {
    let v = match how {
        Agg::Sum => a + b,
        Agg::Min => a.min(b),
        Agg::Max => a.max(b),
    };
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

fn weighted(score: f64, weight: f64) -> f64 {
    let v = score * weight;
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

/// Load one algebra source: a sorted set, or a plain set scored 1.0.
fn load_source(
    st: &mut ServerState,
    db: usize,
    key: &[u8],
) -> crate::error::Result<Vec<(Vec<u8>, f64)>> {
    match st.entry(db, key) {
        None => Ok(Vec::new()),
        Some(e) => match &e.value {
            Value::ZSet(z) => Ok(z.iter().map(|(m, s)| (m.to_vec(), s)).collect()),
            Value::Set(members) => Ok(members.iter().map(|m| (m.clone(), 1.0)).collect()),
            _ => Err(EngineError::WrongType),
        },
    }
}

struct AlgebraArgs {
    keys: Vec<Vec<u8>>,
    weights: Vec<f64>,
    aggregate: Agg,
    with_scores: bool,
}

fn parse_algebra(args: &[Vec<u8>], allow_options: bool) -> Result<AlgebraArgs, RespValue> {
    let numkeys = match parse_i64(&args[0]) {
        Ok(n) if n > 0 => n as usize,
        Ok(_) => {
            return Err(RespValue::error(
                "ERR at least 1 input key is needed for ZUNIONSTORE/ZINTERSTORE",
            ));
        }
        Err(e) => return Err(e.into()),
    };
    if args.len() < 1 + numkeys {
        return Err(EngineError::Syntax.into());
    }
    let keys = args[1..1 + numkeys].to_vec();
    let mut weights = vec![1.0; numkeys];
    let mut aggregate = Agg::Sum;
    let mut with_scores = false;
    let mut i = 1 + numkeys;
    while i < args.len() {
        if allow_options && keyword(&args[i], "WEIGHTS") {
            if args.len() < i + 1 + numkeys {
                return Err(EngineError::Syntax.into());
            }
            for (w, raw) in weights.iter_mut().zip(&args[i + 1..i + 1 + numkeys]) {
                *w = match parse_f64(raw) {
                    Ok(v) => v,
                    Err(_) => {
                        return Err(RespValue::error("ERR weight value is not a float"));
                    }
                };
            }
            i += 1 + numkeys;
        } else if allow_options && keyword(&args[i], "AGGREGATE") && i + 1 < args.len() {
            aggregate = if keyword(&args[i + 1], "SUM") {
                Agg::Sum
            } else if keyword(&args[i + 1], "MIN") {
                Agg::Min
            } else if keyword(&args[i + 1], "MAX") {
                Agg::Max
            } else {
                return Err(EngineError::Syntax.into());
            };
            i += 2;
        } else if keyword(&args[i], "WITHSCORES") {
            with_scores = true;
            i += 1;
        } else {
            return Err(EngineError::Syntax.into());
        }
    }
    Ok(AlgebraArgs {
        keys,
        weights,
        aggregate,
        with_scores,
    })
}

#[derive(Clone, Copy, PartialEq)]
enum ZOp {
    Union,
    Inter,
    Diff,
}

fn zset_algebra(
    st: &mut ServerState,
    db: usize,
    parsed: &AlgebraArgs,
    op: ZOp,
) -> crate::error::Result<SortedSet> {
    let mut acc: HashMap<Vec<u8>, f64> = HashMap::new();
    let mut membership: Vec<std::collections::HashSet<Vec<u8>>> = Vec::new();
    for (idx, key) in parsed.keys.iter().enumerate() {
        let source = load_source(st, db, key)?;
        if op == ZOp::Diff {
            membership.push(source.iter().map(|(m, _)| m.clone()).collect());
        }
        for (member, score) in source {
            let scaled = weighted(score, parsed.weights[idx]);
            match op {
                ZOp::Diff => {
                    if idx == 0 {
                        acc.insert(member, score);
                    }
                }
                _ => {
                    acc.entry(member)
                        .and_modify(|v| *v = combine(*v, scaled, parsed.aggregate))
                        .or_insert(scaled);
                }
            }
        }
    }

    let mut out = SortedSet::new();
    match op {
        ZOp::Union => {
            for (m, s) in acc {
                out.insert(m, s);
            }
        }
        ZOp::Inter => {
            // A member qualifies when every source contains it; recompute
            // membership from the sources to avoid counting aggregation.
            let mut counts: HashMap<Vec<u8>, usize> = HashMap::new();
            for key in &parsed.keys {
                for (m, _) in load_source(st, db, key)? {
                    *counts.entry(m).or_insert(0) += 1;
                }
            }
            for (m, s) in acc {
                if counts.get(&m).copied().unwrap_or(0) == parsed.keys.len() {
                    out.insert(m, s);
                }
            }
        }
        ZOp::Diff => {
            for (m, s) in acc {
                if membership[1..].iter().all(|set| !set.contains(&m)) {
                    out.insert(m, s);
                }
            }
        }
    }
    Ok(out)
}

fn zalgebra_reply(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    op: ZOp,
) -> RespValue {
    let parsed = match parse_algebra(args, op != ZOp::Diff) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match zset_algebra(st, s.db, &parsed, op) {
        Ok(result) => with_scores_array(
            result.iter().map(|(m, sc)| (m.to_vec(), sc)).collect(),
            parsed.with_scores,
        ),
        Err(e) => e.into(),
    }
}

fn zalgebra_store(
    st: &mut ServerState,
    s: &mut Session,
    args: &[Vec<u8>],
    op: ZOp,
    event: &str,
) -> RespValue {
    let dest = args[0].clone();
    let parsed = match parse_algebra(&args[1..], op != ZOp::Diff) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    if parsed.with_scores {
        return EngineError::Syntax.into();
    }
    let result = match zset_algebra(st, s.db, &parsed, op) {
        Ok(r) => r,
        Err(e) => return e.into(),
    };
    st.expire_if_needed(s.db, &dest);
    if result.is_empty() {
        if st.dbs[s.db].remove(&dest).is_some() {
            st.mark_write(s.db, &dest);
            st.notify_event(s.db, classes::GENERIC, "del", &dest);
        }
        return RespValue::Integer(0);
    }
    let len = result.len();
    st.dbs[s.db].insert(dest.clone(), Entry::new(Value::ZSet(result)));
    st.mark_write(s.db, &dest);
    st.notify_event(s.db, classes::ZSET, event, &dest);
    RespValue::Integer(len as i64)
}

pub fn zunion(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_reply(st, s, args, ZOp::Union)
}

pub fn zinter(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_reply(st, s, args, ZOp::Inter)
}

pub fn zdiff(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_reply(st, s, args, ZOp::Diff)
}

pub fn zunionstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_store(st, s, args, ZOp::Union, "zunionstore")
}

pub fn zinterstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_store(st, s, args, ZOp::Inter, "zinterstore")
}

pub fn zdiffstore(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    zalgebra_store(st, s, args, ZOp::Diff, "zdiffstore")
}

pub fn zintercard(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let numkeys = match parse_i64(&args[0]) {
        Ok(n) if n > 0 => n as usize,
        Ok(_) => return RespValue::error("ERR numkeys should be greater than 0"),
        Err(e) => return e.into(),
    };
    if args.len() < 1 + numkeys {
        return EngineError::Syntax.into();
    }
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
    let parsed = AlgebraArgs {
        keys: args[1..1 + numkeys].to_vec(),
        weights: vec![1.0; numkeys],
        aggregate: Agg::Sum,
        with_scores: false,
    };
    match zset_algebra(st, s.db, &parsed, ZOp::Inter) {
        Ok(result) => RespValue::Integer(result.len().min(limit) as i64),
        Err(e) => e.into(),
    }
}

pub fn zscan(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let cursor = match parse_cursor(&args[1]) {
        Ok(c) => c,
        Err(e) => return e.into(),
    };
    let (pattern, count) = match parse_scan_opts(&args[2..]) {
        Ok(v) => v,
        Err(e) => return e.into(),
    };
    let items: Vec<(Vec<u8>, f64)> = match st.zset(s.db, &args[0]) {
        Ok(Some(zset)) => zset.iter().map(|(m, sc)| (m.to_vec(), sc)).collect(),
        Ok(None) => Vec::new(),
        Err(e) => return e.into(),
    };
    let (next, page) = scan_page(items, cursor, count);
    let mut flat = Vec::new();
    for (member, score) in page {
        if let Some(p) = &pattern {
            if !crate::glob::glob_match(p, &member) {
                continue;
            }
        }
        flat.push(RespValue::bulk(member));
        flat.push(RespValue::bulk(format_f64(score).into_bytes()));
    }
    RespValue::array(vec![
        RespValue::bulk(next.to_string().into_bytes()),
        RespValue::Array(Some(flat)),
    ])
}
