//! Stream commands: append, ranges, trims, consumer groups and the
//! pending-entries list machinery.

use std::sync::Arc;

use crate::error::EngineError;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::blocking::WaitKind;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::server::Shared;
use crate::store::stream::{Consumer, ConsumerGroup, PendingEntry, StreamFields, StreamId};

use super::lists::{deadline_for, park};
use super::keyword;

fn entry_frame(id: StreamId, fields: StreamFields) -> RespValue {
    let mut flat = Vec::with_capacity(fields.len() * 2);
    for (f, v) in fields {
        flat.push(RespValue::bulk(f));
        flat.push(RespValue::bulk(v));
    }
    RespValue::array(vec![
        RespValue::bulk(id.to_bytes()),
        RespValue::Array(Some(flat)),
    ])
}

fn entries_frame(entries: Vec<(StreamId, StreamFields)>) -> RespValue {
    RespValue::Array(Some(
        entries
            .into_iter()
            .map(|(id, fields)| entry_frame(id, fields))
            .collect(),
    ))
}

fn no_group(key: &[u8], group: &[u8]) -> EngineError {
    EngineError::NoGroup {
        group: String::from_utf8_lossy(group).into_owned(),
        key: String::from_utf8_lossy(key).into_owned(),
    }
}

// --- XADD ----------------------------------------------------------------

enum TrimStrategy {
    MaxLen(usize),
    MinId(StreamId),
}

/// Parse `MAXLEN|MINID [~|=] threshold [LIMIT n]` starting at `args[*i]`.
fn parse_trim(args: &[Vec<u8>], i: &mut usize) -> Result<TrimStrategy, EngineError> {
    let by_len = keyword(&args[*i], "MAXLEN");
    *i += 1;
    let mut approximate = false;
    if *i < args.len() && (args[*i] == b"~" || args[*i] == b"=") {
        approximate = args[*i] == b"~";
        *i += 1;
    }
    if *i >= args.len() {
        return Err(EngineError::Syntax);
    }
    let strategy = if by_len {
        let n = parse_i64(&args[*i])?;
        if n < 0 {
            return Err(EngineError::other(
                "value is out of range, must be positive",
            ));
        }
        TrimStrategy::MaxLen(n as usize)
    } else {
        TrimStrategy::MinId(StreamId::parse(&args[*i], 0)?)
    };
    *i += 1;
    if *i < args.len() && keyword(&args[*i], "LIMIT") {
        if !approximate {
            return Err(EngineError::other(
                "syntax error, LIMIT cannot be used without the special ~ option",
            ));
        }
        if *i + 1 >= args.len() {
            return Err(EngineError::Syntax);
        }
        parse_i64(&args[*i + 1])?;
        *i += 2;
    }
    Ok(strategy)
}

fn apply_trim(stream: &mut crate::store::stream::Stream, strategy: &TrimStrategy) -> usize {
    match strategy {
        TrimStrategy::MaxLen(n) => stream.trim_maxlen(*n),
        TrimStrategy::MinId(id) => stream.trim_minid(*id),
    }
}

pub fn xadd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let mut i = 1;
    let mut nomkstream = false;
    let mut trim = None;
    loop {
        if i >= args.len() {
            return EngineError::Syntax.into();
        }
        if keyword(&args[i], "NOMKSTREAM") {
            nomkstream = true;
            i += 1;
        } else if keyword(&args[i], "MAXLEN") || keyword(&args[i], "MINID") {
            match parse_trim(args, &mut i) {
                Ok(t) => trim = Some(t),
                Err(e) => return e.into(),
            }
        } else {
            break;
        }
    }
    let id_spec = &args[i];
    i += 1;
    let tail = &args[i..];
    if tail.is_empty() || tail.len() % 2 != 0 {
        return RespValue::error("ERR wrong number of arguments for 'xadd' command");
    }
    let fields: StreamFields = tail
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect();

    if nomkstream && !st.exists(s.db, key) {
        return RespValue::null();
    }
    let now = st.now_ms;
    let id = {
        let stream = match st.stream_or_create(s.db, key) {
            Ok(stream) => stream,
            Err(e) => return e.into(),
        };
        let id = match stream.next_id(id_spec, now) {
            Ok(id) => id,
            Err(e) => return e.into(),
        };
        stream.add(id, fields);
        if let Some(strategy) = &trim {
            apply_trim(stream, strategy);
        }
        id
    };
    st.mark_write(s.db, key);
    st.notify_event(s.db, classes::STREAM, "xadd", key);
    RespValue::bulk(id.to_bytes())
}

pub fn xlen(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match st.stream(s.db, &args[0]) {
        Ok(Some(stream)) => RespValue::Integer(stream.len() as i64),
        Ok(None) => RespValue::Integer(0),
        Err(e) => e.into(),
    }
}

pub fn xrange(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>], rev: bool) -> RespValue {
    let (start_raw, end_raw) = if rev {
        (&args[2], &args[1])
    } else {
        (&args[1], &args[2])
    };
    let (start, end) = match (
        StreamId::parse_range_start(start_raw),
        StreamId::parse_range_end(end_raw),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::InvalidStreamId.into(),
    };
    let count = match args.get(3) {
        Some(w) if keyword(w, "COUNT") => match args.get(4).map(|r| parse_i64(r)) {
            Some(Ok(n)) if n >= 0 => Some(n as usize),
            _ => return EngineError::NotInteger.into(),
        },
        Some(_) => return EngineError::Syntax.into(),
        None => None,
    };
    match st.stream(s.db, &args[0]) {
        Ok(Some(stream)) => entries_frame(stream.range(start, end, count, rev)),
        Ok(None) => RespValue::Array(Some(Vec::new())),
        Err(e) => e.into(),
    }
}

pub fn xdel(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut ids = Vec::with_capacity(args.len() - 1);
    for raw in &args[1..] {
        match StreamId::parse(raw, 0) {
            Ok(id) => ids.push(id),
            Err(e) => return e.into(),
        }
    }
    let removed = match st.stream_mut(s.db, &args[0]) {
        Ok(Some(stream)) => ids.iter().filter(|id| stream.remove(id)).count(),
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if removed > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::STREAM, "xdel", &args[0]);
    }
    RespValue::Integer(removed as i64)
}

pub fn xtrim(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut i = 1;
    if !(keyword(&args[1], "MAXLEN") || keyword(&args[1], "MINID")) {
        return EngineError::Syntax.into();
    }
    let strategy = match parse_trim(args, &mut i) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    if i != args.len() {
        return EngineError::Syntax.into();
    }
    let removed = match st.stream_mut(s.db, &args[0]) {
        Ok(Some(stream)) => apply_trim(stream, &strategy),
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if removed > 0 {
        st.mark_write(s.db, &args[0]);
        st.notify_event(s.db, classes::STREAM, "xtrim", &args[0]);
    }
    RespValue::Integer(removed as i64)
}

pub fn xsetid(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let id = match StreamId::parse(&args[1], 0) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };
    let mut entries_added = None;
    let mut max_deleted = None;
    let mut i = 2;
    while i < args.len() {
        if keyword(&args[i], "ENTRIESADDED") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => entries_added = Some(n as u64),
                _ => return EngineError::NotInteger.into(),
            }
            i += 2;
        } else if keyword(&args[i], "MAXDELETEDID") && i + 1 < args.len() {
            match StreamId::parse(&args[i + 1], 0) {
                Ok(id) => max_deleted = Some(id),
                Err(e) => return e.into(),
            }
            i += 2;
        } else {
            return EngineError::Syntax.into();
        }
    }
    let result = match st.stream_mut(s.db, &args[0]) {
        Ok(Some(stream)) => {
            if stream
                .entries
                .keys()
                .next_back()
                .map_or(false, |last| id < *last)
            {
                Err(EngineError::XsetidTooSmall)
            } else {
                stream.last_id = id;
                if let Some(n) = entries_added {
                    stream.entries_added = n;
                }
                if let Some(m) = max_deleted {
                    stream.max_deleted_id = m;
                }
                Ok(())
            }
        }
        Ok(None) => Err(EngineError::other(
            "The XSETID command requires the key to exist.",
        )),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            st.mark_write(s.db, &args[0]);
            RespValue::ok()
        }
        Err(e) => e.into(),
    }
}

// --- XREAD ---------------------------------------------------------------

struct ReadArgs {
    count: Option<usize>,
    block_ms: Option<u64>,
    keys: Vec<Vec<u8>>,
    ids: Vec<Vec<u8>>,
}

fn parse_read_args(args: &[Vec<u8>]) -> Result<ReadArgs, RespValue> {
    let mut count = None;
    let mut block_ms = None;
    let mut i = 0;
    while i < args.len() {
        if keyword(&args[i], "COUNT") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => count = Some(n as usize),
                _ => return Err(EngineError::NotInteger.into()),
            }
            i += 2;
        } else if keyword(&args[i], "BLOCK") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => block_ms = Some(n as u64),
                Ok(_) => {
                    return Err(RespValue::error("ERR timeout is negative"));
                }
                Err(_) => {
                    return Err(RespValue::error(
                        "ERR timeout is not an integer or out of range",
                    ));
                }
            }
            i += 2;
        } else if keyword(&args[i], "STREAMS") {
            let rest = &args[i + 1..];
            if rest.is_empty() || rest.len() % 2 != 0 {
                return Err(RespValue::error(
                    "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.",
                ));
            }
            let half = rest.len() / 2;
            return Ok(ReadArgs {
                count,
                block_ms,
                keys: rest[..half].to_vec(),
                ids: rest[half..].to_vec(),
            });
        } else {
            return Err(EngineError::Syntax.into());
        }
    }
    Err(EngineError::Syntax.into())
}

/// Resolve `$` (and, for groups, `>`) anchors to concrete ids.
fn resolve_read_anchor(
    st: &mut ServerState,
    db: usize,
    key: &[u8],
    raw: &[u8],
) -> Result<StreamId, EngineError> {
    if raw == b"$" {
        return Ok(st
            .stream(db, key)?
            .map(|stream| stream.last_id)
            .unwrap_or(StreamId::ZERO));
    }
    StreamId::parse(raw, 0)
}

fn collect_xread(
    st: &mut ServerState,
    db: usize,
    keys: &[Vec<u8>],
    anchors: &[StreamId],
    count: Option<usize>,
) -> Result<Vec<RespValue>, EngineError> {
    let mut out = Vec::new();
    for (key, anchor) in keys.iter().zip(anchors) {
        if let Some(stream) = st.stream(db, key)? {
            let entries = stream.entries_after(*anchor, count);
            if !entries.is_empty() {
                out.push(RespValue::array(vec![
                    RespValue::bulk(key.clone()),
                    entries_frame(entries),
                ]));
            }
        }
    }
    Ok(out)
}

/// Degenerate non-blocking XREAD used inside MULTI and scripts.
pub fn xread_now(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let parsed = match parse_read_args(args) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let mut anchors = Vec::with_capacity(parsed.keys.len());
    for (key, raw) in parsed.keys.iter().zip(&parsed.ids) {
        match resolve_read_anchor(st, s.db, key, raw) {
            Ok(id) => anchors.push(id),
            Err(e) => return e.into(),
        }
    }
    match collect_xread(st, s.db, &parsed.keys, &anchors, parsed.count) {
        Ok(frames) if !frames.is_empty() => RespValue::Array(Some(frames)),
        Ok(_) => RespValue::null_array(),
        Err(e) => e.into(),
    }
}

/// Degenerate non-blocking XREADGROUP used inside MULTI and scripts.
pub fn xreadgroup_now(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if !keyword(&args[0], "GROUP") || args.len() < 3 {
        return EngineError::Syntax.into();
    }
    let group = args[1].clone();
    let consumer = args[2].clone();
    let mut noack = false;
    let rest: Vec<Vec<u8>> = args[3..]
        .iter()
        .filter(|a| {
            if keyword(a, "NOACK") {
                noack = true;
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();
    let parsed = match parse_read_args(&rest) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    match collect_xreadgroup(
        st, s.db, &group, &consumer, &parsed.keys, &parsed.ids, parsed.count, noack,
    ) {
        Ok(frames) if !frames.is_empty() => {
            st.mark_write(s.db, &parsed.keys[0]);
            RespValue::Array(Some(frames))
        }
        Ok(_) => RespValue::null_array(),
        Err(e) => e.into(),
    }
}

pub async fn xread(shared: &Arc<Shared>, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let parsed = match parse_read_args(args) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let deadline = parsed
        .block_ms
        .and_then(|ms| deadline_for(ms as f64 / 1000.0));
    let blocking = parsed.block_ms.is_some() && !s.no_blocking;

    // Anchors resolve once, before the first wait.
    let anchors = {
        let mut st = shared.lock_refreshed();
        let mut anchors = Vec::with_capacity(parsed.keys.len());
        for (key, raw) in parsed.keys.iter().zip(&parsed.ids) {
            match resolve_read_anchor(&mut st, s.db, key, raw) {
                Ok(id) => anchors.push(id),
                Err(e) => return e.into(),
            }
        }
        anchors
    };

    loop {
        let waiter = {
            let mut st = shared.lock_refreshed();
            match collect_xread(&mut st, s.db, &parsed.keys, &anchors, parsed.count) {
                Ok(frames) if !frames.is_empty() => {
                    return RespValue::Array(Some(frames));
                }
                Ok(_) => {}
                Err(e) => return e.into(),
            }
            if !blocking {
                return RespValue::null_array();
            }
            let w = st.blocking.new_waiter(s.id, WaitKind::Stream);
            for key in &parsed.keys {
                st.blocking.register(s.db, key.clone(), w.clone());
            }
            w
        };
        if !park(shared, s.db, &parsed.keys, &waiter, deadline).await {
            return RespValue::null_array();
        }
    }
}

// --- consumer groups -----------------------------------------------------

pub fn xgroup(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"CREATE" => {
            if args.len() < 4 {
                return EngineError::Syntax.into();
            }
            let (key, group, id_raw) = (&args[1], &args[2], &args[3]);
            let mkstream = args[4..].iter().any(|a| keyword(a, "MKSTREAM"));
            if !st.exists(s.db, key) && !mkstream {
                return RespValue::error(
                    "ERR The XGROUP subcommand requires the key to exist. Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically.",
                );
            }
            let created = {
                let stream = match st.stream_or_create(s.db, key) {
                    Ok(stream) => stream,
                    Err(e) => return e.into(),
                };
                let anchor = if id_raw.as_slice() == b"$" {
                    stream.last_id
                } else {
                    match StreamId::parse(id_raw, 0) {
                        Ok(id) => id,
                        Err(e) => return e.into(),
                    }
                };
                if stream.groups.contains_key(group.as_slice()) {
                    Err(EngineError::BusyGroup)
                } else {
                    stream.groups.insert(
                        group.clone(),
                        ConsumerGroup {
                            last_delivered: anchor,
                            ..ConsumerGroup::default()
                        },
                    );
                    Ok(())
                }
            };
            match created {
                Ok(()) => {
                    st.mark_write(s.db, key);
                    RespValue::ok()
                }
                Err(e) => e.into(),
            }
        }
        b"DESTROY" => {
            if args.len() != 3 {
                return EngineError::Syntax.into();
            }
            let removed = match st.stream_mut(s.db, &args[1]) {
                Ok(Some(stream)) => stream.groups.remove(args[2].as_slice()).is_some(),
                Ok(None) => false,
                Err(e) => return e.into(),
            };
            if removed {
                st.mark_write(s.db, &args[1]);
            }
            RespValue::Integer(i64::from(removed))
        }
        b"CREATECONSUMER" => {
            if args.len() != 4 {
                return EngineError::Syntax.into();
            }
            let now = st.now_ms;
            match with_group(st, s.db, &args[1], &args[2], |group| {
                Ok(match group.consumers.contains_key(args[3].as_slice()) {
                    true => 0,
                    false => {
                        group
                            .consumers
                            .insert(args[3].clone(), Consumer { seen_time_ms: now });
                        1
                    }
                })
            }) {
                Ok(n) => RespValue::Integer(n),
                Err(e) => e.into(),
            }
        }
        b"DELCONSUMER" => {
            if args.len() != 4 {
                return EngineError::Syntax.into();
            }
            match with_group(st, s.db, &args[1], &args[2], |group| {
                let pending = group.pending_for(&args[3]) as i64;
                group
                    .pending
                    .retain(|_, p| p.consumer != args[3].as_slice());
                group.consumers.remove(args[3].as_slice());
                Ok(pending)
            }) {
                Ok(n) => RespValue::Integer(n),
                Err(e) => e.into(),
            }
        }
        b"SETID" => {
            if args.len() < 4 {
                return EngineError::Syntax.into();
            }
            let key = args[1].clone();
            let last = match st.stream(s.db, &key) {
                Ok(Some(stream)) => stream.last_id,
                Ok(None) => return no_group(&key, &args[2]).into(),
                Err(e) => return e.into(),
            };
            let anchor = if args[3].as_slice() == b"$" {
                last
            } else {
                match StreamId::parse(&args[3], 0) {
                    Ok(id) => id,
                    Err(e) => return e.into(),
                }
            };
            match with_group(st, s.db, &key, &args[2], |group| {
                group.last_delivered = anchor;
                Ok(())
            }) {
                Ok(()) => RespValue::ok(),
                Err(e) => e.into(),
            }
        }
        _ => RespValue::error(format!(
            "ERR Unknown XGROUP subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

fn with_group<T>(
    st: &mut ServerState,
    db: usize,
    key: &[u8],
    group: &[u8],
    f: impl FnOnce(&mut ConsumerGroup) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    match st.stream_mut(db, key)? {
        Some(stream) => match stream.group_mut(group) {
            Some(g) => f(g),
            None => Err(no_group(key, group)),
        },
        None => Err(no_group(key, group)),
    }
}

fn collect_xreadgroup(
    st: &mut ServerState,
    db: usize,
    group_name: &[u8],
    consumer: &[u8],
    keys: &[Vec<u8>],
    ids: &[Vec<u8>],
    count: Option<usize>,
    noack: bool,
) -> Result<Vec<RespValue>, EngineError> {
    let now = st.now_ms;
    let mut out = Vec::new();
    for (key, raw) in keys.iter().zip(ids) {
        let frames = {
            let stream = match st.stream_mut(db, key)? {
                Some(stream) => stream,
                None => return Err(no_group(key, group_name)),
            };
            if raw.as_slice() == b">" {
                let entries = {
                    let group = stream
                        .groups
                        .get(group_name)
                        .ok_or_else(|| no_group(key, group_name))?;
                    stream.entries_after(group.last_delivered, count)
                };
                let group = stream
                    .groups
                    .get_mut(group_name)
                    .ok_or_else(|| no_group(key, group_name))?;
                group
                    .consumers
                    .entry(consumer.to_vec())
                    .or_insert(Consumer { seen_time_ms: now })
                    .seen_time_ms = now;
                if entries.is_empty() {
                    None
                } else {
                    for (id, _) in &entries {
                        group.last_delivered = *id;
                        group.entries_read += 1;
                        if !noack {
                            group.pending.insert(
                                *id,
                                PendingEntry {
                                    consumer: consumer.to_vec(),
                                    delivery_time_ms: now,
                                    delivery_count: 1,
                                },
                            );
                        }
                    }
                    Some(entries_frame(entries))
                }
            } else {
                // History replay: this consumer's PEL from the given id.
                let anchor = StreamId::parse(raw, 0)?;
                let group = stream
                    .groups
                    .get(group_name)
                    .ok_or_else(|| no_group(key, group_name))?;
                let ids: Vec<StreamId> = group
                    .pending
                    .range(anchor..)
                    .filter(|(_, p)| p.consumer == consumer)
                    .map(|(id, _)| *id)
                    .take(count.unwrap_or(usize::MAX))
                    .collect();
                let frames: Vec<RespValue> = ids
                    .into_iter()
                    .map(|id| match stream.entries.get(&id) {
                        Some(fields) => entry_frame(id, fields.clone()),
                        None => RespValue::array(vec![
                            RespValue::bulk(id.to_bytes()),
                            RespValue::null_array(),
                        ]),
                    })
                    .collect();
                Some(RespValue::Array(Some(frames)))
            }
        };
        if let Some(frame) = frames {
            out.push(RespValue::array(vec![RespValue::bulk(key.clone()), frame]));
        }
    }
    Ok(out)
}

pub async fn xreadgroup(shared: &Arc<Shared>, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if !keyword(&args[0], "GROUP") || args.len() < 3 {
        return EngineError::Syntax.into();
    }
    let group = args[1].clone();
    let consumer = args[2].clone();
    let mut noack = false;
    let rest: Vec<Vec<u8>> = args[3..]
        .iter()
        .filter(|a| {
            if keyword(a, "NOACK") {
                noack = true;
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();
    let parsed = match parse_read_args(&rest) {
        Ok(p) => p,
        Err(reply) => return reply,
    };
    let deadline = parsed
        .block_ms
        .and_then(|ms| deadline_for(ms as f64 / 1000.0));
    let wants_new = parsed.ids.iter().any(|id| id.as_slice() == b">");
    let blocking = parsed.block_ms.is_some() && !s.no_blocking && wants_new;

    loop {
        let waiter = {
            let mut st = shared.lock_refreshed();
            match collect_xreadgroup(
                &mut st,
                s.db,
                &group,
                &consumer,
                &parsed.keys,
                &parsed.ids,
                parsed.count,
                noack,
            ) {
                Ok(frames) if !frames.is_empty() => {
                    st.mark_write(s.db, &parsed.keys[0]);
                    return RespValue::Array(Some(frames));
                }
                Ok(_) => {}
                Err(e) => return e.into(),
            }
            if !blocking {
                return RespValue::null_array();
            }
            let w = st.blocking.new_waiter(s.id, WaitKind::Stream);
            for key in &parsed.keys {
                st.blocking.register(s.db, key.clone(), w.clone());
            }
            w
        };
        if !park(shared, s.db, &parsed.keys, &waiter, deadline).await {
            return RespValue::null_array();
        }
    }
}

pub fn xack(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut ids = Vec::new();
    for raw in &args[2..] {
        match StreamId::parse(raw, 0) {
            Ok(id) => ids.push(id),
            Err(e) => return e.into(),
        }
    }
    let acked = match st.stream_mut(s.db, &args[0]) {
        Ok(Some(stream)) => match stream.group_mut(&args[1]) {
            Some(group) => ids
                .iter()
                .filter(|id| group.pending.remove(id).is_some())
                .count(),
            None => 0,
        },
        Ok(None) => 0,
        Err(e) => return e.into(),
    };
    if acked > 0 {
        st.mark_write(s.db, &args[0]);
    }
    RespValue::Integer(acked as i64)
}

pub fn xpending(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let now = st.now_ms;
    let (key, group_name) = (&args[0], &args[1]);

    if args.len() == 2 {
        // Summary form.
        let summary = match st.stream(s.db, key) {
            Ok(Some(stream)) => match stream.groups.get(group_name) {
                Some(group) => {
                    let count = group.pending.len() as i64;
                    if count == 0 {
                        RespValue::array(vec![
                            RespValue::Integer(0),
                            RespValue::null(),
                            RespValue::null(),
                            RespValue::null_array(),
                        ])
                    } else {
                        let smallest = *group.pending.keys().next().expect("non-empty");
                        let largest = *group.pending.keys().next_back().expect("non-empty");
                        let mut per_consumer: Vec<(Vec<u8>, usize)> = Vec::new();
                        for p in group.pending.values() {
                            match per_consumer.iter_mut().find(|(c, _)| c == &p.consumer) {
                                Some((_, n)) => *n += 1,
                                None => per_consumer.push((p.consumer.clone(), 1)),
                            }
                        }
                        per_consumer.sort();
                        RespValue::array(vec![
                            RespValue::Integer(count),
                            RespValue::bulk(smallest.to_bytes()),
                            RespValue::bulk(largest.to_bytes()),
                            RespValue::Array(Some(
                                per_consumer
                                    .into_iter()
                                    .map(|(c, n)| {
                                        RespValue::array(vec![
                                            RespValue::bulk(c),
                                            RespValue::bulk(
                                                n.to_string().into_bytes(),
                                            ),
                                        ])
                                    })
                                    .collect(),
                            )),
                        ])
                    }
                }
                None => return no_group(key, group_name).into(),
            },
            Ok(None) => return no_group(key, group_name).into(),
            Err(e) => return e.into(),
        };
        return summary;
    }

    // Extended form: [IDLE ms] start end count [consumer]
    let mut i = 2;
    let mut min_idle = 0u64;
    if keyword(&args[i], "IDLE") {
        if i + 1 >= args.len() {
            return EngineError::Syntax.into();
        }
        match parse_i64(&args[i + 1]) {
            Ok(n) if n >= 0 => min_idle = n as u64,
            _ => return EngineError::NotInteger.into(),
        }
        i += 2;
    }
    if args.len() < i + 3 {
        return EngineError::Syntax.into();
    }
    let (start, end) = match (
        StreamId::parse_range_start(&args[i]),
        StreamId::parse_range_end(&args[i + 1]),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return EngineError::InvalidStreamId.into(),
    };
    let count = match parse_i64(&args[i + 2]) {
        Ok(n) if n >= 0 => n as usize,
        _ => return EngineError::NotInteger.into(),
    };
    let consumer_filter = args.get(i + 3).cloned();
    if args.len() > i + 4 {
        return EngineError::Syntax.into();
    }

    match st.stream(s.db, key) {
        Ok(Some(stream)) => match stream.groups.get(group_name) {
            Some(group) => {
                let rows: Vec<RespValue> = group
                    .pending
                    .range(start..=end)
                    .filter(|(_, p)| now.saturating_sub(p.delivery_time_ms) >= min_idle)
                    .filter(|(_, p)| {
                        consumer_filter
                            .as_ref()
                            .map_or(true, |c| &p.consumer == c)
                    })
                    .take(count)
                    .map(|(id, p)| {
                        RespValue::array(vec![
                            RespValue::bulk(id.to_bytes()),
                            RespValue::bulk(p.consumer.clone()),
                            RespValue::Integer(
                                now.saturating_sub(p.delivery_time_ms) as i64
                            ),
                            RespValue::Integer(p.delivery_count as i64),
                        ])
                    })
                    .collect();
                RespValue::Array(Some(rows))
            }
            None => no_group(key, group_name).into(),
        },
        Ok(None) => no_group(key, group_name).into(),
        Err(e) => e.into(),
    }
}

pub fn xclaim(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let now = st.now_ms;
    let (key, group_name, consumer) = (&args[0], &args[1], &args[2]);
    let min_idle = match parse_i64(&args[3]) {
        Ok(n) if n >= 0 => n as u64,
        _ => {
            return RespValue::error(
                "ERR Invalid min-idle-time argument for XCLAIM",
            );
        }
    };

    let mut ids = Vec::new();
    let mut i = 4;
    while i < args.len() {
        match StreamId::parse(&args[i], 0) {
            Ok(id) => {
                ids.push(id);
                i += 1;
            }
            Err(_) => break,
        }
    }
    if ids.is_empty() {
        return EngineError::InvalidStreamId.into();
    }

    let mut set_idle: Option<u64> = None;
    let mut set_time: Option<u64> = None;
    let mut retry_count: Option<u64> = None;
    let mut force = false;
    let mut just_id = false;
    while i < args.len() {
        if keyword(&args[i], "IDLE") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => set_idle = Some(n as u64),
                _ => return EngineError::NotInteger.into(),
            }
            i += 2;
        } else if keyword(&args[i], "TIME") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => set_time = Some(n as u64),
                _ => return EngineError::NotInteger.into(),
            }
            i += 2;
        } else if keyword(&args[i], "RETRYCOUNT") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n >= 0 => retry_count = Some(n as u64),
                _ => return EngineError::NotInteger.into(),
            }
            i += 2;
        } else if keyword(&args[i], "FORCE") {
            force = true;
            i += 1;
        } else if keyword(&args[i], "JUSTID") {
            just_id = true;
            i += 1;
        } else if keyword(&args[i], "LASTID") && i + 1 < args.len() {
            i += 2;
        } else {
            return EngineError::Syntax.into();
        }
    }

    let delivery_time = set_time.unwrap_or_else(|| now.saturating_sub(set_idle.unwrap_or(0)));

    let claimed: Result<Vec<(StreamId, Option<StreamFields>)>, EngineError> = (|| {
        let stream = match st.stream_mut(s.db, key)? {
            Some(stream) => stream,
            None => return Err(no_group(key, group_name)),
        };
        if !stream.groups.contains_key(group_name) {
            return Err(no_group(key, group_name));
        }
        let mut out = Vec::new();
        for id in &ids {
            let exists_in_stream = stream.entries.contains_key(id);
            let group = stream.groups.get_mut(group_name).expect("checked");
            let in_pel = group.pending.contains_key(id);
            if !in_pel && !(force && exists_in_stream) {
                continue;
            }
            if !exists_in_stream {
                // Lazily reap PEL entries whose data was deleted.
                group.pending.remove(id);
                continue;
            }
            if in_pel {
                let idle = now.saturating_sub(
                    group.pending.get(id).expect("checked").delivery_time_ms,
                );
                if idle < min_idle {
                    continue;
                }
            }
            let prior_count = group.pending.get(id).map_or(0, |p| p.delivery_count);
            let delivery_count = retry_count.unwrap_or(if just_id {
                prior_count
            } else {
                prior_count + 1
            });
            group.pending.insert(
                *id,
                PendingEntry {
                    consumer: consumer.clone(),
                    delivery_time_ms: delivery_time,
                    delivery_count,
                },
            );
            group
                .consumers
                .entry(consumer.clone())
                .or_insert(Consumer { seen_time_ms: now })
                .seen_time_ms = now;
            let fields = if just_id {
                None
            } else {
                stream.entries.get(id).cloned()
            };
            out.push((*id, fields));
        }
        Ok(out)
    })();

    match claimed {
        Ok(items) => {
            st.mark_write(s.db, key);
            if just_id {
                RespValue::Array(Some(
                    items
                        .into_iter()
                        .map(|(id, _)| RespValue::bulk(id.to_bytes()))
                        .collect(),
                ))
            } else {
                RespValue::Array(Some(
                    items
                        .into_iter()
                        .map(|(id, fields)| entry_frame(id, fields.unwrap_or_default()))
                        .collect(),
                ))
            }
        }
        Err(e) => e.into(),
    }
}

pub fn xautoclaim(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let now = st.now_ms;
    let (key, group_name, consumer) = (&args[0], &args[1], &args[2]);
    let min_idle = match parse_i64(&args[3]) {
        Ok(n) if n >= 0 => n as u64,
        _ => {
            return RespValue::error(
                "ERR Invalid min-idle-time argument for XAUTOCLAIM",
            );
        }
    };
    let start = match StreamId::parse_range_start(&args[4]) {
        Ok(id) => id,
        Err(e) => return e.into(),
    };
    let mut count = 100usize;
    let mut just_id = false;
    let mut i = 5;
    while i < args.len() {
        if keyword(&args[i], "COUNT") && i + 1 < args.len() {
            match parse_i64(&args[i + 1]) {
                Ok(n) if n > 0 => count = n as usize,
                _ => return EngineError::NotInteger.into(),
            }
            i += 2;
        } else if keyword(&args[i], "JUSTID") {
            just_id = true;
            i += 1;
        } else {
            return EngineError::Syntax.into();
        }
    }

    let result: Result<(StreamId, Vec<(StreamId, Option<StreamFields>)>, Vec<StreamId>), EngineError> =
        (|| {
            let stream = match st.stream_mut(s.db, key)? {
                Some(stream) => stream,
                None => return Err(no_group(key, group_name)),
            };
            if !stream.groups.contains_key(group_name) {
                return Err(no_group(key, group_name));
            }
            let candidate_ids: Vec<StreamId> = {
                let group = stream.groups.get(group_name).expect("checked");
                group.pending.range(start..).map(|(id, _)| *id).collect()
            };
            let mut claimed = Vec::new();
            let mut deleted = Vec::new();
            let mut cursor = StreamId::ZERO;
            for id in candidate_ids {
                if claimed.len() >= count {
                    cursor = id;
                    break;
                }
                let exists_in_stream = stream.entries.contains_key(&id);
                let group = stream
                    .groups
                    .get_mut(group_name)
                    .expect("checked");
                if !exists_in_stream {
                    group.pending.remove(&id);
                    deleted.push(id);
                    continue;
                }
                let idle = now.saturating_sub(
                    group.pending.get(&id).expect("in pel").delivery_time_ms,
                );
                if idle < min_idle {
                    continue;
                }
                let prior = group.pending.get(&id).expect("in pel").delivery_count;
                group.pending.insert(
                    id,
                    PendingEntry {
                        consumer: consumer.clone(),
                        delivery_time_ms: now,
                        delivery_count: if just_id { prior } else { prior + 1 },
                    },
                );
                group
                    .consumers
                    .entry(consumer.clone())
                    .or_insert(Consumer { seen_time_ms: now })
                    .seen_time_ms = now;
                let fields = if just_id {
                    None
                } else {
                    stream.entries.get(&id).cloned()
                };
                claimed.push((id, fields));
            }
            Ok((cursor, claimed, deleted))
        })();

    match result {
        Ok((cursor, claimed, deleted)) => {
            st.mark_write(s.db, key);
            let entries = if just_id {
                RespValue::Array(Some(
                    claimed
                        .into_iter()
                        .map(|(id, _)| RespValue::bulk(id.to_bytes()))
                        .collect(),
                ))
            } else {
                RespValue::Array(Some(
                    claimed
                        .into_iter()
                        .map(|(id, fields)| entry_frame(id, fields.unwrap_or_default()))
                        .collect(),
                ))
            };
            RespValue::array(vec![
                RespValue::bulk(cursor.to_bytes()),
                entries,
                RespValue::Array(Some(
                    deleted
                        .into_iter()
                        .map(|id| RespValue::bulk(id.to_bytes()))
                        .collect(),
                )),
            ])
        }
        Err(e) => e.into(),
    }
}

pub fn xinfo(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let now = st.now_ms;
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"STREAM" => {
            if args.len() != 2 {
                return EngineError::Syntax.into();
            }
            match st.stream(s.db, &args[1]) {
                Ok(Some(stream)) => {
                    let first = stream
                        .entries
                        .iter()
                        .next()
                        .map(|(id, f)| entry_frame(*id, f.clone()))
                        .unwrap_or(RespValue::null());
                    let last = stream
                        .entries
                        .iter()
                        .next_back()
                        .map(|(id, f)| entry_frame(*id, f.clone()))
                        .unwrap_or(RespValue::null());
                    RespValue::Map(vec![
                        (
                            RespValue::bulk(b"length".to_vec()),
                            RespValue::Integer(stream.len() as i64),
                        ),
                        (
                            RespValue::bulk(b"radix-tree-keys".to_vec()),
                            RespValue::Integer(1),
                        ),
                        (
                            RespValue::bulk(b"radix-tree-nodes".to_vec()),
                            RespValue::Integer(2),
                        ),
                        (
                            RespValue::bulk(b"last-generated-id".to_vec()),
                            RespValue::bulk(stream.last_id.to_bytes()),
                        ),
                        (
                            RespValue::bulk(b"max-deleted-entry-id".to_vec()),
                            RespValue::bulk(stream.max_deleted_id.to_bytes()),
                        ),
                        (
                            RespValue::bulk(b"entries-added".to_vec()),
                            RespValue::Integer(stream.entries_added as i64),
                        ),
                        (
                            RespValue::bulk(b"groups".to_vec()),
                            RespValue::Integer(stream.groups.len() as i64),
                        ),
                        (RespValue::bulk(b"first-entry".to_vec()), first),
                        (RespValue::bulk(b"last-entry".to_vec()), last),
                    ])
                }
                Ok(None) => EngineError::NoSuchKey.into(),
                Err(e) => e.into(),
            }
        }
        b"GROUPS" => {
            if args.len() != 2 {
                return EngineError::Syntax.into();
            }
            match st.stream(s.db, &args[1]) {
                Ok(Some(stream)) => {
                    let mut names: Vec<&Vec<u8>> = stream.groups.keys().collect();
                    names.sort();
                    RespValue::Array(Some(
                        names
                            .into_iter()
                            .map(|name| {
                                let g = &stream.groups[name.as_slice()];
                                RespValue::Map(vec![
                                    (
                                        RespValue::bulk(b"name".to_vec()),
                                        RespValue::bulk(name.clone()),
                                    ),
                                    (
                                        RespValue::bulk(b"consumers".to_vec()),
                                        RespValue::Integer(g.consumers.len() as i64),
                                    ),
                                    (
                                        RespValue::bulk(b"pending".to_vec()),
                                        RespValue::Integer(g.pending.len() as i64),
                                    ),
                                    (
                                        RespValue::bulk(b"last-delivered-id".to_vec()),
                                        RespValue::bulk(g.last_delivered.to_bytes()),
                                    ),
                                    (
                                        RespValue::bulk(b"entries-read".to_vec()),
                                        RespValue::Integer(g.entries_read as i64),
                                    ),
                                    (
                                        RespValue::bulk(b"lag".to_vec()),
                                        RespValue::Integer(
                                            (stream.entries_added - g.entries_read.min(stream.entries_added))
                                                as i64,
                                        ),
                                    ),
                                ])
                            })
                            .collect(),
                    ))
                }
                Ok(None) => EngineError::NoSuchKey.into(),
                Err(e) => e.into(),
            }
        }
        b"CONSUMERS" => {
            if args.len() != 3 {
                return EngineError::Syntax.into();
            }
            match st.stream(s.db, &args[1]) {
                Ok(Some(stream)) => match stream.groups.get(args[2].as_slice()) {
                    Some(group) => {
                        let mut names: Vec<&Vec<u8>> = group.consumers.keys().collect();
                        names.sort();
                        RespValue::Array(Some(
                            names
                                .into_iter()
                                .map(|name| {
                                    let c = &group.consumers[name.as_slice()];
                                    RespValue::Map(vec![
                                        (
                                            RespValue::bulk(b"name".to_vec()),
                                            RespValue::bulk(name.clone()),
                                        ),
                                        (
                                            RespValue::bulk(b"pending".to_vec()),
                                            RespValue::Integer(
                                                group.pending_for(name) as i64
                                            ),
                                        ),
                                        (
                                            RespValue::bulk(b"idle".to_vec()),
                                            RespValue::Integer(
                                                now.saturating_sub(c.seen_time_ms) as i64,
                                            ),
                                        ),
                                    ])
                                })
                                .collect(),
                        ))
                    }
                    None => no_group(&args[1], &args[2]).into(),
                },
                Ok(None) => EngineError::NoSuchKey.into(),
                Err(e) => e.into(),
            }
        }
        _ => RespValue::error(format!(
            "ERR Unknown XINFO subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}
