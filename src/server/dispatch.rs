//! The dispatcher: name resolution, arity and connection-state gates,
//! transaction queueing, and the map from command id to handler. MULTI /
//! EXEC / WATCH live here because they drive the dispatch loop itself.

use std::sync::Arc;

use crate::error::EngineError;
use crate::num::parse_f64;
use crate::resp::RespValue;
use crate::server::commands::{
    admin, bitmaps, geo, hashes, hyperloglog, keyspace, lists, pubsub, scripting, sets,
    streams, strings, zsets,
};
use crate::server::registry::{self, flags, CommandId, CommandSpec};
use crate::server::session::{ReplyMode, Session, TxState, WatchedKey};
use crate::server::state::ServerState;
use crate::server::Shared;

fn unknown_command_error(argv: &[Vec<u8>]) -> String {
    let mut tail = String::new();
    for arg in argv.iter().skip(1).take(20) {
        tail.push_str(&format!("'{}', ", String::from_utf8_lossy(arg)));
    }
    format!(
        "ERR unknown command '{}', with args beginning with: {}",
        String::from_utf8_lossy(&argv[0]),
        tail
    )
}

fn arity_error(spec: &CommandSpec) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        spec.name
    ))
}

fn mark_dirty(session: &mut Session) {
    if let TxState::Queuing { dirty, .. } = &mut session.tx {
        *dirty = true;
    }
}

/// Full command execution for a connection. `None` means no reply frame is
/// written (CLIENT REPLY OFF/SKIP, SHUTDOWN).
pub async fn execute(
    shared: &Arc<Shared>,
    session: &mut Session,
    argv: Vec<Vec<u8>>,
) -> Option<RespValue> {
    let skip_this = session.reply_mode == ReplyMode::Skip;
    if skip_this {
        session.reply_mode = ReplyMode::On;
    }
    let reply = execute_inner(shared, session, argv).await;
    if skip_this || session.reply_mode == ReplyMode::Off {
        return None;
    }
    Some(reply)
}

async fn execute_inner(
    shared: &Arc<Shared>,
    session: &mut Session,
    argv: Vec<Vec<u8>>,
) -> RespValue {
    if argv.is_empty() {
        return RespValue::error("ERR empty command");
    }
    let Some(spec) = registry::resolve(&argv[0]) else {
        mark_dirty(session);
        return RespValue::error(unknown_command_error(&argv));
    };
    if !spec.arity_ok(argv.len()) {
        mark_dirty(session);
        return arity_error(spec);
    }

    // AUTH gate.
    if !session.authenticated
        && !matches!(
            spec.id,
            CommandId::Auth | CommandId::Hello | CommandId::Quit | CommandId::Reset
        )
    {
        return EngineError::NoAuth.into();
    }

    // RESP2 subscribe-mode gate; RESP3 connections are not restricted.
    if session.protocol == 2 && session.is_subscribed() && !spec.has_flag(flags::SUBSCRIBED_OK)
    {
        return RespValue::error(format!(
            "ERR Can't execute '{}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context",
            spec.name
        ));
    }

    // Transaction queueing.
    if session.in_multi() && !spec.has_flag(flags::TX_IMMEDIATE) {
        if matches!(
            spec.id,
            CommandId::Subscribe
                | CommandId::Unsubscribe
                | CommandId::PSubscribe
                | CommandId::PUnsubscribe
        ) {
            mark_dirty(session);
            return RespValue::error(format!(
                "ERR {} is not allowed in transactions",
                spec.name.to_ascii_uppercase()
            ));
        }
        if let TxState::Queuing { queue, .. } = &mut session.tx {
            queue.push(argv);
        }
        return RespValue::simple("QUEUED");
    }

    // Suspension points run without holding the lock continuously.
    match spec.id {
        CommandId::BLPop => return lists::bpop(shared, session, &argv[1..], true).await,
        CommandId::BRPop => return lists::bpop(shared, session, &argv[1..], false).await,
        CommandId::BRPopLPush => {
            return lists::bmove(
                shared, session, &argv[1], &argv[2], false, true, &argv[3],
            )
            .await;
        }
        CommandId::BLMove => {
            let (from_left, to_left) = match (side(&argv[3]), side(&argv[4])) {
                (Some(a), Some(b)) => (a, b),
                _ => return EngineError::Syntax.into(),
            };
            return lists::bmove(
                shared, session, &argv[1], &argv[2], from_left, to_left, &argv[5],
            )
            .await;
        }
        CommandId::BZPopMin => return zsets::bzpop(shared, session, &argv[1..], true).await,
        CommandId::BZPopMax => return zsets::bzpop(shared, session, &argv[1..], false).await,
        CommandId::XRead => return streams::xread(shared, session, &argv[1..]).await,
        CommandId::XReadGroup => return streams::xreadgroup(shared, session, &argv[1..]).await,
        CommandId::Debug if argv.len() >= 3 && argv[1].eq_ignore_ascii_case(b"SLEEP") => {
            let seconds = match parse_f64(&argv[2]) {
                Ok(v) if v >= 0.0 => v,
                _ => return EngineError::NotFloat.into(),
            };
            tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
            return RespValue::ok();
        }
        _ => {}
    }

    let reply = {
        let mut st = shared.lock_refreshed();
        st.commands_processed += 1;
        let reply = dispatch_sync(&mut st, session, spec.id, &argv);
        st.sync_client(session);
        if st.shutdown_requested {
            let ids: Vec<u64> = st.clients.keys().copied().collect();
            for id in ids {
                st.kill_client(id);
            }
        }
        reply
    };
    if session.should_close {
        shared.shutdown_check();
    }
    reply
}

fn side(arg: &[u8]) -> Option<bool> {
    if arg.eq_ignore_ascii_case(b"LEFT") {
        Some(true)
    } else if arg.eq_ignore_ascii_case(b"RIGHT") {
        Some(false)
    } else {
        None
    }
}

/// Scripted-call entry point: bypasses AUTH, forbids the commands flagged
/// NOSCRIPT, and runs in the caller's database selection.
pub fn dispatch_scripted(
    st: &mut ServerState,
    session: &mut Session,
    argv: &[Vec<u8>],
) -> RespValue {
    if argv.is_empty() {
        return RespValue::error("ERR wrong number of arguments");
    }
    let Some(spec) = registry::resolve(&argv[0]) else {
        return RespValue::error(unknown_command_error(argv));
    };
    if !spec.arity_ok(argv.len()) {
        return arity_error(spec);
    }
    if spec.has_flag(flags::NOSCRIPT) {
        return RespValue::error(format!(
            "ERR This Redis command is not allowed from script: {}",
            spec.name
        ));
    }
    dispatch_sync(st, session, spec.id, argv)
}

// --- transactions --------------------------------------------------------

fn multi(session: &mut Session) -> RespValue {
    if session.in_multi() {
        return RespValue::error("ERR MULTI calls can not be nested");
    }
    session.tx = TxState::Queuing {
        queue: Vec::new(),
        dirty: false,
    };
    RespValue::ok()
}

fn discard(session: &mut Session) -> RespValue {
    if !session.in_multi() {
        return RespValue::error("ERR DISCARD without MULTI");
    }
    session.tx = TxState::None;
    session.watches.clear();
    RespValue::ok()
}

fn watch(st: &mut ServerState, session: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if session.in_multi() {
        return RespValue::error("ERR WATCH inside MULTI is not allowed");
    }
    for key in args {
        st.expire_if_needed(session.db, key);
        session.watches.push(WatchedKey {
            db: session.db,
            key: key.clone(),
            epoch: st.dbs[session.db].epoch(),
            version: st.dbs[session.db].version_of(key),
        });
    }
    RespValue::ok()
}

fn unwatch(session: &mut Session) -> RespValue {
    session.watches.clear();
    RespValue::ok()
}

fn exec(st: &mut ServerState, session: &mut Session) -> RespValue {
    let tx = std::mem::replace(&mut session.tx, TxState::None);
    let TxState::Queuing { queue, dirty } = tx else {
        return RespValue::error("ERR EXEC without MULTI");
    };
    let watches = std::mem::take(&mut session.watches);
    if dirty {
        return EngineError::ExecAbort.into();
    }

    for w in &watches {
        st.expire_if_needed(w.db, &w.key);
        if st.dbs[w.db].epoch() != w.epoch || st.dbs[w.db].version_of(&w.key) != w.version {
            return RespValue::null_array();
        }
    }

    let was_blocking = session.no_blocking;
    session.no_blocking = true;
    let mut results = Vec::with_capacity(queue.len());
    for argv in queue {
        let reply = match registry::resolve(&argv[0]) {
            Some(spec) => dispatch_sync(st, session, spec.id, &argv),
            None => RespValue::error(unknown_command_error(&argv)),
        };
        results.push(reply);
    }
    session.no_blocking = was_blocking;
    RespValue::Array(Some(results))
}

fn reset(st: &mut ServerState, session: &mut Session) -> RespValue {
    st.pubsub.drop_client(session.id);
    session.reset();
    st.sync_client(session);
    RespValue::simple("RESET")
}

fn quit(session: &mut Session) -> RespValue {
    session.should_close = true;
    RespValue::ok()
}

fn shutdown(st: &mut ServerState, session: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let nosave = args.iter().any(|a| a.eq_ignore_ascii_case(b"NOSAVE"));
    if !nosave {
        let snapshot = st.take_snapshot();
        let sink = st.snapshotter.clone();
        if let Err(e) = sink.save(&snapshot) {
            return RespValue::error(format!("ERR Errors trying to SHUTDOWN. Check logs. {e}"));
        }
    }
    st.shutdown_requested = true;
    session.should_close = true;
    RespValue::Seq(Vec::new())
}

/// One command against the locked state. Everything here runs to completion
/// atomically relative to other connections.
pub fn dispatch_sync(
    st: &mut ServerState,
    s: &mut Session,
    id: CommandId,
    argv: &[Vec<u8>],
) -> RespValue {
    use CommandId::*;
    let args = &argv[1..];
    match id {
        // connection
        Ping => admin::ping(st, s, args),
        Echo => admin::echo(st, s, args),
        Select => admin::select(st, s, args),
        SwapDb => admin::swapdb(st, s, args),
        Auth => admin::auth(st, s, args),
        Hello => admin::hello(st, s, args),
        Quit => quit(s),
        Reset => reset(st, s),
        Client => admin::client(st, s, args),
        Command => admin::command_cmd(st, s, args),
        // server admin
        DbSize => admin::dbsize(st, s, args),
        FlushDb => admin::flushdb(st, s, args),
        FlushAll => admin::flushall(st, s, args),
        Info => admin::info(st, s, args),
        Time => admin::time(st, s, args),
        Config => admin::config(st, s, args),
        Debug => admin::debug(st, s, args),
        Save => admin::save(st, s, args),
        BgSave => admin::bgsave(st, s, args),
        LastSave => admin::lastsave(st, s, args),
        Wait => admin::wait(st, s, args),
        ReplicaOf => admin::replicaof(st, s, args),
        Shutdown => shutdown(st, s, args),
        Object => keyspace::object(st, s, args),
        // keyspace
        Del | Unlink => keyspace::del(st, s, args),
        Exists | Touch => keyspace::exists(st, s, args),
        Type => keyspace::type_cmd(st, s, args),
        Keys => keyspace::keys(st, s, args),
        Scan => keyspace::scan(st, s, args),
        RandomKey => keyspace::randomkey(st, s, args),
        Rename => keyspace::rename(st, s, args),
        RenameNx => keyspace::renamenx(st, s, args),
        Copy => keyspace::copy(st, s, args),
        Move => keyspace::move_cmd(st, s, args),
        Expire => keyspace::expire(st, s, args, 1000),
        PExpire => keyspace::expire(st, s, args, 1),
        ExpireAt => keyspace::expire_at(st, s, args, 1000),
        PExpireAt => keyspace::expire_at(st, s, args, 1),
        ExpireTime => keyspace::expiretime(st, s, args, false),
        PExpireTime => keyspace::expiretime(st, s, args, true),
        Ttl => keyspace::ttl(st, s, args, false),
        Pttl => keyspace::ttl(st, s, args, true),
        Persist => keyspace::persist(st, s, args),
        // strings
        Get => strings::get(st, s, args),
        Set => strings::set(st, s, args),
        SetNx => strings::setnx(st, s, args),
        SetEx => strings::setex(st, s, args),
        PSetEx => strings::psetex(st, s, args),
        GetSet => strings::getset(st, s, args),
        GetDel => strings::getdel(st, s, args),
        GetEx => strings::getex(st, s, args),
        Append => strings::append(st, s, args),
        Strlen => strings::strlen(st, s, args),
        Substr | GetRange => strings::getrange(st, s, args),
        SetRange => strings::setrange(st, s, args),
        Incr => strings::incr(st, s, args),
        Decr => strings::decr(st, s, args),
        IncrBy => strings::incrby(st, s, args),
        DecrBy => strings::decrby(st, s, args),
        IncrByFloat => strings::incrbyfloat(st, s, args),
        MGet => strings::mget(st, s, args),
        MSet => strings::mset(st, s, args),
        MSetNx => strings::msetnx(st, s, args),
        Lcs => strings::lcs(st, s, args),
        // bitmaps
        SetBit => bitmaps::setbit(st, s, args),
        GetBit => bitmaps::getbit(st, s, args),
        BitCount => bitmaps::bitcount(st, s, args),
        BitPos => bitmaps::bitpos(st, s, args),
        BitOp => bitmaps::bitop(st, s, args),
        BitField => bitmaps::bitfield(st, s, args, false),
        BitFieldRo => bitmaps::bitfield(st, s, args, true),
        // hyperloglog
        PfAdd => hyperloglog::pfadd(st, s, args),
        PfCount => hyperloglog::pfcount(st, s, args),
        PfMerge => hyperloglog::pfmerge(st, s, args),
        // lists
        LPush => lists::lpush(st, s, args),
        RPush => lists::rpush(st, s, args),
        LPushX => lists::lpushx(st, s, args),
        RPushX => lists::rpushx(st, s, args),
        LPop => lists::pop(st, s, args, true),
        RPop => lists::pop(st, s, args, false),
        LLen => lists::llen(st, s, args),
        LRange => lists::lrange(st, s, args),
        LIndex => lists::lindex(st, s, args),
        LSet => lists::lset(st, s, args),
        LTrim => lists::ltrim(st, s, args),
        LRem => lists::lrem(st, s, args),
        LInsert => lists::linsert(st, s, args),
        LPos => lists::lpos(st, s, args),
        RPopLPush => lists::rpoplpush(st, s, args),
        LMove => lists::lmove(st, s, args),
        BLPop => lists::bpop_now(st, s, args, true),
        BRPop => lists::bpop_now(st, s, args, false),
        BRPopLPush => lists::bmove_now(st, s, &args[0], &args[1], false, true, &args[2]),
        BLMove => match (side(&args[2]), side(&args[3])) {
            (Some(a), Some(b)) => lists::bmove_now(st, s, &args[0], &args[1], a, b, &args[4]),
            _ => EngineError::Syntax.into(),
        },
        // hashes
        HSet => hashes::hset(st, s, args),
        HSetNx => hashes::hsetnx(st, s, args),
        HMSet => hashes::hmset(st, s, args),
        HGet => hashes::hget(st, s, args),
        HMGet => hashes::hmget(st, s, args),
        HDel => hashes::hdel(st, s, args),
        HLen => hashes::hlen(st, s, args),
        HExists => hashes::hexists(st, s, args),
        HKeys => hashes::hkeys(st, s, args),
        HVals => hashes::hvals(st, s, args),
        HGetAll => hashes::hgetall(st, s, args),
        HStrlen => hashes::hstrlen(st, s, args),
        HIncrBy => hashes::hincrby(st, s, args),
        HIncrByFloat => hashes::hincrbyfloat(st, s, args),
        HRandField => hashes::hrandfield(st, s, args),
        HScan => hashes::hscan(st, s, args),
        // sets
        SAdd => sets::sadd(st, s, args),
        SRem => sets::srem(st, s, args),
        SMembers => sets::smembers(st, s, args),
        SIsMember => sets::sismember(st, s, args),
        SMIsMember => sets::smismember(st, s, args),
        SCard => sets::scard(st, s, args),
        SPop => sets::spop(st, s, args),
        SRandMember => sets::srandmember(st, s, args),
        SMove => sets::smove(st, s, args),
        SDiff => sets::sdiff(st, s, args),
        SDiffStore => sets::sdiffstore(st, s, args),
        SInter => sets::sinter(st, s, args),
        SInterStore => sets::sinterstore(st, s, args),
        SInterCard => sets::sintercard(st, s, args),
        SUnion => sets::sunion(st, s, args),
        SUnionStore => sets::sunionstore(st, s, args),
        SScan => sets::sscan(st, s, args),
        // sorted sets
        ZAdd => zsets::zadd(st, s, args),
        ZRem => zsets::zrem(st, s, args),
        ZScore => zsets::zscore(st, s, args),
        ZMScore => zsets::zmscore(st, s, args),
        ZCard => zsets::zcard(st, s, args),
        ZCount => zsets::zcount(st, s, args),
        ZIncrBy => zsets::zincrby(st, s, args),
        ZRank => zsets::zrank(st, s, args, false),
        ZRevRank => zsets::zrank(st, s, args, true),
        ZRange => zsets::zrange(st, s, args),
        ZRevRange => zsets::zrevrange(st, s, args),
        ZRangeByScore => zsets::zrangebyscore(st, s, args, false),
        ZRevRangeByScore => zsets::zrangebyscore(st, s, args, true),
        ZRangeByLex => zsets::zrangebylex(st, s, args, false),
        ZRevRangeByLex => zsets::zrangebylex(st, s, args, true),
        ZLexCount => zsets::zlexcount(st, s, args),
        ZRangeStore => zsets::zrangestore(st, s, args),
        ZPopMin => zsets::zpopmin(st, s, args),
        ZPopMax => zsets::zpopmax(st, s, args),
        BZPopMin => zsets::bzpop_now(st, s, args, true),
        BZPopMax => zsets::bzpop_now(st, s, args, false),
        ZRandMember => zsets::zrandmember(st, s, args),
        ZRemRangeByRank => zsets::zremrange(st, s, args, "rank"),
        ZRemRangeByScore => zsets::zremrange(st, s, args, "score"),
        ZRemRangeByLex => zsets::zremrange(st, s, args, "lex"),
        ZUnion => zsets::zunion(st, s, args),
        ZUnionStore => zsets::zunionstore(st, s, args),
        ZInter => zsets::zinter(st, s, args),
        ZInterStore => zsets::zinterstore(st, s, args),
        ZInterCard => zsets::zintercard(st, s, args),
        ZDiff => zsets::zdiff(st, s, args),
        ZDiffStore => zsets::zdiffstore(st, s, args),
        ZScan => zsets::zscan(st, s, args),
        // streams
        XAdd => streams::xadd(st, s, args),
        XLen => streams::xlen(st, s, args),
        XRange => streams::xrange(st, s, args, false),
        XRevRange => streams::xrange(st, s, args, true),
        XRead => streams::xread_now(st, s, args),
        XDel => streams::xdel(st, s, args),
        XTrim => streams::xtrim(st, s, args),
        XSetId => streams::xsetid(st, s, args),
        XGroup => streams::xgroup(st, s, args),
        XReadGroup => streams::xreadgroup_now(st, s, args),
        XAck => streams::xack(st, s, args),
        XPending => streams::xpending(st, s, args),
        XClaim => streams::xclaim(st, s, args),
        XAutoClaim => streams::xautoclaim(st, s, args),
        XInfo => streams::xinfo(st, s, args),
        // geo
        GeoAdd => geo::geoadd(st, s, args),
        GeoPos => geo::geopos(st, s, args),
        GeoDist => geo::geodist(st, s, args),
        GeoHash => geo::geohash(st, s, args),
        GeoSearch => geo::geosearch(st, s, args),
        GeoSearchStore => geo::geosearchstore(st, s, args),
        // pub/sub
        Subscribe => pubsub::subscribe(st, s, args),
        Unsubscribe => pubsub::unsubscribe(st, s, args),
        PSubscribe => pubsub::psubscribe(st, s, args),
        PUnsubscribe => pubsub::punsubscribe(st, s, args),
        Publish => pubsub::publish(st, s, args),
        PubSubCmd => pubsub::pubsub_introspect(st, s, args),
        // transactions
        Multi => multi(s),
        Exec => exec(st, s),
        Discard => discard(s),
        Watch => watch(st, s, args),
        Unwatch => unwatch(s),
        // scripting
        Eval => scripting::eval(st, s, args),
        EvalSha => scripting::evalsha(st, s, args),
        Script => scripting::script(st, s, args),
    }
}
