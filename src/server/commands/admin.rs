//! Connection and server administration commands.

use crate::error::EngineError;
use crate::glob::glob_match;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::server::registry;
use crate::server::session::{ReplyMode, Session};
use crate::server::state::ServerState;

use super::keyword;

pub const SERVER_VERSION: &str = "7.4.0";

pub fn ping(_st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() > 1 {
        return RespValue::error("ERR wrong number of arguments for 'ping' command");
    }
    // In RESP2 subscribe mode the reply arrives as a two-element array.
    if s.protocol == 2 && s.is_subscribed() {
        return RespValue::Push(vec![
            RespValue::bulk(b"pong".to_vec()),
            RespValue::bulk(args.first().cloned().unwrap_or_default()),
        ]);
    }
    match args.first() {
        Some(msg) => RespValue::bulk(msg.clone()),
        None => RespValue::pong(),
    }
}

pub fn echo(_st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    RespValue::bulk(args[0].clone())
}

pub fn select(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    match parse_i64(&args[0]) {
        Ok(n) if n >= 0 && (n as usize) < st.db_count() => {
            s.db = n as usize;
            RespValue::ok()
        }
        Ok(_) => EngineError::DbIndexOutOfRange.into(),
        Err(_) => EngineError::other("value is not an integer or out of range").into(),
    }
}

pub fn swapdb(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let parse = |raw: &[u8]| match parse_i64(raw) {
        Ok(n) if n >= 0 && (n as usize) < st.db_count() => Ok(n as usize),
        Ok(_) => Err(EngineError::other("DB index is out of range")),
        Err(e) => Err(e),
    };
    let (a, b) = match (parse(&args[0]), parse(&args[1])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return e.into(),
    };
    if a != b {
        let (lo, hi) = (a.min(b), a.max(b));
        let (left, right) = st.dbs.split_at_mut(hi);
        left[lo].swap_with(&mut right[0]);
    }
    RespValue::ok()
}

pub fn auth(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (user, pass) = match args.len() {
        1 => (b"default".as_slice(), &args[0]),
        2 => (args[0].as_slice(), &args[1]),
        _ => return RespValue::error("ERR wrong number of arguments for 'auth' command"),
    };
    let configured = st.config_get("requirepass").cloned().unwrap_or_default();
    if configured.is_empty() {
        return RespValue::error(
            "ERR Client sent AUTH, but no password is set. Did you mean AUTH <username> <password>?",
        );
    }
    if user != b"default" || pass.as_slice() != configured.as_bytes() {
        return EngineError::WrongPass.into();
    }
    s.authenticated = true;
    RespValue::ok()
}

pub fn hello(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut i = 0;
    if let Some(ver_raw) = args.first() {
        let ver = match parse_i64(ver_raw) {
            Ok(v) => v,
            Err(_) => {
                return RespValue::error(
                    "NOPROTO unsupported protocol version",
                );
            }
        };
        if ver != 2 && ver != 3 {
            return RespValue::error("NOPROTO unsupported protocol version");
        }
        i += 1;
        let mut authenticated_here = false;
        while i < args.len() {
            if keyword(&args[i], "AUTH") && i + 2 < args.len() {
                let reply = auth(st, s, &args[i + 1..i + 3]);
                if reply.is_error() {
                    return reply;
                }
                authenticated_here = true;
                i += 3;
            } else if keyword(&args[i], "SETNAME") && i + 1 < args.len() {
                s.name = args[i + 1].clone();
                i += 2;
            } else {
                return EngineError::Syntax.into();
            }
        }
        let requirepass = st.config_get("requirepass").cloned().unwrap_or_default();
        if !requirepass.is_empty() && !s.authenticated && !authenticated_here {
            return EngineError::NoAuth.into();
        }
        s.protocol = ver as u8;
    }

    RespValue::Map(vec![
        (
            RespValue::bulk(b"server".to_vec()),
            RespValue::bulk(b"redis".to_vec()),
        ),
        (
            RespValue::bulk(b"version".to_vec()),
            RespValue::bulk(SERVER_VERSION.as_bytes().to_vec()),
        ),
        (
            RespValue::bulk(b"proto".to_vec()),
            RespValue::Integer(i64::from(s.protocol)),
        ),
        (
            RespValue::bulk(b"id".to_vec()),
            RespValue::Integer(s.id as i64),
        ),
        (
            RespValue::bulk(b"mode".to_vec()),
            RespValue::bulk(b"standalone".to_vec()),
        ),
        (
            RespValue::bulk(b"role".to_vec()),
            RespValue::bulk(b"master".to_vec()),
        ),
        (
            RespValue::bulk(b"modules".to_vec()),
            RespValue::Array(Some(Vec::new())),
        ),
    ])
}

pub fn client(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"ID" => RespValue::Integer(s.id as i64),
        b"GETNAME" => RespValue::bulk(s.name.clone()),
        b"SETNAME" => {
            let Some(name) = args.get(1) else {
                return EngineError::Syntax.into();
            };
            if name
                .iter()
                .any(|&b| b == b' ' || b == b'\n' || b == b'\r')
            {
                return RespValue::error(
                    "ERR Client names cannot contain spaces, newlines or special characters.",
                );
            }
            s.name = name.clone();
            RespValue::ok()
        }
        b"SETINFO" => RespValue::ok(),
        b"LIST" => {
            let now = st.now_ms;
            let mut ids: Vec<u64> = st.clients.keys().copied().collect();
            ids.sort_unstable();
            let lines: Vec<String> = ids
                .iter()
                .filter_map(|id| st.clients.get(id))
                .map(|meta| meta.list_line(now))
                .collect();
            RespValue::bulk(lines.join("\n").into_bytes())
        }
        b"INFO" => {
            let now = st.now_ms;
            match st.clients.get(&s.id) {
                Some(meta) => RespValue::bulk(meta.list_line(now).into_bytes()),
                None => RespValue::null(),
            }
        }
        b"KILL" => {
            // New form: CLIENT KILL <filter> <value> ...; legacy: CLIENT KILL addr:port
            if args.len() == 2 {
                let addr = String::from_utf8_lossy(&args[1]).into_owned();
                let target = st
                    .clients
                    .values()
                    .find(|meta| meta.addr == addr)
                    .map(|meta| meta.id);
                return match target {
                    Some(id) => {
                        st.kill_client(id);
                        RespValue::ok()
                    }
                    None => RespValue::error("ERR No such client"),
                };
            }
            let mut killed = 0i64;
            let mut i = 1;
            while i < args.len() {
                if keyword(&args[i], "ID") && i + 1 < args.len() {
                    if let Ok(id) = parse_i64(&args[i + 1]) {
                        if st.kill_client(id as u64) {
                            killed += 1;
                        }
                    }
                    i += 2;
                } else if keyword(&args[i], "ADDR") && i + 1 < args.len() {
                    let addr = String::from_utf8_lossy(&args[i + 1]).into_owned();
                    let targets: Vec<u64> = st
                        .clients
                        .values()
                        .filter(|meta| meta.addr == addr)
                        .map(|meta| meta.id)
                        .collect();
                    for id in targets {
                        if st.kill_client(id) {
                            killed += 1;
                        }
                    }
                    i += 2;
                } else if keyword(&args[i], "LADDR") && i + 1 < args.len() {
                    i += 2;
                } else {
                    return EngineError::Syntax.into();
                }
            }
            RespValue::Integer(killed)
        }
        b"NO-EVICT" | b"NO-TOUCH" => match args.get(1) {
            Some(v) if keyword(v, "ON") || keyword(v, "OFF") => RespValue::ok(),
            _ => EngineError::Syntax.into(),
        },
        b"UNPAUSE" => RespValue::ok(),
        b"REPLY" => match args.get(1) {
            Some(v) if keyword(v, "ON") => {
                s.reply_mode = ReplyMode::On;
                RespValue::ok()
            }
            Some(v) if keyword(v, "OFF") => {
                s.reply_mode = ReplyMode::Off;
                RespValue::Seq(Vec::new())
            }
            Some(v) if keyword(v, "SKIP") => {
                s.reply_mode = ReplyMode::Skip;
                RespValue::Seq(Vec::new())
            }
            _ => EngineError::Syntax.into(),
        },
        _ => RespValue::error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try CLIENT HELP.",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

pub fn command_cmd(_st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.is_empty() {
        return RespValue::Array(Some(
            registry::COMMANDS
                .iter()
                .map(|spec| {
                    RespValue::array(vec![
                        RespValue::bulk(spec.name.as_bytes().to_vec()),
                        RespValue::Integer(i64::from(spec.arity)),
                        RespValue::Array(Some(Vec::new())),
                        RespValue::Integer(i64::from(spec.first_key)),
                        RespValue::Integer(i64::from(spec.last_key)),
                        RespValue::Integer(i64::from(spec.key_step)),
                    ])
                })
                .collect(),
        ));
    }
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"COUNT" => RespValue::Integer(registry::command_count() as i64),
        b"DOCS" => RespValue::Map(Vec::new()),
        b"GETKEYS" => {
            let target = &args[1..];
            if target.is_empty() {
                return RespValue::error("ERR Unknown subcommand or wrong number of arguments for 'GETKEYS'. Try COMMAND HELP.");
            }
            let Some(spec) = registry::resolve(&target[0]) else {
                return RespValue::error("ERR Invalid command specified");
            };
            if !spec.arity_ok(target.len()) {
                return RespValue::error("ERR Invalid number of arguments specified for command");
            }
            let keys = spec.extract_keys(target);
            if keys.is_empty() {
                return RespValue::error("ERR The command has no key arguments");
            }
            RespValue::Array(Some(
                keys.into_iter()
                    .map(|k| RespValue::bulk(k.to_vec()))
                    .collect(),
            ))
        }
        b"INFO" => RespValue::Array(Some(
            args[1..]
                .iter()
                .map(|name| match registry::resolve(name) {
                    Some(spec) => RespValue::array(vec![
                        RespValue::bulk(spec.name.as_bytes().to_vec()),
                        RespValue::Integer(i64::from(spec.arity)),
                        RespValue::Array(Some(Vec::new())),
                        RespValue::Integer(i64::from(spec.first_key)),
                        RespValue::Integer(i64::from(spec.last_key)),
                        RespValue::Integer(i64::from(spec.key_step)),
                    ]),
                    None => RespValue::null_array(),
                })
                .collect(),
        )),
        _ => RespValue::error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try COMMAND HELP.",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

pub fn dbsize(st: &mut ServerState, s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    let keys: Vec<Vec<u8>> = st.dbs[s.db].keys().cloned().collect();
    let mut live = 0i64;
    for key in keys {
        if st.exists(s.db, &key) {
            live += 1;
        }
    }
    RespValue::Integer(live)
}

pub fn flushdb(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if let Some(mode) = args.first() {
        if !keyword(mode, "ASYNC") && !keyword(mode, "SYNC") {
            return EngineError::Syntax.into();
        }
    }
    st.dbs[s.db].clear();
    st.dirty += 1;
    RespValue::ok()
}

pub fn flushall(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if let Some(mode) = args.first() {
        if !keyword(mode, "ASYNC") && !keyword(mode, "SYNC") {
            return EngineError::Syntax.into();
        }
    }
    for db in &mut st.dbs {
        db.clear();
    }
    st.dirty += 1;
    RespValue::ok()
}

pub fn time(st: &mut ServerState, _s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    let secs = st.now_ms / 1000;
    let micros = (st.now_ms % 1000) * 1000;
    RespValue::array(vec![
        RespValue::bulk(secs.to_string().into_bytes()),
        RespValue::bulk(micros.to_string().into_bytes()),
    ])
}

pub fn config(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"GET" => {
            if args.len() < 2 {
                return RespValue::error(
                    "ERR Unknown subcommand or wrong number of arguments for 'GET'. Try CONFIG HELP.",
                );
            }
            let mut names: Vec<&String> = st.config.keys().collect();
            names.sort();
            let mut pairs = Vec::new();
            for name in names {
                if args[1..]
                    .iter()
                    .any(|p| glob_match(&p.to_ascii_lowercase(), name.as_bytes()))
                {
                    let value = st.config.get(name).cloned().unwrap_or_default();
                    pairs.push((
                        RespValue::bulk(name.clone().into_bytes()),
                        RespValue::bulk(value.into_bytes()),
                    ));
                }
            }
            RespValue::Map(pairs)
        }
        b"SET" => {
            let tail = &args[1..];
            if tail.is_empty() || tail.len() % 2 != 0 {
                return RespValue::error(
                    "ERR Unknown subcommand or wrong number of arguments for 'SET'. Try CONFIG HELP.",
                );
            }
            for pair in tail.chunks(2) {
                let key = String::from_utf8_lossy(&pair[0]).into_owned();
                let value = String::from_utf8_lossy(&pair[1]).into_owned();
                if let Err(e) = st.config_set(&key, &value) {
                    return e.into();
                }
            }
            RespValue::ok()
        }
        b"RESETSTAT" => {
            st.reset_stats();
            RespValue::ok()
        }
        b"REWRITE" => RespValue::error("ERR The server is running without a config file"),
        _ => RespValue::error(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'. Try CONFIG HELP.",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

pub fn info(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let wanted = |section: &str| -> bool {
        args.is_empty()
            || args.iter().any(|a| {
                keyword(a, section) || keyword(a, "ALL") || keyword(a, "EVERYTHING") || keyword(a, "DEFAULT")
            })
    };
    let mut out = String::new();
    if wanted("server") {
        out.push_str("# Server\r\n");
        out.push_str(&format!("redis_version:{SERVER_VERSION}\r\n"));
        out.push_str("redis_mode:standalone\r\n");
        out.push_str("arch_bits:64\r\n");
        out.push_str(&format!(
            "uptime_in_seconds:{}\r\n",
            st.now_ms.saturating_sub(st.start_ms) / 1000
        ));
        out.push_str("\r\n");
    }
    if wanted("clients") {
        out.push_str("# Clients\r\n");
        out.push_str(&format!("connected_clients:{}\r\n", st.clients.len()));
        out.push_str("blocked_clients:0\r\n");
        out.push_str("\r\n");
    }
    if wanted("memory") {
        out.push_str("# Memory\r\n");
        out.push_str("used_memory:1000000\r\n");
        out.push_str("used_memory_human:1.00M\r\n");
        out.push_str(&format!(
            "maxmemory:{}\r\n",
            st.config_int("maxmemory", 0)
        ));
        out.push_str(&format!(
            "maxmemory_policy:{}\r\n",
            st.config_get("maxmemory-policy").cloned().unwrap_or_default()
        ));
        out.push_str("\r\n");
    }
    if wanted("persistence") {
        out.push_str("# Persistence\r\n");
        out.push_str("loading:0\r\n");
        out.push_str(&format!("rdb_changes_since_last_save:{}\r\n", st.dirty));
        out.push_str(&format!("rdb_last_save_time:{}\r\n", st.last_save_ms / 1000));
        out.push_str(&format!(
            "aof_enabled:{}\r\n",
            i32::from(st.config_get("appendonly").map(String::as_str) == Some("yes"))
        ));
        out.push_str("\r\n");
    }
    if wanted("stats") {
        out.push_str("# Stats\r\n");
        out.push_str(&format!(
            "total_connections_received:{}\r\n",
            st.connections_received
        ));
        out.push_str(&format!(
            "total_commands_processed:{}\r\n",
            st.commands_processed
        ));
        out.push_str(&format!("expired_keys:{}\r\n", st.expired_keys));
        out.push_str(&format!("keyspace_hits:{}\r\n", st.keyspace_hits));
        out.push_str(&format!("keyspace_misses:{}\r\n", st.keyspace_misses));
        out.push_str("\r\n");
    }
    if wanted("replication") {
        out.push_str("# Replication\r\n");
        out.push_str("role:master\r\n");
        out.push_str("connected_slaves:0\r\n");
        out.push_str("master_replid:0000000000000000000000000000000000000000\r\n");
        out.push_str("master_repl_offset:0\r\n");
        out.push_str("\r\n");
    }
    if wanted("cpu") {
        out.push_str("# CPU\r\n");
        out.push_str("used_cpu_sys:0.0\r\n");
        out.push_str("used_cpu_user:0.0\r\n");
        out.push_str("\r\n");
    }
    if wanted("keyspace") {
        out.push_str("# Keyspace\r\n");
        for (i, db) in st.dbs.iter().enumerate() {
            if !db.is_empty() {
                out.push_str(&format!("db{}:keys={},expires=0,avg_ttl=0\r\n", i, db.len()));
            }
        }
        out.push_str("\r\n");
    }
    RespValue::Verbatim(out)
}

pub fn save(st: &mut ServerState, _s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    let snapshot = st.take_snapshot();
    let sink = st.snapshotter.clone();
    match sink.save(&snapshot) {
        Ok(()) => RespValue::ok(),
        Err(e) => e.into(),
    }
}

pub fn bgsave(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if let Some(mode) = args.first() {
        if !keyword(mode, "SCHEDULE") {
            return EngineError::Syntax.into();
        }
    }
    match save(st, s, &[]) {
        RespValue::Simple(_) => RespValue::simple("Background saving started"),
        other => other,
    }
}

pub fn lastsave(st: &mut ServerState, _s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    RespValue::Integer((st.last_save_ms / 1000) as i64)
}

pub fn wait(_st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    // Single-master stub: no replicas to wait for.
    match (parse_i64(&args[0]), parse_i64(&args[1])) {
        (Ok(_), Ok(_)) => RespValue::Integer(0),
        _ => EngineError::NotInteger.into(),
    }
}

pub fn replicaof(_st: &mut ServerState, _s: &mut Session, _args: &[Vec<u8>]) -> RespValue {
    RespValue::ok()
}

pub fn debug(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"JMAP" | b"QUICKLIST-PACKED-THRESHOLD" | b"CHANGE-REPL-ID" => RespValue::ok(),
        b"SET-ACTIVE-EXPIRE" => match args.get(1).map(|v| parse_i64(v)) {
            Some(Ok(0)) => {
                st.active_expire = false;
                RespValue::ok()
            }
            Some(Ok(1)) => {
                st.active_expire = true;
                RespValue::ok()
            }
            _ => EngineError::Syntax.into(),
        },
        b"STRINGMATCH-LEN" => {
            if args.len() != 3 {
                return EngineError::Syntax.into();
            }
            RespValue::Integer(i64::from(glob_match(&args[1], &args[2])))
        }
        b"OBJECT" => {
            let Some(key) = args.get(1) else {
                return EngineError::Syntax.into();
            };
            let Some(entry) = st.entry(s.db, key) else {
                return EngineError::NoSuchKey.into();
            };
            let value = entry.value.clone();
            let encoding = super::keyspace::encoding_of(st, &value);
            RespValue::simple(format!(
                "Value at:0x0 refcount:1 encoding:{encoding} serializedlength:0 lru:0 lru_seconds_idle:0"
            ))
        }
        b"RELOAD" => {
            let snapshot = st.take_snapshot();
            st.install_snapshot(&snapshot);
            RespValue::ok()
        }
        b"SLEEP" => {
            // The async dispatcher intercepts DEBUG SLEEP; reaching here
            // means it was queued in a transaction, where it is a no-op.
            RespValue::ok()
        }
        _ => RespValue::error(format!(
            "ERR DEBUG subcommand not supported: '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}
