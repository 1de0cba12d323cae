//! Engine-level tests through the embedded connection API: command
//! semantics, numeric edge cases, expiry, transactions, notifications.

use std::sync::Arc;

use redsim::{Clock, ManualClock, PushEvent, RespValue, Server, ServerOptions};

fn bulk(s: &str) -> RespValue {
    RespValue::bulk(s.as_bytes().to_vec())
}

fn ints(values: &[i64]) -> RespValue {
    RespValue::Array(Some(values.iter().map(|&n| RespValue::Integer(n)).collect()))
}

fn bulks(values: &[&str]) -> RespValue {
    RespValue::Array(Some(values.iter().map(|s| bulk(s)).collect()))
}

fn server() -> Server {
    Server::new(ServerOptions::default())
}

fn server_with_clock(start_ms: u64) -> (Server, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let server = Server::new(ServerOptions {
        clock: Some(dyn_clock),
        ..ServerOptions::default()
    });
    (server, clock)
}

#[tokio::test]
async fn set_get_round_trip() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(conn.run(&["SET", "k", "v"]).await, RespValue::ok());
    assert_eq!(conn.run(&["GET", "k"]).await, bulk("v"));
    assert_eq!(conn.run(&["GET", "missing"]).await, RespValue::Bulk(None));
}

#[tokio::test]
async fn lpush_lrange_order() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["LPUSH", "k", "a", "b", "c"]).await,
        RespValue::Integer(3)
    );
    assert_eq!(
        conn.run(&["LRANGE", "k", "0", "-1"]).await,
        bulks(&["c", "b", "a"])
    );
}

#[tokio::test]
async fn zadd_gt_prevents_decrease() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["ZADD", "k", "1", "a", "2", "b"]).await;
    assert_eq!(
        conn.run(&["ZADD", "k", "XX", "GT", "0", "a"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(conn.run(&["ZSCORE", "k", "a"]).await, RespValue::Double(1.0));
    assert_eq!(
        conn.run(&["ZADD", "k", "XX", "GT", "5", "a"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(conn.run(&["ZSCORE", "k", "a"]).await, RespValue::Double(5.0));
}

#[tokio::test]
async fn sadd_is_idempotent() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(conn.run(&["SADD", "k", "x"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["SADD", "k", "x"]).await, RespValue::Integer(0));
    assert_eq!(conn.run(&["SCARD", "k"]).await, RespValue::Integer(1));
}

#[tokio::test]
async fn multi_exec_runs_queue_atomically() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(conn.run(&["MULTI"]).await, RespValue::ok());
    assert_eq!(conn.run(&["INCR", "x"]).await, RespValue::simple("QUEUED"));
    assert_eq!(conn.run(&["INCR", "x"]).await, RespValue::simple("QUEUED"));
    assert_eq!(conn.run(&["EXEC"]).await, ints(&[1, 2]));
    assert_eq!(conn.run(&["GET", "x"]).await, bulk("2"));
}

#[tokio::test]
async fn multi_error_semantics() {
    let server = server();
    let mut conn = server.connect();

    // Nested MULTI.
    conn.run(&["MULTI"]).await;
    assert_eq!(
        conn.run(&["MULTI"]).await,
        RespValue::error("ERR MULTI calls can not be nested")
    );
    // Unknown command marks the transaction dirty.
    assert!(conn.run(&["NOSUCH"]).await.is_error());
    let aborted = conn.run(&["EXEC"]).await;
    assert_eq!(
        aborted,
        RespValue::error("EXECABORT Transaction discarded because of previous errors.")
    );

    // Runtime errors stay in their slot; no rollback.
    conn.run(&["SET", "s", "text"]).await;
    conn.run(&["MULTI"]).await;
    conn.run(&["INCR", "counter"]).await;
    conn.run(&["INCR", "s"]).await;
    conn.run(&["INCR", "counter"]).await;
    let results = conn.run(&["EXEC"]).await;
    let RespValue::Array(Some(items)) = results else {
        panic!("expected array");
    };
    assert_eq!(items[0], RespValue::Integer(1));
    assert!(items[1].is_error());
    assert_eq!(items[2], RespValue::Integer(2));
    assert_eq!(conn.run(&["GET", "counter"]).await, bulk("2"));
}

#[tokio::test]
async fn discard_and_exec_without_multi() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["EXEC"]).await,
        RespValue::error("ERR EXEC without MULTI")
    );
    assert_eq!(
        conn.run(&["DISCARD"]).await,
        RespValue::error("ERR DISCARD without MULTI")
    );
    conn.run(&["MULTI"]).await;
    conn.run(&["SET", "k", "v"]).await;
    assert_eq!(conn.run(&["DISCARD"]).await, RespValue::ok());
    assert_eq!(conn.run(&["EXISTS", "k"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn watch_invalidation_across_connections() {
    let server = server();
    let mut a = server.connect();
    let mut b = server.connect();

    assert_eq!(a.run(&["WATCH", "x"]).await, RespValue::ok());
    assert_eq!(b.run(&["SET", "x", "1"]).await, RespValue::ok());
    a.run(&["MULTI"]).await;
    a.run(&["GET", "x"]).await;
    assert_eq!(a.run(&["EXEC"]).await, RespValue::Array(None));
    assert_eq!(a.run(&["GET", "x"]).await, bulk("1"));

    // A fresh WATCH with no interleaved write commits.
    a.run(&["WATCH", "x"]).await;
    a.run(&["MULTI"]).await;
    a.run(&["GET", "x"]).await;
    assert_eq!(
        a.run(&["EXEC"]).await,
        RespValue::Array(Some(vec![bulk("1")]))
    );
}

#[tokio::test]
async fn watch_sees_flushdb() {
    let server = server();
    let mut a = server.connect();
    let mut b = server.connect();
    a.run(&["SET", "x", "0"]).await;
    a.run(&["WATCH", "x"]).await;
    b.run(&["FLUSHDB"]).await;
    a.run(&["MULTI"]).await;
    a.run(&["GET", "x"]).await;
    assert_eq!(a.run(&["EXEC"]).await, RespValue::Array(None));
}

#[tokio::test]
async fn incr_overflow_leaves_value() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "9223372036854775807"]).await;
    assert_eq!(
        conn.run(&["INCR", "k"]).await,
        RespValue::error("ERR increment or decrement would overflow")
    );
    assert_eq!(conn.run(&["GET", "k"]).await, bulk("9223372036854775807"));
    assert_eq!(
        conn.run(&["INCR", "notanumber"]).await,
        RespValue::Integer(1)
    );
    conn.run(&["SET", "s", "abc"]).await;
    assert_eq!(
        conn.run(&["INCR", "s"]).await,
        RespValue::error("ERR value is not an integer or out of range")
    );
}

#[tokio::test]
async fn hset_arity_errors() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["HSET", "k"]).await,
        RespValue::error("ERR wrong number of arguments for 'hset' command")
    );
    assert_eq!(
        conn.run(&["HSET", "k", "f"]).await,
        RespValue::error("ERR wrong number of arguments for 'hset' command")
    );
}

#[tokio::test]
async fn expire_edge_cases() {
    let (server, clock) = server_with_clock(1_000_000);
    let mut conn = server.connect();

    assert_eq!(conn.run(&["EXPIRE", "missing", "10"]).await, RespValue::Integer(0));

    conn.run(&["SET", "k", "v"]).await;
    // EXPIRE 0 deletes immediately.
    assert_eq!(conn.run(&["EXPIRE", "k", "0"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["EXISTS", "k"]).await, RespValue::Integer(0));

    conn.run(&["SET", "k", "v"]).await;
    assert_eq!(conn.run(&["EXPIRE", "k", "100"]).await, RespValue::Integer(1));
    let ttl = conn.run(&["TTL", "k"]).await;
    assert_eq!(ttl, RespValue::Integer(100));

    // NX/XX/GT/LT flags.
    assert_eq!(
        conn.run(&["EXPIRE", "k", "50", "NX"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        conn.run(&["EXPIRE", "k", "50", "GT"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        conn.run(&["EXPIRE", "k", "200", "GT"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        conn.run(&["EXPIRE", "k", "50", "LT"]).await,
        RespValue::Integer(1)
    );

    // Lazy expiry on the clock edge: absent exactly when now reaches the
    // deadline.
    clock.advance(49_999);
    assert_eq!(conn.run(&["EXISTS", "k"]).await, RespValue::Integer(1));
    clock.advance(1);
    assert_eq!(conn.run(&["EXISTS", "k"]).await, RespValue::Integer(0));
    assert_eq!(conn.run(&["TTL", "k"]).await, RespValue::Integer(-2));

    conn.run(&["SET", "p", "v"]).await;
    assert_eq!(conn.run(&["TTL", "p"]).await, RespValue::Integer(-1));
    conn.run(&["PEXPIRE", "p", "1500"]).await;
    assert_eq!(conn.run(&["PTTL", "p"]).await, RespValue::Integer(1500));
    assert_eq!(conn.run(&["PERSIST", "p"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["TTL", "p"]).await, RespValue::Integer(-1));
}

#[tokio::test]
async fn setrange_pads_with_nul() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["SETRANGE", "k", "5", "x"]).await,
        RespValue::Integer(6)
    );
    assert_eq!(
        conn.run(&["GET", "k"]).await,
        RespValue::bulk(b"\x00\x00\x00\x00\x00x".to_vec())
    );
}

#[tokio::test]
async fn zadd_rejects_nan_and_bad_combos() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["ZADD", "k", "nan", "m"]).await,
        RespValue::error("ERR value is not a valid float")
    );
    assert_eq!(
        conn.run(&["ZADD", "k", "NX", "XX", "1", "m"]).await,
        RespValue::error("ERR XX and NX options at the same time are not compatible")
    );
    assert_eq!(
        conn.run(&["ZADD", "k", "NX", "GT", "1", "m"]).await,
        RespValue::error("ERR GT, LT, and/or NX options at the same time are not compatible")
    );
    assert_eq!(
        conn.run(&["ZADD", "k", "INCR", "1", "a", "2", "b"]).await,
        RespValue::error("ERR INCR option supports a single increment-element pair")
    );
}

#[tokio::test]
async fn cross_type_errors() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "s"]).await;
    assert_eq!(
        conn.run(&["LPUSH", "k", "v"]).await,
        RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
    );
    assert_eq!(conn.run(&["GET", "k"]).await, bulk("s"));
    assert_eq!(conn.run(&["TYPE", "k"]).await, RespValue::simple("string"));

    conn.run(&["RPUSH", "l", "a"]).await;
    assert!(conn.run(&["GET", "l"]).await.is_error());
    assert_eq!(conn.run(&["TYPE", "l"]).await, RespValue::simple("list"));
}

#[tokio::test]
async fn empty_aggregates_are_deleted() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["RPUSH", "l", "a"]).await;
    assert_eq!(conn.run(&["LPOP", "l"]).await, bulk("a"));
    assert_eq!(conn.run(&["EXISTS", "l"]).await, RespValue::Integer(0));

    conn.run(&["HSET", "h", "f", "v"]).await;
    conn.run(&["HDEL", "h", "f"]).await;
    assert_eq!(conn.run(&["EXISTS", "h"]).await, RespValue::Integer(0));

    conn.run(&["SADD", "s", "m"]).await;
    conn.run(&["SREM", "s", "m"]).await;
    assert_eq!(conn.run(&["EXISTS", "s"]).await, RespValue::Integer(0));

    conn.run(&["ZADD", "z", "1", "m"]).await;
    conn.run(&["ZREM", "z", "m"]).await;
    assert_eq!(conn.run(&["EXISTS", "z"]).await, RespValue::Integer(0));

    // Streams persist when emptied.
    let id = conn.run(&["XADD", "st", "*", "f", "v"]).await;
    let RespValue::Bulk(Some(id)) = id else {
        panic!("expected id");
    };
    let id = String::from_utf8(id).unwrap();
    conn.run(&["XDEL", "st", &id]).await;
    assert_eq!(conn.run(&["EXISTS", "st"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["XLEN", "st"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn stream_consumer_group_flow() {
    let server = server();
    let mut conn = server.connect();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let RespValue::Bulk(Some(id)) = conn.run(&["XADD", "s", "*", "f", "v"]).await else {
            panic!("expected id");
        };
        ids.push(String::from_utf8(id).unwrap());
    }
    assert_eq!(conn.run(&["XLEN", "s"]).await, RespValue::Integer(3));
    assert_eq!(
        conn.run(&["XGROUP", "CREATE", "s", "g", "0"]).await,
        RespValue::ok()
    );
    assert_eq!(
        conn.run(&["XGROUP", "CREATE", "s", "g", "0"]).await,
        RespValue::error("BUSYGROUP Consumer Group name already exists")
    );

    let read = conn
        .run(&["XREADGROUP", "GROUP", "g", "c", "COUNT", "2", "STREAMS", "s", ">"])
        .await;
    let RespValue::Array(Some(streams)) = read else {
        panic!("expected stream data, got {read:?}");
    };
    let RespValue::Array(Some(pair)) = &streams[0] else {
        panic!("expected [key, entries]");
    };
    assert_eq!(pair[0], bulk("s"));
    let RespValue::Array(Some(entries)) = &pair[1] else {
        panic!("expected entries");
    };
    assert_eq!(entries.len(), 2);

    // PEL now holds two entries; ack one.
    let pending = conn.run(&["XPENDING", "s", "g"]).await;
    let RespValue::Array(Some(summary)) = pending else {
        panic!("expected summary");
    };
    assert_eq!(summary[0], RespValue::Integer(2));

    assert_eq!(
        conn.run(&["XACK", "s", "g", &ids[0]]).await,
        RespValue::Integer(1)
    );
    let RespValue::Array(Some(summary)) = conn.run(&["XPENDING", "s", "g"]).await else {
        panic!("expected summary");
    };
    assert_eq!(summary[0], RespValue::Integer(1));

    // Unknown group errors with the canonical message.
    assert_eq!(
        conn.run(&["XREADGROUP", "GROUP", "nope", "c", "STREAMS", "s", ">"])
            .await,
        RespValue::error("NOGROUP No such consumer group 'nope' for key name 's'")
    );
}

#[tokio::test]
async fn stream_ids_strictly_increase() {
    let (server, clock) = server_with_clock(100);
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["XADD", "s", "*", "f", "v"]).await,
        bulk("100-0")
    );
    assert_eq!(
        conn.run(&["XADD", "s", "*", "f", "v"]).await,
        bulk("100-1")
    );
    clock.advance(5);
    assert_eq!(
        conn.run(&["XADD", "s", "*", "f", "v"]).await,
        bulk("105-0")
    );
    assert_eq!(
        conn.run(&["XADD", "s", "100-9", "f", "v"]).await,
        RespValue::error(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item"
        )
    );
}

#[tokio::test]
async fn blocking_pop_is_served_by_writer() {
    let server = server();
    let mut a = server.connect();
    let mut b = server.connect();

    let waiter = tokio::spawn(async move {
        let reply = a.run(&["BLPOP", "q", "0"]).await;
        (a, reply)
    });
    // Give the waiter time to park.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(b.run(&["RPUSH", "q", "v"]).await, RespValue::Integer(1));

    let (mut a, reply) = waiter.await.unwrap();
    assert_eq!(reply, bulks(&["q", "v"]));
    assert_eq!(a.run(&["LLEN", "q"]).await, RespValue::Integer(0));
    assert_eq!(b.run(&["EXISTS", "q"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn blocking_pop_times_out_with_nil() {
    let server = server();
    let mut conn = server.connect();
    let started = std::time::Instant::now();
    assert_eq!(
        conn.run(&["BLPOP", "q", "0.05"]).await,
        RespValue::Array(None)
    );
    assert!(started.elapsed() >= std::time::Duration::from_millis(45));
    assert_eq!(
        conn.run(&["BLPOP", "q", "notafloat"]).await,
        RespValue::error("ERR timeout is not a float or out of range")
    );
    assert_eq!(
        conn.run(&["BLPOP", "q", "-1"]).await,
        RespValue::error("ERR timeout is negative")
    );
}

#[tokio::test]
async fn blocking_inside_multi_degrades() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["MULTI"]).await;
    conn.run(&["BLPOP", "q", "0"]).await;
    assert_eq!(
        conn.run(&["EXEC"]).await,
        RespValue::Array(Some(vec![RespValue::Array(None)]))
    );
}

#[tokio::test]
async fn bzpopmin_returns_triple() {
    let server = server();
    let mut a = server.connect();
    let mut b = server.connect();
    let waiter = tokio::spawn(async move { a.run(&["BZPOPMIN", "z", "0"]).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    b.run(&["ZADD", "z", "1.5", "m"]).await;
    assert_eq!(waiter.await.unwrap(), bulks(&["z", "m", "1.5"]));
}

#[tokio::test]
async fn pubsub_pattern_delivery() {
    let server = server();
    let mut a = server.connect();
    let mut b = server.connect();

    let frames = a.run(&["PSUBSCRIBE", "news.*"]).await;
    let RespValue::Seq(frames) = frames else {
        panic!("expected seq");
    };
    assert_eq!(frames.len(), 1);

    assert_eq!(
        b.run(&["PUBLISH", "news.sport", "hello"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        a.try_push(),
        Some(PushEvent::PMessage {
            pattern: b"news.*".to_vec(),
            channel: b"news.sport".to_vec(),
            payload: b"hello".to_vec(),
        })
    );

    assert_eq!(
        b.run(&["PUBLISH", "weather.sport", "nope"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(a.try_push(), None);

    assert_eq!(
        b.run(&["PUBSUB", "NUMPAT"]).await,
        RespValue::Integer(1)
    );
}

#[tokio::test]
async fn expired_keys_notify_subscribers() {
    let (server, clock) = server_with_clock(10_000);
    let mut listener = server.connect();
    let mut writer = server.connect();

    writer
        .run(&["CONFIG", "SET", "notify-keyspace-events", "Ex"])
        .await;
    listener.run(&["SUBSCRIBE", "__keyevent@0__:expired"]).await;

    writer.run(&["SET", "k", "v", "PX", "50"]).await;
    clock.advance(60);
    // Any read resolves the key, expires it, and fires the notification.
    assert_eq!(writer.run(&["GET", "k"]).await, RespValue::Bulk(None));

    assert_eq!(
        listener.try_push(),
        Some(PushEvent::Message {
            channel: b"__keyevent@0__:expired".to_vec(),
            payload: b"k".to_vec(),
        })
    );
}

#[tokio::test]
async fn select_and_databases_are_isolated() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "db0"]).await;
    assert_eq!(conn.run(&["SELECT", "1"]).await, RespValue::ok());
    assert_eq!(conn.run(&["GET", "k"]).await, RespValue::Bulk(None));
    conn.run(&["SET", "k", "db1"]).await;
    conn.run(&["SELECT", "0"]).await;
    assert_eq!(conn.run(&["GET", "k"]).await, bulk("db0"));
    assert_eq!(
        conn.run(&["SELECT", "99"]).await,
        RespValue::error("ERR DB index is out of range")
    );

    // MOVE and COPY across databases.
    conn.run(&["SET", "m", "v"]).await;
    assert_eq!(conn.run(&["MOVE", "m", "1"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["EXISTS", "m"]).await, RespValue::Integer(0));
    assert_eq!(
        conn.run(&["COPY", "k", "k2", "DB", "1"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        conn.run(&["COPY", "k", "k", "REPLACE"]).await,
        RespValue::error("ERR source and destination objects are the same")
    );
}

#[tokio::test]
async fn object_encoding_reports_representation() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "int", "123"]).await;
    conn.run(&["SET", "short", "hello"]).await;
    conn.run(&["RPUSH", "list", "a"]).await;
    conn.run(&["SADD", "iset", "1", "2"]).await;
    conn.run(&["SADD", "sset", "abc"]).await;
    conn.run(&["ZADD", "z", "1", "m"]).await;

    assert_eq!(conn.run(&["OBJECT", "ENCODING", "int"]).await, bulk("int"));
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "short"]).await,
        bulk("embstr")
    );
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "list"]).await,
        bulk("listpack")
    );
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "iset"]).await,
        bulk("intset")
    );
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "sset"]).await,
        bulk("listpack")
    );
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "z"]).await,
        bulk("listpack")
    );

    // Threshold crossing flips the encoding.
    conn.run(&["CONFIG", "SET", "zset-max-listpack-entries", "0"])
        .await;
    assert_eq!(
        conn.run(&["OBJECT", "ENCODING", "z"]).await,
        bulk("skiplist")
    );
}

#[tokio::test]
async fn getrange_and_friends() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "This is a string"]).await;
    assert_eq!(conn.run(&["GETRANGE", "k", "0", "3"]).await, bulk("This"));
    assert_eq!(conn.run(&["GETRANGE", "k", "-3", "-1"]).await, bulk("ing"));
    assert_eq!(conn.run(&["GETRANGE", "k", "10", "5"]).await, bulk(""));
    assert_eq!(conn.run(&["STRLEN", "k"]).await, RespValue::Integer(16));
    assert_eq!(
        conn.run(&["APPEND", "k", "!"]).await,
        RespValue::Integer(17)
    );
}

#[tokio::test]
async fn incrbyfloat_formatting() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "10.5"]).await;
    assert_eq!(conn.run(&["INCRBYFLOAT", "k", "0.1"]).await, bulk("10.6"));
    assert_eq!(conn.run(&["INCRBYFLOAT", "k", "-5.6"]).await, bulk("5"));
    assert_eq!(
        conn.run(&["INCRBYFLOAT", "k", "nan"]).await,
        RespValue::error("ERR value is not a valid float")
    );
}

#[tokio::test]
async fn getdel_getex_lifecycle() {
    let (server, clock) = server_with_clock(50_000);
    let mut conn = server.connect();
    conn.run(&["SET", "k", "v"]).await;
    assert_eq!(conn.run(&["GETDEL", "k"]).await, bulk("v"));
    assert_eq!(conn.run(&["EXISTS", "k"]).await, RespValue::Integer(0));

    conn.run(&["SET", "k", "v"]).await;
    assert_eq!(conn.run(&["GETEX", "k", "EX", "10"]).await, bulk("v"));
    assert_eq!(conn.run(&["TTL", "k"]).await, RespValue::Integer(10));
    assert_eq!(conn.run(&["GETEX", "k", "PERSIST"]).await, bulk("v"));
    assert_eq!(conn.run(&["TTL", "k"]).await, RespValue::Integer(-1));
    clock.advance(1);
}

#[tokio::test]
async fn zrange_grammars() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["ZADD", "z", "1", "a", "2", "b", "3", "c"]).await;

    assert_eq!(
        conn.run(&["ZRANGE", "z", "0", "-1"]).await,
        bulks(&["a", "b", "c"])
    );
    assert_eq!(
        conn.run(&["ZRANGE", "z", "0", "-1", "REV"]).await,
        bulks(&["c", "b", "a"])
    );
    assert_eq!(
        conn.run(&["ZRANGE", "z", "(1", "+inf", "BYSCORE"]).await,
        bulks(&["b", "c"])
    );
    assert_eq!(
        conn.run(&["ZRANGEBYSCORE", "z", "-inf", "2"]).await,
        bulks(&["a", "b"])
    );
    assert_eq!(
        conn.run(&["ZREVRANGEBYSCORE", "z", "3", "2"]).await,
        bulks(&["c", "b"])
    );
    assert_eq!(
        conn.run(&["ZRANGE", "z", "0", "-1", "WITHSCORES"]).await,
        bulks(&["a", "1", "b", "2", "c", "3"])
    );
    assert_eq!(
        conn.run(&["ZRANGEBYLEX", "z", "[a", "(c"]).await,
        bulks(&["a", "b"])
    );
    assert_eq!(
        conn.run(&["ZRANGEBYLEX", "z", "bad", "+"]).await,
        RespValue::error("ERR min or max not valid string range item")
    );
    assert_eq!(
        conn.run(&["ZRANGEBYSCORE", "z", "bad", "+inf"]).await,
        RespValue::error("ERR min or max is not a float")
    );
    assert_eq!(
        conn.run(&["ZRANGE", "z", "0", "-1", "LIMIT", "0", "1"]).await,
        RespValue::error(
            "ERR syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX"
        )
    );
    assert_eq!(
        conn.run(&["ZRANGESTORE", "dst", "z", "0", "1"]).await,
        RespValue::Integer(2)
    );
    assert_eq!(
        conn.run(&["ZRANGE", "dst", "0", "-1"]).await,
        bulks(&["a", "b"])
    );
}

#[tokio::test]
async fn zset_algebra() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["ZADD", "z1", "1", "a", "2", "b"]).await;
    conn.run(&["ZADD", "z2", "10", "b", "20", "c"]).await;
    conn.run(&["SADD", "plain", "a", "c"]).await;

    assert_eq!(
        conn.run(&["ZUNIONSTORE", "out", "2", "z1", "z2"]).await,
        RespValue::Integer(3)
    );
    assert_eq!(conn.run(&["ZSCORE", "out", "b"]).await, RespValue::Double(12.0));

    assert_eq!(
        conn.run(&["ZINTERSTORE", "out", "2", "z1", "z2", "AGGREGATE", "MAX"])
            .await,
        RespValue::Integer(1)
    );
    assert_eq!(conn.run(&["ZSCORE", "out", "b"]).await, RespValue::Double(10.0));

    // Sets join with score 1.
    assert_eq!(
        conn.run(&["ZUNIONSTORE", "out", "2", "z1", "plain", "WEIGHTS", "1", "3"])
            .await,
        RespValue::Integer(3)
    );
    assert_eq!(conn.run(&["ZSCORE", "out", "c"]).await, RespValue::Double(3.0));

    assert_eq!(
        conn.run(&["ZDIFF", "2", "z1", "z2"]).await,
        bulks(&["a"])
    );
    assert_eq!(
        conn.run(&["ZINTERCARD", "2", "z1", "z2"]).await,
        RespValue::Integer(1)
    );
}

#[tokio::test]
async fn list_pivots_and_moves() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["RPUSH", "l", "a", "b", "c", "b"]).await;

    assert_eq!(
        conn.run(&["LINSERT", "l", "BEFORE", "b", "x"]).await,
        RespValue::Integer(5)
    );
    assert_eq!(
        conn.run(&["LRANGE", "l", "0", "-1"]).await,
        bulks(&["a", "x", "b", "c", "b"])
    );
    assert_eq!(
        conn.run(&["LINSERT", "l", "BEFORE", "nope", "x"]).await,
        RespValue::Integer(-1)
    );
    assert_eq!(conn.run(&["LPOS", "l", "b"]).await, RespValue::Integer(2));
    assert_eq!(
        conn.run(&["LPOS", "l", "b", "RANK", "-1"]).await,
        RespValue::Integer(4)
    );
    assert_eq!(
        conn.run(&["LPOS", "l", "b", "COUNT", "0"]).await,
        ints(&[2, 4])
    );
    assert_eq!(conn.run(&["LREM", "l", "1", "b"]).await, RespValue::Integer(1));
    assert_eq!(
        conn.run(&["LMOVE", "l", "m", "LEFT", "RIGHT"]).await,
        bulk("a")
    );
    assert_eq!(conn.run(&["LRANGE", "m", "0", "-1"]).await, bulks(&["a"]));
    assert_eq!(conn.run(&["LSET", "m", "0", "z"]).await, RespValue::ok());
    assert_eq!(
        conn.run(&["LSET", "m", "9", "z"]).await,
        RespValue::error("ERR index out of range")
    );
    assert_eq!(
        conn.run(&["LSET", "missing", "0", "z"]).await,
        RespValue::error("ERR no such key")
    );
}

#[tokio::test]
async fn srandmember_and_spop_are_seeded() {
    let seed = 42;
    let run = |_tag: &str| async move {
        let server = Server::new(ServerOptions {
            seed,
            ..ServerOptions::default()
        });
        let mut conn = server.connect();
        conn.run(&["SADD", "s", "a", "b", "c", "d", "e"]).await;
        let one = conn.run(&["SRANDMEMBER", "s"]).await;
        let popped = conn.run(&["SPOP", "s", "2"]).await;
        (one, popped)
    };
    let first = run("a").await;
    let second = run("b").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn bitmap_commands() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["SETBIT", "b", "7", "1"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(conn.run(&["GETBIT", "b", "7"]).await, RespValue::Integer(1));
    assert_eq!(conn.run(&["GETBIT", "b", "6"]).await, RespValue::Integer(0));
    assert_eq!(conn.run(&["GET", "b"]).await, RespValue::bulk(b"\x01".to_vec()));

    conn.run(&["SET", "c", "foobar"]).await;
    assert_eq!(conn.run(&["BITCOUNT", "c"]).await, RespValue::Integer(26));
    assert_eq!(
        conn.run(&["BITCOUNT", "c", "1", "1"]).await,
        RespValue::Integer(6)
    );
    assert_eq!(
        conn.run(&["BITCOUNT", "c", "5", "30", "BIT"]).await,
        RespValue::Integer(17)
    );
    assert_eq!(conn.run(&["BITPOS", "c", "1"]).await, RespValue::Integer(1));

    conn.run(&["SET", "x", "abc"]).await;
    conn.run(&["SET", "y", "abd"]).await;
    assert_eq!(
        conn.run(&["BITOP", "XOR", "dest", "x", "y"]).await,
        RespValue::Integer(3)
    );
    assert_eq!(
        conn.run(&["GET", "dest"]).await,
        RespValue::bulk(b"\x00\x00\x07".to_vec())
    );

    assert_eq!(
        conn.run(&["BITFIELD", "bf", "SET", "u8", "0", "255", "INCRBY", "u8", "0", "10"])
            .await,
        ints(&[0, 9])
    );
    let overflow = conn
        .run(&["BITFIELD", "bf", "OVERFLOW", "FAIL", "INCRBY", "u8", "0", "250"])
        .await;
    assert_eq!(
        overflow,
        RespValue::Array(Some(vec![RespValue::Bulk(None)]))
    );
}

#[tokio::test]
async fn hyperloglog_estimates() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&["PFADD", "h", "a", "b", "c"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        conn.run(&["PFADD", "h", "a"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(conn.run(&["PFCOUNT", "h"]).await, RespValue::Integer(3));

    conn.run(&["PFADD", "h2", "c", "d"]).await;
    assert_eq!(conn.run(&["PFMERGE", "dst", "h", "h2"]).await, RespValue::ok());
    assert_eq!(conn.run(&["PFCOUNT", "dst"]).await, RespValue::Integer(4));

    conn.run(&["SET", "plain", "text"]).await;
    assert_eq!(
        conn.run(&["PFADD", "plain", "x"]).await,
        RespValue::error("WRONGTYPE Key is not a valid HyperLogLog string value.")
    );
}

#[tokio::test]
async fn geo_distance_and_search() {
    let server = server();
    let mut conn = server.connect();
    assert_eq!(
        conn.run(&[
            "GEOADD", "Sicily", "13.361389", "38.115556", "Palermo", "15.087269",
            "37.502669", "Catania",
        ])
        .await,
        RespValue::Integer(2)
    );
    let RespValue::Bulk(Some(dist)) = conn
        .run(&["GEODIST", "Sicily", "Palermo", "Catania", "km"])
        .await
    else {
        panic!("expected distance");
    };
    let km: f64 = String::from_utf8(dist).unwrap().parse().unwrap();
    assert!((km - 166.27).abs() < 1.0, "{km}");

    let hits = conn
        .run(&[
            "GEOSEARCH", "Sicily", "FROMLONLAT", "15", "37", "BYRADIUS", "200", "km", "ASC",
        ])
        .await;
    assert_eq!(hits, bulks(&["Catania", "Palermo"]));

    assert_eq!(
        conn.run(&["GEODIST", "Sicily", "Palermo", "nowhere"]).await,
        RespValue::Bulk(None)
    );
    assert_eq!(
        conn.run(&["GEOADD", "Sicily", "200", "100", "bad"]).await,
        RespValue::error("ERR invalid longitude,latitude pair 200.000000,100.000000")
    );
}

#[tokio::test]
async fn scan_walks_the_keyspace() {
    let server = server();
    let mut conn = server.connect();
    for i in 0..25 {
        conn.run(&["SET", &format!("key:{i:02}"), "v"]).await;
    }
    conn.run(&["RPUSH", "list:1", "a"]).await;

    let mut seen = Vec::new();
    let mut cursor = "0".to_string();
    loop {
        let reply = conn
            .run(&["SCAN", &cursor, "MATCH", "key:*", "COUNT", "10"])
            .await;
        let RespValue::Array(Some(parts)) = reply else {
            panic!("expected scan reply");
        };
        let RespValue::Bulk(Some(next)) = &parts[0] else {
            panic!("expected cursor");
        };
        let RespValue::Array(Some(page)) = &parts[1] else {
            panic!("expected page");
        };
        for item in page {
            let RespValue::Bulk(Some(k)) = item else {
                panic!("expected key");
            };
            seen.push(String::from_utf8(k.clone()).unwrap());
        }
        cursor = String::from_utf8(next.clone()).unwrap();
        if cursor == "0" {
            break;
        }
    }
    assert_eq!(seen.len(), 25);

    let reply = conn.run(&["SCAN", "0", "TYPE", "list", "COUNT", "100"]).await;
    let RespValue::Array(Some(parts)) = reply else {
        panic!("expected scan reply");
    };
    assert_eq!(parts[1], bulks(&["list:1"]));
}

#[tokio::test]
async fn rename_and_ttl_travel_together() {
    let (server, _clock) = server_with_clock(5_000);
    let mut conn = server.connect();
    conn.run(&["SET", "a", "v", "EX", "100"]).await;
    assert_eq!(conn.run(&["RENAME", "a", "b"]).await, RespValue::ok());
    assert_eq!(conn.run(&["TTL", "b"]).await, RespValue::Integer(100));
    assert_eq!(conn.run(&["EXISTS", "a"]).await, RespValue::Integer(0));
    assert_eq!(
        conn.run(&["RENAME", "missing", "x"]).await,
        RespValue::error("ERR no such key")
    );
    conn.run(&["SET", "c", "v"]).await;
    assert_eq!(conn.run(&["RENAMENX", "c", "b"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn script_registry_round_trip() {
    let server = server();
    let mut conn = server.connect();
    let reply = conn.run(&["SCRIPT", "LOAD", "return 1"]).await;
    assert_eq!(reply, bulk("e0e1f9fabfc9d4800c877a703b823ac0578ff8db"));
    assert_eq!(
        conn.run(&[
            "SCRIPT",
            "EXISTS",
            "e0e1f9fabfc9d4800c877a703b823ac0578ff8db",
            "0000000000000000000000000000000000000000",
        ])
        .await,
        ints(&[1, 0])
    );
    assert_eq!(
        conn.run(&["EVALSHA", "ffffffffffffffffffffffffffffffffffffffff", "0"])
            .await,
        RespValue::error("NOSCRIPT No matching script. Please use EVAL.")
    );
    assert_eq!(conn.run(&["SCRIPT", "FLUSH"]).await, RespValue::ok());
    assert_eq!(
        conn.run(&["SCRIPT", "EXISTS", "e0e1f9fabfc9d4800c877a703b823ac0578ff8db"])
            .await,
        ints(&[0])
    );
}

#[tokio::test]
async fn debug_reload_round_trips_state() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "s", "v"]).await;
    conn.run(&["RPUSH", "l", "a", "b"]).await;
    conn.run(&["ZADD", "z", "1.5", "m"]).await;
    conn.run(&["XADD", "st", "5-1", "f", "v"]).await;
    conn.run(&["XGROUP", "CREATE", "st", "g", "0"]).await;

    assert_eq!(conn.run(&["DEBUG", "RELOAD"]).await, RespValue::ok());

    assert_eq!(conn.run(&["GET", "s"]).await, bulk("v"));
    assert_eq!(conn.run(&["LRANGE", "l", "0", "-1"]).await, bulks(&["a", "b"]));
    assert_eq!(conn.run(&["ZSCORE", "z", "m"]).await, RespValue::Double(1.5));
    assert_eq!(conn.run(&["XLEN", "st"]).await, RespValue::Integer(1));
    // Consumer groups survive the round trip.
    assert_eq!(
        conn.run(&["XGROUP", "CREATE", "st", "g", "0"]).await,
        RespValue::error("BUSYGROUP Consumer Group name already exists")
    );
}

#[tokio::test]
async fn save_and_lastsave() {
    let (server, clock) = server_with_clock(77_000);
    let mut conn = server.connect();
    conn.run(&["SET", "k", "v"]).await;
    clock.advance(3_000);
    assert_eq!(conn.run(&["SAVE"]).await, RespValue::ok());
    assert_eq!(conn.run(&["LASTSAVE"]).await, RespValue::Integer(80));
    assert_eq!(
        conn.run(&["BGSAVE"]).await,
        RespValue::simple("Background saving started")
    );
}

#[tokio::test]
async fn lcs_reference_behavior() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["MSET", "key1", "ohmytext", "key2", "mynewtext"])
        .await;
    assert_eq!(conn.run(&["LCS", "key1", "key2"]).await, bulk("mytext"));
    assert_eq!(
        conn.run(&["LCS", "key1", "key2", "LEN"]).await,
        RespValue::Integer(6)
    );
    assert_eq!(
        conn.run(&["LCS", "key1", "key2", "LEN", "IDX"]).await,
        RespValue::error("ERR If you want both the length and indexes, please just use IDX.")
    );
}

#[tokio::test]
async fn type_gates_and_unknown_commands() {
    let server = server();
    let mut conn = server.connect();
    let reply = conn.run(&["FROBNICATE", "a", "b"]).await;
    let RespValue::Error(msg) = reply else {
        panic!("expected error");
    };
    assert!(msg.starts_with("ERR unknown command 'FROBNICATE'"), "{msg}");
    assert!(msg.contains("'a'"), "{msg}");

    assert_eq!(
        conn.run(&["GET"]).await,
        RespValue::error("ERR wrong number of arguments for 'get' command")
    );
    assert_eq!(
        conn.run(&["GET", "a", "b"]).await,
        RespValue::error("ERR wrong number of arguments for 'get' command")
    );
}

#[tokio::test]
async fn hash_random_and_scan() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["HSET", "h", "f1", "v1", "f2", "v2", "f3", "v3"])
        .await;
    assert_eq!(conn.run(&["HLEN", "h"]).await, RespValue::Integer(3));
    // Negative count samples with repetition.
    match conn.run(&["HRANDFIELD", "h", "-6"]).await {
        RespValue::Array(Some(items)) => assert_eq!(items.len(), 6),
        other => panic!("expected array, got {other:?}"),
    }
    // Positive count is capped at the field count.
    match conn.run(&["HRANDFIELD", "h", "9"]).await {
        RespValue::Array(Some(items)) => assert_eq!(items.len(), 3),
        other => panic!("expected array, got {other:?}"),
    }
    let reply = conn.run(&["HSCAN", "h", "0", "COUNT", "100"]).await;
    let RespValue::Array(Some(parts)) = reply else {
        panic!("expected hscan reply");
    };
    let RespValue::Array(Some(flat)) = &parts[1] else {
        panic!("expected pairs");
    };
    assert_eq!(flat.len(), 6);
}

#[tokio::test]
async fn swapdb_moves_whole_databases() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SET", "k", "zero"]).await;
    conn.run(&["SELECT", "1"]).await;
    conn.run(&["SET", "k", "one"]).await;
    conn.run(&["SELECT", "0"]).await;
    assert_eq!(conn.run(&["SWAPDB", "0", "1"]).await, RespValue::ok());
    assert_eq!(conn.run(&["GET", "k"]).await, bulk("one"));
}

#[tokio::test]
async fn reset_clears_connection_state() {
    let server = server();
    let mut conn = server.connect();
    conn.run(&["SELECT", "2"]).await;
    conn.run(&["MULTI"]).await;
    conn.run(&["SET", "k", "v"]).await;
    assert_eq!(conn.run(&["RESET"]).await, RespValue::simple("RESET"));
    // Back on db 0, transaction gone.
    assert_eq!(
        conn.run(&["EXEC"]).await,
        RespValue::error("ERR EXEC without MULTI")
    );
    conn.run(&["SET", "db0key", "v"]).await;
    assert_eq!(conn.run(&["EXISTS", "db0key"]).await, RespValue::Integer(1));
}
