//! End-to-end tests over real TCP connections: wire protocol, pub/sub
//! fan-out, WATCH across clients, blocking pops, the active expiry sweep.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use redsim::ServerOptions;

mod common;
use common::{spawn_server, Reply, TestClient};

#[tokio::test]
async fn ping_echo_over_the_wire() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    assert_eq!(c.cmd(&["PING"]).await, Reply::Simple("PONG".into()));
    assert_eq!(c.cmd(&["PING", "hi"]).await, Reply::bulk("hi"));
    assert_eq!(c.cmd(&["ECHO", "hello"]).await, Reply::bulk("hello"));
}

#[tokio::test]
async fn set_get_and_binary_values() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    assert_eq!(c.cmd(&["SET", "k", "v"]).await, Reply::Simple("OK".into()));
    assert_eq!(c.cmd(&["GET", "k"]).await, Reply::bulk("v"));
    assert_eq!(c.cmd(&["GET", "missing"]).await, Reply::Bulk(None));
    assert_eq!(c.cmd(&["DEL", "k"]).await, Reply::Int(1));
}

#[tokio::test]
async fn inline_commands_are_accepted() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"PING\r\n").await.unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n");

    stream.write_all(b"SET inline works\r\n").await.unwrap();
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+OK\r\n");
}

#[tokio::test]
async fn protocol_errors_close_the_connection() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"*1\r\n%3\r\nfoo\r\n").await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("-ERR Protocol error"), "{text}");
    // read_to_end returning means the server closed the socket.
}

#[tokio::test]
async fn watch_invalidation_between_clients() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    a.cmd(&["SET", "x", "0"]).await;
    assert_eq!(a.cmd(&["WATCH", "x"]).await, Reply::Simple("OK".into()));
    assert_eq!(b.cmd(&["SET", "x", "1"]).await, Reply::Simple("OK".into()));

    assert_eq!(a.cmd(&["MULTI"]).await, Reply::Simple("OK".into()));
    assert_eq!(a.cmd(&["GET", "x"]).await, Reply::Simple("QUEUED".into()));
    assert_eq!(a.cmd(&["EXEC"]).await, Reply::Array(None));
    assert_eq!(a.cmd(&["GET", "x"]).await, Reply::bulk("1"));
}

#[tokio::test]
async fn watch_ignores_unrelated_writes() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    a.cmd(&["SET", "x", "0"]).await;
    a.cmd(&["WATCH", "x"]).await;
    b.cmd(&["SET", "unrelated", "1"]).await;
    a.cmd(&["MULTI"]).await;
    a.cmd(&["INCR", "x"]).await;
    assert_eq!(
        a.cmd(&["EXEC"]).await,
        Reply::Array(Some(vec![Reply::Int(1)]))
    );
}

#[tokio::test]
async fn unwatch_forgets_watches() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    a.cmd(&["WATCH", "x"]).await;
    assert_eq!(a.cmd(&["UNWATCH"]).await, Reply::Simple("OK".into()));
    b.cmd(&["SET", "x", "1"]).await;
    a.cmd(&["MULTI"]).await;
    a.cmd(&["GET", "x"]).await;
    assert_eq!(
        a.cmd(&["EXEC"]).await,
        Reply::Array(Some(vec![Reply::bulk("1")]))
    );
}

#[tokio::test]
async fn watch_inside_multi_is_rejected() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    c.cmd(&["MULTI"]).await;
    let reply = c.cmd(&["WATCH", "x"]).await;
    assert_eq!(
        reply,
        Reply::Error("ERR WATCH inside MULTI is not allowed".into())
    );
}

#[tokio::test]
async fn pubsub_fan_out_to_subscribers() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut subscriber = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    let confirm = subscriber.cmd(&["SUBSCRIBE", "news.sport"]).await;
    assert_eq!(
        confirm,
        Reply::Array(Some(vec![
            Reply::bulk("subscribe"),
            Reply::bulk("news.sport"),
            Reply::Int(1)
        ]))
    );

    assert_eq!(
        publisher.cmd(&["PUBLISH", "news.sport", "hello"]).await,
        Reply::Int(1)
    );
    let message = subscriber.read_reply().await;
    assert_eq!(
        message,
        Reply::Array(Some(vec![
            Reply::bulk("message"),
            Reply::bulk("news.sport"),
            Reply::bulk("hello")
        ]))
    );
}

#[tokio::test]
async fn pubsub_pattern_message_shape() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut subscriber = TestClient::connect(addr).await;
    let mut publisher = TestClient::connect(addr).await;

    subscriber.cmd(&["PSUBSCRIBE", "news.*"]).await;
    assert_eq!(
        publisher.cmd(&["PUBLISH", "news.sport", "hello"]).await,
        Reply::Int(1)
    );
    assert_eq!(
        subscriber.read_reply().await,
        Reply::Array(Some(vec![
            Reply::bulk("pmessage"),
            Reply::bulk("news.*"),
            Reply::bulk("news.sport"),
            Reply::bulk("hello")
        ]))
    );
}

#[tokio::test]
async fn subscribe_mode_restricts_commands_on_resp2() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    c.cmd(&["SUBSCRIBE", "ch"]).await;

    let reply = c.cmd(&["GET", "k"]).await;
    let Reply::Error(msg) = reply else {
        panic!("expected error");
    };
    assert!(msg.contains("only (P|S)SUBSCRIBE"), "{msg}");

    // PING stays available; its reply takes the subscribe-mode shape.
    assert_eq!(
        c.cmd(&["PING"]).await,
        Reply::Array(Some(vec![Reply::bulk("pong"), Reply::bulk("")]))
    );

    // Leaving subscribe mode restores the full surface.
    c.cmd(&["UNSUBSCRIBE"]).await;
    assert_eq!(c.cmd(&["SET", "k", "v"]).await, Reply::Simple("OK".into()));
}

#[tokio::test]
async fn blocking_pop_across_connections() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut blocked = TestClient::connect(addr).await;
    let mut pusher = TestClient::connect(addr).await;

    blocked.send(&["BLPOP", "q", "0"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pusher.cmd(&["RPUSH", "q", "v"]).await, Reply::Int(1));

    assert_eq!(
        blocked.read_reply().await,
        Reply::Array(Some(vec![Reply::bulk("q"), Reply::bulk("v")]))
    );
    assert_eq!(pusher.cmd(&["LLEN", "q"]).await, Reply::Int(0));
    assert_eq!(pusher.cmd(&["EXISTS", "q"]).await, Reply::Int(0));
}

#[tokio::test]
async fn blocked_clients_are_served_fifo() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut first = TestClient::connect(addr).await;
    let mut second = TestClient::connect(addr).await;
    let mut pusher = TestClient::connect(addr).await;

    first.send(&["BLPOP", "q", "0"]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    second.send(&["BLPOP", "q", "0"]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    pusher.cmd(&["RPUSH", "q", "a"]).await;
    assert_eq!(
        first.read_reply().await,
        Reply::Array(Some(vec![Reply::bulk("q"), Reply::bulk("a")]))
    );
    pusher.cmd(&["RPUSH", "q", "b"]).await;
    assert_eq!(
        second.read_reply().await,
        Reply::Array(Some(vec![Reply::bulk("q"), Reply::bulk("b")]))
    );
}

#[tokio::test]
async fn blocking_timeout_returns_nil() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    let started = std::time::Instant::now();
    assert_eq!(c.cmd(&["BLPOP", "q", "0.05"]).await, Reply::Array(None));
    assert!(started.elapsed() >= Duration::from_millis(45));
}

#[tokio::test]
async fn ttl_expiry_notification_end_to_end() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut listener = TestClient::connect(addr).await;
    let mut writer = TestClient::connect(addr).await;

    assert_eq!(
        writer
            .cmd(&["CONFIG", "SET", "notify-keyspace-events", "Ex"])
            .await,
        Reply::Simple("OK".into())
    );
    listener.cmd(&["SUBSCRIBE", "__keyevent@0__:expired"]).await;

    writer.cmd(&["SET", "k", "v", "PX", "50"]).await;
    // The sampling sweep reaps the key and publishes the event.
    let message = listener.read_reply().await;
    assert_eq!(
        message,
        Reply::Array(Some(vec![
            Reply::bulk("message"),
            Reply::bulk("__keyevent@0__:expired"),
            Reply::bulk("k")
        ]))
    );
    assert_eq!(writer.cmd(&["EXISTS", "k"]).await, Reply::Int(0));
}

#[tokio::test]
async fn auth_gate_over_the_wire() {
    let addr = spawn_server(ServerOptions {
        password: Some("sekrit".into()),
        ..ServerOptions::default()
    })
    .await;
    let mut c = TestClient::connect(addr).await;

    let denied = c.cmd(&["GET", "k"]).await;
    assert_eq!(
        denied,
        Reply::Error("NOAUTH Authentication required.".into())
    );
    assert_eq!(
        c.cmd(&["AUTH", "wrong"]).await,
        Reply::Error("WRONGPASS invalid username-password pair or user is disabled.".into())
    );
    assert_eq!(c.cmd(&["AUTH", "sekrit"]).await, Reply::Simple("OK".into()));
    assert_eq!(c.cmd(&["GET", "k"]).await, Reply::Bulk(None));
}

#[tokio::test]
async fn hello_negotiates_protocols() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;

    // HELLO with no version reports the handshake map (flattened on RESP2).
    let reply = c.cmd(&["HELLO"]).await;
    let Reply::Array(Some(items)) = reply else {
        panic!("expected array");
    };
    assert!(items.contains(&Reply::bulk("proto")));
    assert!(items.contains(&Reply::bulk("redis")));

    assert_eq!(
        c.cmd(&["HELLO", "9"]).await,
        Reply::Error("NOPROTO unsupported protocol version".into())
    );

    // After HELLO 3, nil GET arrives as the RESP3 null frame.
    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n").await.unwrap();
    let mut buf = vec![0u8; 4096];
    let _ = raw.read(&mut buf).await.unwrap();
    assert_eq!(buf[0], b'%', "HELLO 3 should reply with a map frame");
    raw.write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
        .await
        .unwrap();
    let n = raw.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"_\r\n");
}

#[tokio::test]
async fn client_commands_and_kill() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut a = TestClient::connect(addr).await;
    let mut b = TestClient::connect(addr).await;

    let Reply::Int(b_id) = b.cmd(&["CLIENT", "ID"]).await else {
        panic!("expected id");
    };
    assert_eq!(
        a.cmd(&["CLIENT", "SETNAME", "conn-a"]).await,
        Reply::Simple("OK".into())
    );
    assert_eq!(a.cmd(&["CLIENT", "GETNAME"]).await, Reply::bulk("conn-a"));

    let Reply::Bulk(Some(list)) = a.cmd(&["CLIENT", "LIST"]).await else {
        panic!("expected list");
    };
    let list = String::from_utf8_lossy(&list).into_owned();
    assert!(list.contains("name=conn-a"), "{list}");

    assert_eq!(
        a.cmd(&["CLIENT", "KILL", "ID", &b_id.to_string()]).await,
        Reply::Int(1)
    );
    // The killed connection closes at its next boundary.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut probe = TestClient::connect(addr).await;
    let Reply::Bulk(Some(list)) = probe.cmd(&["CLIENT", "LIST"]).await else {
        panic!("expected list");
    };
    let list = String::from_utf8_lossy(&list).into_owned();
    assert!(!list.contains(&format!("id={b_id} ")), "{list}");
}

#[tokio::test]
async fn quit_closes_cleanly() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"*1\r\n$4\r\nQUIT\r\n")
        .await
        .unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(&buf[..], b"+OK\r\n");
}

#[tokio::test]
async fn dbsize_and_flushdb() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    c.cmd(&["MSET", "a", "1", "b", "2", "c", "3"]).await;
    assert_eq!(c.cmd(&["DBSIZE"]).await, Reply::Int(3));
    assert_eq!(c.cmd(&["FLUSHDB"]).await, Reply::Simple("OK".into()));
    assert_eq!(c.cmd(&["DBSIZE"]).await, Reply::Int(0));
}

#[tokio::test]
async fn config_get_patterns() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    let reply = c.cmd(&["CONFIG", "GET", "maxmemory*"]).await;
    let Reply::Array(Some(items)) = reply else {
        panic!("expected flattened map");
    };
    assert!(items.contains(&Reply::bulk("maxmemory")));
    assert!(items.contains(&Reply::bulk("maxmemory-policy")));
    assert!(items.contains(&Reply::bulk("noeviction")));

    assert_eq!(
        c.cmd(&["CONFIG", "SET", "bogus-option", "1"]).await,
        Reply::Error(
            "ERR Unknown option or number of arguments for CONFIG SET - 'bogus-option'".into()
        )
    );
}

#[tokio::test]
async fn command_introspection() {
    let addr = spawn_server(ServerOptions::default()).await;
    let mut c = TestClient::connect(addr).await;
    let Reply::Int(count) = c.cmd(&["COMMAND", "COUNT"]).await else {
        panic!("expected count");
    };
    assert!(count > 150, "{count}");

    assert_eq!(
        c.cmd(&["COMMAND", "GETKEYS", "MSET", "a", "1", "b", "2"]).await,
        Reply::Array(Some(vec![Reply::bulk("a"), Reply::bulk("b")]))
    );
    assert_eq!(
        c.cmd(&["COMMAND", "GETKEYS", "PING"]).await,
        Reply::Error("ERR The command has no key arguments".into())
    );
}
