//! Minimal RESP2 client used by the integration tests, so the suite runs
//! hermetically without an external redis-cli.

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Int(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn bulk(s: &str) -> Reply {
        Reply::Bulk(Some(s.as_bytes().to_vec()))
    }

    pub fn as_text(&self) -> String {
        match self {
            Reply::Simple(s) | Reply::Error(s) => s.clone(),
            Reply::Int(n) => n.to_string(),
            Reply::Bulk(Some(b)) => String::from_utf8_lossy(b).into_owned(),
            Reply::Bulk(None) => "(nil)".into(),
            Reply::Array(_) => format!("{self:?}"),
        }
    }
}

fn parse_reply(buf: &[u8]) -> Option<(Reply, usize)> {
    let nl = buf.iter().position(|&b| b == b'\n')?;
    if nl == 0 || buf[nl - 1] != b'\r' {
        return None;
    }
    let line = &buf[1..nl - 1];
    let consumed = nl + 1;
    match buf[0] {
        b'+' => Some((
            Reply::Simple(String::from_utf8_lossy(line).into_owned()),
            consumed,
        )),
        b'-' => Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            consumed,
        )),
        b':' => Some((
            Reply::Int(String::from_utf8_lossy(line).parse().ok()?),
            consumed,
        )),
        b'$' => {
            let len: i64 = String::from_utf8_lossy(line).parse().ok()?;
            if len < 0 {
                return Some((Reply::Bulk(None), consumed));
            }
            let len = len as usize;
            if buf.len() < consumed + len + 2 {
                return None;
            }
            Some((
                Reply::Bulk(Some(buf[consumed..consumed + len].to_vec())),
                consumed + len + 2,
            ))
        }
        b'*' => {
            let count: i64 = String::from_utf8_lossy(line).parse().ok()?;
            if count < 0 {
                return Some((Reply::Array(None), consumed));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut pos = consumed;
            for _ in 0..count {
                let (item, used) = parse_reply(&buf[pos..])?;
                items.push(item);
                pos += used;
            }
            Some((Reply::Array(Some(items)), pos))
        }
        _ => None,
    }
}

pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    pub async fn connect(addr: std::net::SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("connect");
        TestClient {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, args: &[&str]) {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&out).await.expect("write");
    }

    pub async fn read_reply(&mut self) -> Reply {
        loop {
            if let Some((reply, used)) = parse_reply(&self.buf) {
                self.buf.drain(..used);
                return reply;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "connection closed while awaiting reply");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn cmd(&mut self, args: &[&str]) -> Reply {
        self.send(args).await;
        self.read_reply().await
    }
}

/// Start a server on an ephemeral port and return its address.
pub async fn spawn_server(options: redsim::ServerOptions) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = redsim::Server::new(options);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}
