//! Server assembly: the shared state handle, the embedded connection API,
//! and the TCP front end. Multiple independent `Server` instances can
//! coexist in one process; nothing here is global.

pub mod blocking;
pub mod commands;
pub mod dispatch;
pub mod pubsub;
pub mod registry;
pub mod session;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::resp::{ReadError, RequestReader, RespValue};
use crate::script::{NullScriptEngine, ScriptEngine};
use crate::snapshot::{MemorySnapshotter, Snapshotter};
use pubsub::PushEvent;
use session::Session;
use state::ServerState;

pub struct ServerOptions {
    pub databases: usize,
    pub password: Option<String>,
    pub seed: u64,
    pub clock: Option<Arc<dyn Clock>>,
    pub script_engine: Option<Arc<dyn ScriptEngine>>,
    pub snapshotter: Option<Arc<dyn Snapshotter>>,
    /// Restore from the snapshotter at startup when it has data.
    pub load_snapshot: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            databases: 16,
            password: None,
            seed: 0xdead_beef,
            clock: None,
            script_engine: None,
            snapshotter: None,
            load_snapshot: false,
        }
    }
}

/// Everything a connection task needs: the single execution lock plus the
/// lock-free collaborators.
pub struct Shared {
    state: Mutex<ServerState>,
    pub clock: Arc<dyn Clock>,
    shutdown: Notify,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Lock and take the single authoritative clock reading for the command
    /// about to run.
    pub fn lock_refreshed(&self) -> MutexGuard<'_, ServerState> {
        let mut guard = self.state.lock().unwrap();
        guard.refresh_now();
        guard
    }

    pub fn shutdown_check(&self) {
        if self.lock().shutdown_requested {
            self.shutdown.notify_waiters();
        }
    }
}

pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let clock: Arc<dyn Clock> = options.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let engine: Arc<dyn ScriptEngine> = options
            .script_engine
            .unwrap_or_else(|| Arc::new(NullScriptEngine));
        let snapshotter: Arc<dyn Snapshotter> = options
            .snapshotter
            .unwrap_or_else(|| Arc::new(MemorySnapshotter::default()));
        let mut state = ServerState::new(
            options.databases.max(1),
            clock.clone(),
            engine,
            snapshotter.clone(),
            options.seed,
            options.password,
        );
        if options.load_snapshot {
            match snapshotter.load() {
                Ok(Some(snapshot)) => {
                    state.install_snapshot(&snapshot);
                    tracing::info!("restored snapshot at startup");
                }
                Ok(None) => {}
                Err(e) => tracing::error!("snapshot load failed: {e}"),
            }
        }
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                clock,
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Open an in-process connection: same dispatcher, no sockets.
    pub fn connect(&self) -> Connection {
        let mut st = self.shared.lock_refreshed();
        st.next_client_id += 1;
        let id = st.next_client_id;
        let authenticated = st
            .config_get("requirepass")
            .map_or(true, String::is_empty);
        let mut session = Session::new(id, format!("embedded:{id}"), authenticated);
        st.register_client(&session);
        let push_rx = session.take_push_rx().expect("fresh session");
        drop(st);
        Connection {
            shared: Arc::clone(&self.shared),
            session,
            push_rx,
        }
    }

    /// Bind and serve until SHUTDOWN.
    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("redsim listening on {}", listener.local_addr()?);
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&self.shared)));
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    tracing::debug!("connection from {peer}");
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(shared, socket, peer.to_string()).await {
                            tracing::debug!("connection ended: {e}");
                        }
                    });
                }
                _ = self.shared.shutdown.notified() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
        sweeper.abort();
        Ok(())
    }
}

/// An embedded client connection. Dropping it cleans up subscriptions,
/// watches and blocked waits exactly like a socket disconnect.
pub struct Connection {
    shared: Arc<Shared>,
    session: Session,
    push_rx: tokio::sync::mpsc::UnboundedReceiver<PushEvent>,
}

impl Connection {
    pub async fn execute(&mut self, argv: &[&[u8]]) -> Option<RespValue> {
        let argv: Vec<Vec<u8>> = argv.iter().map(|a| a.to_vec()).collect();
        dispatch::execute(&self.shared, &mut self.session, argv).await
    }

    /// Convenience for tests and embedders: string arguments, reply frame
    /// expected.
    pub async fn run(&mut self, argv: &[&str]) -> RespValue {
        let argv: Vec<Vec<u8>> = argv.iter().map(|a| a.as_bytes().to_vec()).collect();
        dispatch::execute(&self.shared, &mut self.session, argv)
            .await
            .unwrap_or(RespValue::Seq(Vec::new()))
    }

    /// Pop one pending push frame (pub/sub message), if any.
    pub fn try_push(&mut self) -> Option<PushEvent> {
        self.push_rx.try_recv().ok()
    }

    /// Await the next push frame.
    pub async fn next_push(&mut self) -> Option<PushEvent> {
        self.push_rx.recv().await
    }

    pub fn id(&self) -> u64 {
        self.session.id
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Ok(mut st) = self.shared.state.lock() {
            st.remove_client(self.session.id);
        }
    }
}

fn push_frame(event: PushEvent) -> Option<RespValue> {
    match event {
        PushEvent::Message { channel, payload } => Some(RespValue::Push(vec![
            RespValue::bulk(b"message".to_vec()),
            RespValue::bulk(channel),
            RespValue::bulk(payload),
        ])),
        PushEvent::PMessage {
            pattern,
            channel,
            payload,
        } => Some(RespValue::Push(vec![
            RespValue::bulk(b"pmessage".to_vec()),
            RespValue::bulk(pattern),
            RespValue::bulk(channel),
            RespValue::bulk(payload),
        ])),
        PushEvent::Kill => None,
    }
}

async fn handle_connection(
    shared: Arc<Shared>,
    socket: TcpStream,
    peer: String,
) -> Result<(), ReadError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = RequestReader::new(read_half);

    let mut session = {
        let mut st = shared.lock_refreshed();
        st.next_client_id += 1;
        let id = st.next_client_id;
        let authenticated = st
            .config_get("requirepass")
            .map_or(true, String::is_empty);
        let session = Session::new(id, peer, authenticated);
        st.register_client(&session);
        session
    };
    let mut push_rx = session.take_push_rx().expect("fresh session");

    let result = loop {
        tokio::select! {
            event = push_rx.recv() => {
                match event.and_then(push_frame) {
                    Some(frame) => {
                        let bytes = frame.encode(session.protocol);
                        if write_half.write_all(&bytes).await.is_err() {
                            break Ok(());
                        }
                    }
                    // Channel closed or CLIENT KILL.
                    None => break Ok(()),
                }
            }
            request = reader.next_request() => {
                match request {
                    Ok(Some(argv)) => {
                        if let Some(reply) =
                            dispatch::execute(&shared, &mut session, argv).await
                        {
                            let bytes = reply.encode(session.protocol);
                            if !bytes.is_empty()
                                && write_half.write_all(&bytes).await.is_err()
                            {
                                break Ok(());
                            }
                        }
                        if session.should_close {
                            break Ok(());
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(ReadError::Protocol(msg)) => {
                        let line = format!("-ERR Protocol error: {msg}\r\n");
                        let _ = write_half.write_all(line.as_bytes()).await;
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };

    shared.lock().remove_client(session.id);
    result
}

/// Opportunistic active-expiry sweep. Correctness never depends on it;
/// `DEBUG SET-ACTIVE-EXPIRE 0` turns it off.
async fn sweep_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        let mut st = shared.lock_refreshed();
        st.active_expire_cycle(20);
    }
}
