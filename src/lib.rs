//! redsim - in-process Redis-compatible server emulator
//!
//! A real RESP2/RESP3 command engine over an in-memory keyspace, usable
//! embedded in tests or as a standalone TCP server.
//!
//! # Example
//!
//! ```no_run
//! use redsim::{RespValue, Server, ServerOptions};
//!
//! # async fn demo() {
//! let server = Server::new(ServerOptions::default());
//! let mut conn = server.connect();
//!
//! assert_eq!(conn.run(&["SET", "key", "value"]).await, RespValue::ok());
//! assert_eq!(
//!     conn.run(&["GET", "key"]).await,
//!     RespValue::bulk(b"value".to_vec())
//! );
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod glob;
pub mod num;
pub mod resp;
pub mod script;
pub mod server;
pub mod snapshot;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, Result};
pub use resp::RespValue;
pub use script::{NullScriptEngine, ScriptContext, ScriptEngine};
pub use server::pubsub::PushEvent;
pub use server::{Connection, Server, ServerOptions, Shared};
pub use snapshot::{JsonSnapshotter, MemorySnapshotter, Snapshot, Snapshotter};
pub use store::{Value, ValueKind};
