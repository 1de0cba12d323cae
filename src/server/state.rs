//! The shared server state: databases, configuration, script registry,
//! pub/sub and blocking registries, the global version counter, the seedable
//! RNG. One mutex around this struct is the single-logical-writer model:
//! every command executes against `&mut ServerState`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::script::ScriptEngine;
use crate::server::blocking::{BlockingCoordinator, WaitKind};
use crate::server::pubsub::{self, classes, PubSub, PushSender};
use crate::server::session::Session;
use crate::snapshot::{self, Snapshot, Snapshotter};
use crate::store::stream::Stream;
use crate::store::zset::SortedSet;
use crate::store::{Database, Entry, Value, ValueKind};

/// Bookkeeping for CLIENT LIST / CLIENT KILL.
#[derive(Debug)]
pub struct ClientMeta {
    pub id: u64,
    pub addr: String,
    pub name: Vec<u8>,
    pub db: usize,
    pub created_ms: u64,
    pub last_cmd_ms: u64,
    pub resp: u8,
    pub sub_count: usize,
    pub psub_count: usize,
    pub in_multi: bool,
    pub push: PushSender,
}

impl ClientMeta {
    pub fn list_line(&self, now_ms: u64) -> String {
        format!(
            "id={} addr={} laddr={} fd=0 name={} age={} idle={} flags={} db={} sub={} psub={} ssub=0 multi={} resp={} cmd=client|list",
            self.id,
            self.addr,
            self.addr,
            String::from_utf8_lossy(&self.name),
            now_ms.saturating_sub(self.created_ms) / 1000,
            now_ms.saturating_sub(self.last_cmd_ms) / 1000,
            if self.in_multi { "x" } else { "N" },
            self.db,
            self.sub_count,
            self.psub_count,
            if self.in_multi { 1 } else { -1 },
            self.resp,
        )
    }
}

pub struct ServerState {
    pub dbs: Vec<Database>,
    pub config: HashMap<String, String>,
    pub scripts: HashMap<String, Vec<u8>>,
    pub pubsub: PubSub,
    pub blocking: BlockingCoordinator,
    pub clients: HashMap<u64, ClientMeta>,
    pub clock: Arc<dyn Clock>,
    pub engine: Arc<dyn ScriptEngine>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub rng: ChaCha8Rng,

    version_counter: u64,
    notify_mask: u32,
    pub now_ms: u64,
    pub start_ms: u64,
    pub next_client_id: u64,
    pub dirty: u64,
    pub last_save_ms: u64,
    pub active_expire: bool,
    pub shutdown_requested: bool,

    // INFO / CONFIG RESETSTAT counters.
    pub commands_processed: u64,
    pub connections_received: u64,
    pub expired_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

fn default_config(databases: usize, requirepass: &Option<String>) -> HashMap<String, String> {
    let mut c = HashMap::new();
    let defaults: &[(&str, &str)] = &[
        ("maxmemory", "0"),
        ("maxmemory-policy", "noeviction"),
        ("notify-keyspace-events", ""),
        ("save", "3600 1 300 100 60 10000"),
        ("appendonly", "no"),
        ("appendfsync", "everysec"),
        ("timeout", "0"),
        ("tcp-keepalive", "300"),
        ("maxclients", "10000"),
        ("proto-max-bulk-len", "536870912"),
        ("hash-max-listpack-entries", "128"),
        ("hash-max-listpack-value", "64"),
        ("list-max-listpack-size", "128"),
        ("set-max-intset-entries", "512"),
        ("set-max-listpack-entries", "128"),
        ("set-max-listpack-value", "64"),
        ("zset-max-listpack-entries", "128"),
        ("zset-max-listpack-value", "64"),
    ];
    for (k, v) in defaults {
        c.insert((*k).to_string(), (*v).to_string());
    }
    c.insert("databases".into(), databases.to_string());
    c.insert(
        "requirepass".into(),
        requirepass.clone().unwrap_or_default(),
    );
    c
}

const MAXMEMORY_POLICIES: &[&str] = &[
    "noeviction",
    "allkeys-lru",
    "allkeys-lfu",
    "allkeys-random",
    "volatile-lru",
    "volatile-lfu",
    "volatile-random",
    "volatile-ttl",
];

const INTEGER_CONFIG_KEYS: &[&str] = &[
    "maxmemory",
    "timeout",
    "tcp-keepalive",
    "maxclients",
    "proto-max-bulk-len",
    "hash-max-listpack-entries",
    "hash-max-listpack-value",
    "list-max-listpack-size",
    "set-max-intset-entries",
    "set-max-listpack-entries",
    "set-max-listpack-value",
    "zset-max-listpack-entries",
    "zset-max-listpack-value",
];

impl ServerState {
    pub fn new(
        databases: usize,
        clock: Arc<dyn Clock>,
        engine: Arc<dyn ScriptEngine>,
        snapshotter: Arc<dyn Snapshotter>,
        seed: u64,
        requirepass: Option<String>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            dbs: (0..databases).map(|_| Database::default()).collect(),
            config: default_config(databases, &requirepass),
            scripts: HashMap::new(),
            pubsub: PubSub::default(),
            blocking: BlockingCoordinator::default(),
            clients: HashMap::new(),
            clock,
            engine,
            snapshotter,
            rng: ChaCha8Rng::seed_from_u64(seed),
            version_counter: 0,
            notify_mask: 0,
            now_ms: now,
            start_ms: now,
            next_client_id: 0,
            dirty: 0,
            last_save_ms: now,
            active_expire: true,
            shutdown_requested: false,
            commands_processed: 0,
            connections_received: 0,
            expired_keys: 0,
            keyspace_hits: 0,
            keyspace_misses: 0,
        }
    }

    pub fn refresh_now(&mut self) {
        self.now_ms = self.clock.now_ms();
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    // --- versions & write bookkeeping -----------------------------------

    fn next_version(&mut self) -> u64 {
        self.version_counter += 1;
        self.version_counter
    }

    /// Record a successful write to `key`: stamp the version, count it
    /// dirty, and wake a blocked reader if the key is now consumable.
    pub fn mark_write(&mut self, db: usize, key: &[u8]) {
        let v = self.next_version();
        self.dbs[db].stamp_version(key, v);
        self.dirty += 1;
        self.signal_ready(db, key);
    }

    pub fn signal_ready(&mut self, db: usize, key: &[u8]) {
        let kind = match self.dbs[db].get(key).map(|e| e.value.kind()) {
            Some(ValueKind::List) => WaitKind::List,
            Some(ValueKind::ZSet) => WaitKind::ZSet,
            Some(ValueKind::Stream) => WaitKind::Stream,
            _ => return,
        };
        self.blocking.signal(db, key, kind);
    }

    // --- keyspace notifications -----------------------------------------

    pub fn notify_mask(&self) -> u32 {
        self.notify_mask
    }

    pub fn notify_event(&mut self, db: usize, class: u32, event: &str, key: &[u8]) {
        let mask = self.notify_mask;
        if mask & class == 0 {
            return;
        }
        if mask & classes::KEYSPACE != 0 {
            let mut channel = format!("__keyspace@{db}__:").into_bytes();
            channel.extend_from_slice(key);
            self.pubsub.publish(&channel, event.as_bytes());
        }
        if mask & classes::KEYEVENT != 0 {
            let channel = format!("__keyevent@{db}__:{event}").into_bytes();
            self.pubsub.publish(&channel, key);
        }
    }

    // --- lazy expiry choke point ----------------------------------------

    /// Drop the key if its TTL elapsed. Every key resolution funnels
    /// through here; handlers never re-check expiry themselves.
    pub fn expire_if_needed(&mut self, db: usize, key: &[u8]) -> bool {
        let expired = self.dbs[db]
            .get(key)
            .map_or(false, |e| e.is_expired(self.now_ms));
        if expired {
            self.dbs[db].remove(key);
            let v = self.next_version();
            self.dbs[db].stamp_version(key, v);
            self.expired_keys += 1;
            self.dirty += 1;
            self.notify_event(db, classes::EXPIRED, "expired", key);
        }
        expired
    }

    pub fn entry(&mut self, db: usize, key: &[u8]) -> Option<&Entry> {
        self.expire_if_needed(db, key);
        if self.dbs[db].contains(key) {
            self.keyspace_hits += 1;
        } else {
            self.keyspace_misses += 1;
            self.notify_event(db, classes::KEY_MISS, "keymiss", key);
        }
        self.dbs[db].get(key)
    }

    pub fn entry_mut(&mut self, db: usize, key: &[u8]) -> Option<&mut Entry> {
        self.expire_if_needed(db, key);
        self.dbs[db].get_mut(key)
    }

    pub fn exists(&mut self, db: usize, key: &[u8]) -> bool {
        self.expire_if_needed(db, key);
        self.dbs[db].contains(key)
    }

    pub fn kind_of(&mut self, db: usize, key: &[u8]) -> Option<ValueKind> {
        self.expire_if_needed(db, key);
        self.dbs[db].get(key).map(|e| e.value.kind())
    }

    /// WRONGTYPE check without touching the value.
    pub fn check_kind(&mut self, db: usize, key: &[u8], kind: ValueKind) -> Result<()> {
        match self.kind_of(db, key) {
            Some(k) if k != kind => Err(EngineError::WrongType),
            _ => Ok(()),
        }
    }

    /// -2 missing, -1 no expiry, otherwise remaining ms.
    pub fn pttl(&mut self, db: usize, key: &[u8]) -> i64 {
        self.expire_if_needed(db, key);
        match self.dbs[db].get(key) {
            None => -2,
            Some(e) => match e.expires_at {
                None => -1,
                Some(at) => i64::try_from(at.saturating_sub(self.now_ms)).unwrap_or(i64::MAX),
            },
        }
    }

    /// Remove an emptied aggregate, with the `del` notification the
    /// reference emits for implicit deletion. Streams persist when empty.
    pub fn drop_if_empty(&mut self, db: usize, key: &[u8]) {
        let empty = self.dbs[db]
            .get(key)
            .map_or(false, |e| e.value.is_empty_aggregate());
        if empty {
            self.dbs[db].remove(key);
            let v = self.next_version();
            self.dbs[db].stamp_version(key, v);
            self.notify_event(db, classes::GENERIC, "del", key);
        }
    }

    fn notify_new_key(&mut self, db: usize, key: &[u8]) {
        self.notify_event(db, classes::NEW, "new", key);
    }

    // --- typed accessors -------------------------------------------------

    pub fn str_value(&mut self, db: usize, key: &[u8]) -> Result<Option<&Vec<u8>>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::Str(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn str_value_mut(&mut self, db: usize, key: &[u8]) -> Result<Option<&mut Vec<u8>>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::Str(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn list(&mut self, db: usize, key: &[u8]) -> Result<Option<&VecDeque<Vec<u8>>>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::List(l) => Ok(Some(l)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn list_mut(&mut self, db: usize, key: &[u8]) -> Result<Option<&mut VecDeque<Vec<u8>>>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::List(l) => Ok(Some(l)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn hash(&mut self, db: usize, key: &[u8]) -> Result<Option<&HashMap<Vec<u8>, Vec<u8>>>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::Hash(h) => Ok(Some(h)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn hash_mut(
        &mut self,
        db: usize,
        key: &[u8],
    ) -> Result<Option<&mut HashMap<Vec<u8>, Vec<u8>>>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::Hash(h) => Ok(Some(h)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn set_ref(&mut self, db: usize, key: &[u8]) -> Result<Option<&HashSet<Vec<u8>>>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::Set(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn set_mut(&mut self, db: usize, key: &[u8]) -> Result<Option<&mut HashSet<Vec<u8>>>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::Set(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn zset(&mut self, db: usize, key: &[u8]) -> Result<Option<&SortedSet>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::ZSet(z) => Ok(Some(z)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn zset_mut(&mut self, db: usize, key: &[u8]) -> Result<Option<&mut SortedSet>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::ZSet(z) => Ok(Some(z)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn stream(&mut self, db: usize, key: &[u8]) -> Result<Option<&Stream>> {
        match self.entry(db, key) {
            Some(e) => match &e.value {
                Value::Stream(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn stream_mut(&mut self, db: usize, key: &[u8]) -> Result<Option<&mut Stream>> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get_mut(key) {
            Some(e) => match &mut e.value {
                Value::Stream(s) => Ok(Some(s)),
                _ => Err(EngineError::WrongType),
            },
            None => Ok(None),
        }
    }

    // --- create-on-write accessors ---------------------------------------

    pub fn list_or_create(&mut self, db: usize, key: &[u8]) -> Result<&mut VecDeque<Vec<u8>>> {
        self.aggregate_or_create(db, key, ValueKind::List)?;
        match &mut self.dbs[db].get_mut(key).expect("just created").value {
            Value::List(l) => Ok(l),
            _ => unreachable!("kind checked"),
        }
    }

    pub fn hash_or_create(
        &mut self,
        db: usize,
        key: &[u8],
    ) -> Result<&mut HashMap<Vec<u8>, Vec<u8>>> {
        self.aggregate_or_create(db, key, ValueKind::Hash)?;
        match &mut self.dbs[db].get_mut(key).expect("just created").value {
            Value::Hash(h) => Ok(h),
            _ => unreachable!("kind checked"),
        }
    }

    pub fn set_or_create(&mut self, db: usize, key: &[u8]) -> Result<&mut HashSet<Vec<u8>>> {
        self.aggregate_or_create(db, key, ValueKind::Set)?;
        match &mut self.dbs[db].get_mut(key).expect("just created").value {
            Value::Set(s) => Ok(s),
            _ => unreachable!("kind checked"),
        }
    }

    pub fn zset_or_create(&mut self, db: usize, key: &[u8]) -> Result<&mut SortedSet> {
        self.aggregate_or_create(db, key, ValueKind::ZSet)?;
        match &mut self.dbs[db].get_mut(key).expect("just created").value {
            Value::ZSet(z) => Ok(z),
            _ => unreachable!("kind checked"),
        }
    }

    pub fn stream_or_create(&mut self, db: usize, key: &[u8]) -> Result<&mut Stream> {
        self.aggregate_or_create(db, key, ValueKind::Stream)?;
        match &mut self.dbs[db].get_mut(key).expect("just created").value {
            Value::Stream(s) => Ok(s),
            _ => unreachable!("kind checked"),
        }
    }

    fn aggregate_or_create(&mut self, db: usize, key: &[u8], kind: ValueKind) -> Result<()> {
        self.expire_if_needed(db, key);
        match self.dbs[db].get(key) {
            Some(e) if e.value.kind() != kind => Err(EngineError::WrongType),
            Some(_) => Ok(()),
            None => {
                let value = match kind {
                    ValueKind::Str => Value::Str(Vec::new()),
                    ValueKind::List => Value::List(VecDeque::new()),
                    ValueKind::Hash => Value::Hash(HashMap::new()),
                    ValueKind::Set => Value::Set(HashSet::new()),
                    ValueKind::ZSet => Value::ZSet(SortedSet::new()),
                    ValueKind::Stream => Value::Stream(Stream::default()),
                };
                self.notify_new_key(db, key);
                self.dbs[db].insert(key.to_vec(), Entry::new(value));
                Ok(())
            }
        }
    }

    /// Install a string value, preserving the TTL when asked.
    pub fn write_string(&mut self, db: usize, key: &[u8], value: Vec<u8>, keep_ttl: bool) {
        self.expire_if_needed(db, key);
        let expires_at = if keep_ttl {
            self.dbs[db].get(key).and_then(|e| e.expires_at)
        } else {
            None
        };
        if !self.dbs[db].contains(key) {
            self.notify_new_key(db, key);
        }
        self.dbs[db]
            .insert(key.to_vec(), Entry::with_expiry(Value::Str(value), expires_at));
    }

    // --- config -----------------------------------------------------------

    pub fn config_get(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    pub fn config_int(&self, key: &str, default: i64) -> i64 {
        self.config
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.to_ascii_lowercase();
        if !self.config.contains_key(&key) || key == "databases" {
            return Err(EngineError::other(format!(
                "Unknown option or number of arguments for CONFIG SET - '{key}'"
            )));
        }
        match key.as_str() {
            "maxmemory-policy" => {
                if !MAXMEMORY_POLICIES.contains(&value) {
                    return Err(EngineError::other(
                        "CONFIG SET failed - argument must be a valid maxmemory policy",
                    ));
                }
            }
            "notify-keyspace-events" => match pubsub::parse_notify_flags(value) {
                Some(mask) => self.notify_mask = mask,
                None => {
                    return Err(EngineError::other(
                        "Invalid event class character. Some possible classes are: 'g$lshzxeKE'",
                    ));
                }
            },
            "appendonly" => {
                if value != "yes" && value != "no" {
                    return Err(EngineError::other(
                        "CONFIG SET failed - argument must be 'yes' or 'no'",
                    ));
                }
            }
            k if INTEGER_CONFIG_KEYS.contains(&k) => {
                if value.parse::<i64>().is_err() {
                    return Err(EngineError::other(
                        "CONFIG SET failed - argument couldn't be parsed into an integer",
                    ));
                }
            }
            _ => {}
        }
        self.config.insert(key, value.to_string());
        Ok(())
    }

    pub fn reset_stats(&mut self) {
        self.commands_processed = 0;
        self.connections_received = 0;
        self.expired_keys = 0;
        self.keyspace_hits = 0;
        self.keyspace_misses = 0;
    }

    // --- clients ----------------------------------------------------------

    pub fn register_client(&mut self, session: &Session) {
        self.next_client_id = self.next_client_id.max(session.id);
        self.connections_received += 1;
        self.clients.insert(
            session.id,
            ClientMeta {
                id: session.id,
                addr: session.addr.clone(),
                name: session.name.clone(),
                db: session.db,
                created_ms: self.now_ms,
                last_cmd_ms: self.now_ms,
                resp: session.protocol,
                sub_count: 0,
                psub_count: 0,
                in_multi: false,
                push: session.push_tx.clone(),
            },
        );
    }

    pub fn sync_client(&mut self, session: &Session) {
        let now = self.now_ms;
        if let Some(meta) = self.clients.get_mut(&session.id) {
            meta.name = session.name.clone();
            meta.db = session.db;
            meta.resp = session.protocol;
            meta.sub_count = session.channels.len();
            meta.psub_count = session.patterns.len();
            meta.in_multi = session.in_multi();
            meta.last_cmd_ms = now;
        }
    }

    pub fn remove_client(&mut self, id: u64) {
        self.clients.remove(&id);
        self.pubsub.drop_client(id);
        self.blocking.drop_client(id);
    }

    /// Cooperative kill: the connection task closes at its next boundary.
    pub fn kill_client(&mut self, id: u64) -> bool {
        match self.clients.get(&id) {
            Some(meta) => meta.push.send(pubsub::PushEvent::Kill).is_ok(),
            None => false,
        }
    }

    // --- expiry sweep -----------------------------------------------------

    /// Opportunistic sampling sweep: check up to `sample` volatile keys per
    /// database. Correctness never depends on this running.
    pub fn active_expire_cycle(&mut self, sample: usize) -> usize {
        if !self.active_expire {
            return 0;
        }
        let mut reaped = 0;
        for db in 0..self.dbs.len() {
            for key in self.dbs[db].volatile_keys(sample) {
                if self.expire_if_needed(db, &key) {
                    reaped += 1;
                }
            }
        }
        reaped
    }

    // --- snapshot ---------------------------------------------------------

    pub fn take_snapshot(&mut self) -> Snapshot {
        let snap = snapshot::capture(&self.dbs, self.now_ms);
        self.last_save_ms = self.now_ms;
        self.dirty = 0;
        snap
    }

    pub fn install_snapshot(&mut self, snap: &Snapshot) {
        snapshot::restore_into(&mut self.dbs, snap, self.now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::script::NullScriptEngine;
    use crate::snapshot::MemorySnapshotter;

    fn state_with_clock(clock: Arc<ManualClock>) -> ServerState {
        ServerState::new(
            2,
            clock,
            Arc::new(NullScriptEngine),
            Arc::new(MemorySnapshotter::default()),
            7,
            None,
        )
    }

    #[test]
    fn lazy_expiry_removes_and_stamps() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut st = state_with_clock(clock.clone());
        st.write_string(0, b"k", b"v".to_vec(), false);
        st.entry_mut(0, b"k").unwrap().expires_at = Some(1_500);
        let v_before = st.dbs[0].version_of(b"k");

        clock.advance(400);
        st.refresh_now();
        assert!(st.exists(0, b"k"));

        clock.advance(200);
        st.refresh_now();
        assert!(!st.exists(0, b"k"));
        assert!(st.dbs[0].version_of(b"k") > v_before);
        assert_eq!(st.expired_keys, 1);
    }

    #[test]
    fn wrong_type_is_one_predicate() {
        let clock = Arc::new(ManualClock::new(0));
        let mut st = state_with_clock(clock);
        st.write_string(0, b"k", b"v".to_vec(), false);
        assert!(matches!(st.list(0, b"k"), Err(EngineError::WrongType)));
        assert!(matches!(
            st.list_or_create(0, b"k"),
            Err(EngineError::WrongType)
        ));
        assert!(st.check_kind(0, b"k", ValueKind::Str).is_ok());
        assert!(st.check_kind(0, b"missing", ValueKind::List).is_ok());
    }

    #[test]
    fn drop_if_empty_removes_aggregates_but_not_streams() {
        let clock = Arc::new(ManualClock::new(0));
        let mut st = state_with_clock(clock);
        st.list_or_create(0, b"l").unwrap();
        st.drop_if_empty(0, b"l");
        assert!(!st.exists(0, b"l"));

        st.stream_or_create(0, b"s").unwrap();
        st.drop_if_empty(0, b"s");
        assert!(st.exists(0, b"s"));
    }

    #[test]
    fn config_set_validation() {
        let clock = Arc::new(ManualClock::new(0));
        let mut st = state_with_clock(clock);
        assert!(st.config_set("maxmemory-policy", "allkeys-lru").is_ok());
        assert!(st.config_set("maxmemory-policy", "bogus").is_err());
        assert!(st.config_set("notify-keyspace-events", "KEx").is_ok());
        assert_ne!(st.notify_mask() & classes::EXPIRED, 0);
        assert!(st.config_set("notify-keyspace-events", "Q").is_err());
        assert!(st.config_set("no-such-option", "1").is_err());
        assert!(st.config_set("databases", "32").is_err());
        assert!(st.config_set("hash-max-listpack-entries", "abc").is_err());
    }

    #[test]
    fn mark_write_bumps_versions_monotonically() {
        let clock = Arc::new(ManualClock::new(0));
        let mut st = state_with_clock(clock);
        st.write_string(0, b"a", b"1".to_vec(), false);
        st.mark_write(0, b"a");
        let v1 = st.dbs[0].version_of(b"a");
        st.write_string(1, b"a", b"2".to_vec(), false);
        st.mark_write(1, b"a");
        let v2 = st.dbs[1].version_of(b"a");
        assert!(v2 > v1);
    }
}
