//! Persistence hook: an opaque snapshot of the whole server state.
//!
//! The wire format is tagged JSON: every value kind serializes under its own
//! tag with expiry timestamps preserved as absolute milliseconds. `SAVE`,
//! `BGSAVE`, `LASTSAVE` and `DEBUG RELOAD` run through the `Snapshotter`
//! seam; the default sink keeps the snapshot in memory, the JSON sink writes
//! a file that survives restarts.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::store::stream::{Consumer, ConsumerGroup, PendingEntry, Stream, StreamId};
use crate::store::zset::SortedSet;
use crate::store::{Database, Entry, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ValueSnapshot {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    Set(Vec<Vec<u8>>),
    ZSet(Vec<(Vec<u8>, f64)>),
    Stream(StreamSnapshot),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub entries: Vec<(u64, u64, Vec<(Vec<u8>, Vec<u8>)>)>,
    pub last_id: (u64, u64),
    pub max_deleted_id: (u64, u64),
    pub entries_added: u64,
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub name: Vec<u8>,
    pub last_delivered: (u64, u64),
    pub entries_read: u64,
    /// (ms, seq, consumer, delivery_time_ms, delivery_count)
    pub pending: Vec<(u64, u64, Vec<u8>, u64, u64)>,
    pub consumers: Vec<(Vec<u8>, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub key: Vec<u8>,
    pub expires_at: Option<u64>,
    pub value: ValueSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub databases: Vec<Vec<EntrySnapshot>>,
}

impl From<&Value> for ValueSnapshot {
    fn from(value: &Value) -> Self {
        match value {
            Value::Str(s) => ValueSnapshot::String(s.clone()),
            Value::List(l) => ValueSnapshot::List(l.iter().cloned().collect()),
            Value::Hash(h) => {
                ValueSnapshot::Hash(h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Value::Set(s) => ValueSnapshot::Set(s.iter().cloned().collect()),
            Value::ZSet(z) => {
                ValueSnapshot::ZSet(z.iter().map(|(m, s)| (m.to_vec(), s)).collect())
            }
            Value::Stream(st) => ValueSnapshot::Stream(StreamSnapshot {
                entries: st
                    .entries
                    .iter()
                    .map(|(id, f)| (id.ms, id.seq, f.clone()))
                    .collect(),
                last_id: (st.last_id.ms, st.last_id.seq),
                max_deleted_id: (st.max_deleted_id.ms, st.max_deleted_id.seq),
                entries_added: st.entries_added,
                groups: st
                    .groups
                    .iter()
                    .map(|(name, g)| GroupSnapshot {
                        name: name.clone(),
                        last_delivered: (g.last_delivered.ms, g.last_delivered.seq),
                        entries_read: g.entries_read,
                        pending: g
                            .pending
                            .iter()
                            .map(|(id, p)| {
                                (
                                    id.ms,
                                    id.seq,
                                    p.consumer.clone(),
                                    p.delivery_time_ms,
                                    p.delivery_count,
                                )
                            })
                            .collect(),
                        consumers: g
                            .consumers
                            .iter()
                            .map(|(n, c)| (n.clone(), c.seen_time_ms))
                            .collect(),
                    })
                    .collect(),
            }),
        }
    }
}

impl From<&ValueSnapshot> for Value {
    fn from(snapshot: &ValueSnapshot) -> Self {
        match snapshot {
            ValueSnapshot::String(s) => Value::Str(s.clone()),
            ValueSnapshot::List(l) => Value::List(l.iter().cloned().collect()),
            ValueSnapshot::Hash(h) => Value::Hash(h.iter().cloned().collect()),
            ValueSnapshot::Set(s) => Value::Set(s.iter().cloned().collect()),
            ValueSnapshot::ZSet(pairs) => {
                let mut z = SortedSet::new();
                for (m, s) in pairs {
                    z.insert(m.clone(), *s);
                }
                Value::ZSet(z)
            }
            ValueSnapshot::Stream(ss) => {
                let mut stream = Stream {
                    last_id: StreamId::new(ss.last_id.0, ss.last_id.1),
                    max_deleted_id: StreamId::new(ss.max_deleted_id.0, ss.max_deleted_id.1),
                    entries_added: ss.entries_added,
                    ..Stream::default()
                };
                for (ms, seq, fields) in &ss.entries {
                    stream
                        .entries
                        .insert(StreamId::new(*ms, *seq), fields.clone());
                }
                for g in &ss.groups {
                    let mut group = ConsumerGroup {
                        last_delivered: StreamId::new(g.last_delivered.0, g.last_delivered.1),
                        entries_read: g.entries_read,
                        ..ConsumerGroup::default()
                    };
                    for (ms, seq, consumer, time, count) in &g.pending {
                        group.pending.insert(
                            StreamId::new(*ms, *seq),
                            PendingEntry {
                                consumer: consumer.clone(),
                                delivery_time_ms: *time,
                                delivery_count: *count,
                            },
                        );
                    }
                    for (name, seen) in &g.consumers {
                        group
                            .consumers
                            .insert(name.clone(), Consumer { seen_time_ms: *seen });
                    }
                    stream.groups.insert(g.name.clone(), group);
                }
                Value::Stream(stream)
            }
        }
    }
}

/// Capture every live entry; expired keys are skipped.
pub fn capture(dbs: &[Database], now_ms: u64) -> Snapshot {
    Snapshot {
        databases: dbs
            .iter()
            .map(|db| {
                db.iter()
                    .filter(|(_, e)| !e.is_expired(now_ms))
                    .map(|(k, e)| EntrySnapshot {
                        key: k.clone(),
                        expires_at: e.expires_at,
                        value: (&e.value).into(),
                    })
                    .collect()
            })
            .collect(),
    }
}

/// Rebuild databases from a snapshot, dropping entries already expired.
pub fn restore_into(dbs: &mut [Database], snapshot: &Snapshot, now_ms: u64) {
    for (i, db) in dbs.iter_mut().enumerate() {
        db.clear();
        if let Some(entries) = snapshot.databases.get(i) {
            for entry in entries {
                if entry.expires_at.is_some_and(|t| t <= now_ms) {
                    continue;
                }
                db.insert(
                    entry.key.clone(),
                    Entry::with_expiry((&entry.value).into(), entry.expires_at),
                );
            }
        }
    }
}

pub trait Snapshotter: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
    fn load(&self) -> Result<Option<Snapshot>>;
}

/// In-memory sink, the default for embedded servers: DEBUG RELOAD round
/// trips through it without touching disk.
#[derive(Debug, Default)]
pub struct MemorySnapshotter {
    slot: Mutex<Option<Snapshot>>,
}

impl Snapshotter for MemorySnapshotter {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.slot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.slot.lock().unwrap().clone())
    }
}

/// File-backed JSON sink.
#[derive(Debug)]
pub struct JsonSnapshotter {
    path: PathBuf,
}

impl JsonSnapshotter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Snapshotter for JsonSnapshotter {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| EngineError::other(format!("snapshot encode failed: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| EngineError::other(format!("snapshot write failed: {e}")))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::other(format!("snapshot read failed: {e}")));
            }
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::other(format!("snapshot decode failed: {e}")))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn sample_dbs() -> Vec<Database> {
        let mut db0 = Database::default();
        db0.insert(b"s".to_vec(), Entry::new(Value::Str(b"v".to_vec())));
        db0.insert(
            b"l".to_vec(),
            Entry::new(Value::List(VecDeque::from(vec![
                b"a".to_vec(),
                b"b".to_vec(),
            ]))),
        );
        let mut z = SortedSet::new();
        z.insert(b"m".to_vec(), 1.5);
        db0.insert(b"z".to_vec(), Entry::new(Value::ZSet(z)));
        db0.insert(
            b"ttl".to_vec(),
            Entry::with_expiry(Value::Str(b"x".to_vec()), Some(500)),
        );
        let mut db1 = Database::default();
        let mut stream = Stream::default();
        let id = stream.next_id(b"*", 100).unwrap();
        stream.add(id, vec![(b"f".to_vec(), b"v".to_vec())]);
        db1.insert(b"st".to_vec(), Entry::new(Value::Stream(stream)));
        vec![db0, db1]
    }

    #[test]
    fn capture_restore_round_trip() {
        let dbs = sample_dbs();
        let snap = capture(&dbs, 100);
        let mut restored = vec![Database::default(), Database::default()];
        restore_into(&mut restored, &snap, 100);

        assert_eq!(restored[0].len(), 4);
        assert_eq!(restored[1].len(), 1);
        assert_eq!(
            restored[0].get(b"s").unwrap().value,
            Value::Str(b"v".to_vec())
        );
        assert_eq!(restored[0].get(b"ttl").unwrap().expires_at, Some(500));
        let Value::Stream(st) = &restored[1].get(b"st").unwrap().value else {
            panic!("expected stream");
        };
        assert_eq!(st.last_id, StreamId::new(100, 0));
    }

    #[test]
    fn restore_skips_expired_entries() {
        let dbs = sample_dbs();
        let snap = capture(&dbs, 100);
        let mut restored = vec![Database::default(), Database::default()];
        restore_into(&mut restored, &snap, 1_000);
        assert!(restored[0].get(b"ttl").is_none());
        assert_eq!(restored[0].len(), 3);
    }

    #[test]
    fn json_snapshotter_round_trips() {
        let dir = std::env::temp_dir().join(format!("redsim-snap-{}", std::process::id()));
        let sink = JsonSnapshotter::new(&dir);
        let snap = capture(&sample_dbs(), 100);
        sink.save(&snap).unwrap();
        let loaded = sink.load().unwrap().unwrap();
        assert_eq!(loaded.databases[0].len(), snap.databases[0].len());
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn memory_snapshotter_starts_empty() {
        let sink = MemorySnapshotter::default();
        assert!(sink.load().unwrap().is_none());
    }
}
