//! Append-only stream: entries indexed by id, consumer groups with
//! pending-entries lists (PEL) and per-consumer views.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{EngineError, Result};

/// Stream entry id, ordered lexicographically as `(ms, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest id strictly greater than `self`.
    pub fn next(self) -> StreamId {
        if self.seq == u64::MAX {
            StreamId::new(self.ms + 1, 0)
        } else {
            StreamId::new(self.ms, self.seq + 1)
        }
    }

    /// The largest id strictly smaller than `self`. Undefined for ZERO.
    pub fn prev(self) -> StreamId {
        if self.seq == 0 {
            StreamId::new(self.ms.saturating_sub(1), u64::MAX)
        } else {
            StreamId::new(self.ms, self.seq - 1)
        }
    }

    /// Parse `ms` or `ms-seq`; a bare `ms` takes `default_seq`.
    pub fn parse(bytes: &[u8], default_seq: u64) -> Result<StreamId> {
        let s = std::str::from_utf8(bytes).map_err(|_| EngineError::InvalidStreamId)?;
        let (ms_part, seq_part) = match s.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (s, None),
        };
        let ms: u64 = ms_part.parse().map_err(|_| EngineError::InvalidStreamId)?;
        let seq: u64 = match seq_part {
            Some(p) => p.parse().map_err(|_| EngineError::InvalidStreamId)?,
            None => default_seq,
        };
        Ok(StreamId::new(ms, seq))
    }

    /// Parse an XRANGE-style start bound: `-` is the minimum, `(id` is
    /// exclusive, a bare ms defaults its seq to 0.
    pub fn parse_range_start(bytes: &[u8]) -> Result<StreamId> {
        if bytes == b"-" {
            return Ok(StreamId::ZERO);
        }
        if let Some(rest) = bytes.strip_prefix(b"(") {
            return Ok(StreamId::parse(rest, 0)?.next());
        }
        StreamId::parse(bytes, 0)
    }

    /// Parse an XRANGE-style end bound: `+` is the maximum, `(id` is
    /// exclusive, a bare ms defaults its seq to the maximum.
    pub fn parse_range_end(bytes: &[u8]) -> Result<StreamId> {
        if bytes == b"+" {
            return Ok(StreamId::MAX);
        }
        if let Some(rest) = bytes.strip_prefix(b"(") {
            let id = StreamId::parse(rest, u64::MAX)?;
            if id == StreamId::ZERO {
                return Err(EngineError::InvalidStreamId);
            }
            return Ok(id.prev());
        }
        StreamId::parse(bytes, u64::MAX)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

pub type StreamFields = Vec<(Vec<u8>, Vec<u8>)>;

/// One delivered-but-unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub consumer: Vec<u8>,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumer {
    pub seen_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pending: BTreeMap<StreamId, PendingEntry>,
    pub consumers: HashMap<Vec<u8>, Consumer>,
    pub entries_read: u64,
}

impl ConsumerGroup {
    pub fn pending_for(&self, consumer: &[u8]) -> usize {
        self.pending
            .values()
            .filter(|p| p.consumer == consumer)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    pub entries: BTreeMap<StreamId, StreamFields>,
    pub last_id: StreamId,
    pub max_deleted_id: StreamId,
    pub entries_added: u64,
    pub groups: HashMap<Vec<u8>, ConsumerGroup>,
}

impl Stream {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the id for an XADD: `*`, `ms-*`, or an explicit id, which
    /// must be strictly greater than the current top item.
    pub fn next_id(&self, spec: &[u8], now_ms: u64) -> Result<StreamId> {
        if spec == b"*" {
            let candidate = StreamId::new(now_ms, 0);
            return Ok(if candidate > self.last_id {
                candidate
            } else {
                self.last_id.next()
            });
        }
        if let Some(ms_part) = spec.strip_suffix(b"-*") {
            let ms: u64 = std::str::from_utf8(ms_part)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(EngineError::InvalidStreamId)?;
            if ms < self.last_id.ms {
                return Err(EngineError::StreamIdTooSmall);
            }
            if ms == self.last_id.ms {
                if self.last_id.seq == u64::MAX {
                    return Err(EngineError::StreamIdTooSmall);
                }
                return Ok(self.last_id.next());
            }
            return Ok(StreamId::new(ms, 0));
        }
        let id = StreamId::parse(spec, 0)?;
        if id == StreamId::ZERO || id <= self.last_id {
            return Err(EngineError::StreamIdTooSmall);
        }
        Ok(id)
    }

    pub fn add(&mut self, id: StreamId, fields: StreamFields) {
        self.entries.insert(id, fields);
        self.last_id = id;
        self.entries_added += 1;
    }

    pub fn remove(&mut self, id: &StreamId) -> bool {
        if self.entries.remove(id).is_some() {
            if *id > self.max_deleted_id {
                self.max_deleted_id = *id;
            }
            true
        } else {
            false
        }
    }

    /// Inclusive range in ascending order (descending when `rev`).
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
        rev: bool,
    ) -> Vec<(StreamId, StreamFields)> {
        if start > end {
            return Vec::new();
        }
        let limit = count.unwrap_or(usize::MAX);
        let iter = self.entries.range(start..=end);
        if rev {
            iter.rev()
                .take(limit)
                .map(|(id, f)| (*id, f.clone()))
                .collect()
        } else {
            iter.take(limit).map(|(id, f)| (*id, f.clone())).collect()
        }
    }

    /// Entries strictly after `after`, for XREAD and group delivery.
    pub fn entries_after(
        &self,
        after: StreamId,
        count: Option<usize>,
    ) -> Vec<(StreamId, StreamFields)> {
        if after == StreamId::MAX {
            return Vec::new();
        }
        self.range(after.next(), StreamId::MAX, count, false)
    }

    /// Drop oldest entries beyond `maxlen`. Returns removed count.
    pub fn trim_maxlen(&mut self, maxlen: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > maxlen {
            let id = *self.entries.keys().next().expect("non-empty");
            self.remove(&id);
            removed += 1;
        }
        removed
    }

    /// Drop entries with id strictly below `minid`. Returns removed count.
    pub fn trim_minid(&mut self, minid: StreamId) -> usize {
        let below: Vec<StreamId> = self
            .entries
            .range(..minid)
            .map(|(id, _)| *id)
            .collect();
        for id in &below {
            self.remove(id);
        }
        below.len()
    }

    pub fn group_mut(&mut self, name: &[u8]) -> Option<&mut ConsumerGroup> {
        self.groups.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> StreamFields {
        vec![(b"f".to_vec(), b"v".to_vec())]
    }

    #[test]
    fn id_parsing() {
        assert_eq!(StreamId::parse(b"5", 0).unwrap(), StreamId::new(5, 0));
        assert_eq!(StreamId::parse(b"5-3", 0).unwrap(), StreamId::new(5, 3));
        assert!(StreamId::parse(b"x", 0).is_err());
        assert!(StreamId::parse(b"5-", 0).is_err());
        assert_eq!(StreamId::parse_range_start(b"-").unwrap(), StreamId::ZERO);
        assert_eq!(StreamId::parse_range_end(b"+").unwrap(), StreamId::MAX);
        assert_eq!(
            StreamId::parse_range_start(b"(5-1").unwrap(),
            StreamId::new(5, 2)
        );
        assert_eq!(
            StreamId::parse_range_end(b"(5-1").unwrap(),
            StreamId::new(5, 0)
        );
    }

    #[test]
    fn auto_ids_are_strictly_increasing() {
        let mut s = Stream::default();
        let a = s.next_id(b"*", 100).unwrap();
        s.add(a, fields());
        let b = s.next_id(b"*", 100).unwrap();
        s.add(b, fields());
        assert_eq!(a, StreamId::new(100, 0));
        assert_eq!(b, StreamId::new(100, 1));
        // Clock going backwards still yields an increasing id.
        let c = s.next_id(b"*", 50).unwrap();
        assert_eq!(c, StreamId::new(100, 2));
    }

    #[test]
    fn explicit_id_must_grow() {
        let mut s = Stream::default();
        s.add(StreamId::new(5, 0), fields());
        assert!(matches!(
            s.next_id(b"5-0", 0),
            Err(EngineError::StreamIdTooSmall)
        ));
        assert!(matches!(
            s.next_id(b"4", 0),
            Err(EngineError::StreamIdTooSmall)
        ));
        assert_eq!(s.next_id(b"5-1", 0).unwrap(), StreamId::new(5, 1));
        assert_eq!(s.next_id(b"5-*", 0).unwrap(), StreamId::new(5, 1));
        assert_eq!(s.next_id(b"9-*", 0).unwrap(), StreamId::new(9, 0));
    }

    #[test]
    fn range_and_trim() {
        let mut s = Stream::default();
        for i in 1..=5 {
            s.add(StreamId::new(i, 0), fields());
        }
        assert_eq!(s.range(StreamId::ZERO, StreamId::MAX, None, false).len(), 5);
        assert_eq!(
            s.range(StreamId::new(2, 0), StreamId::new(4, 0), None, false)
                .len(),
            3
        );
        let rev = s.range(StreamId::ZERO, StreamId::MAX, Some(2), true);
        assert_eq!(rev[0].0, StreamId::new(5, 0));

        assert_eq!(s.trim_maxlen(3), 2);
        assert_eq!(s.len(), 3);
        assert_eq!(s.max_deleted_id, StreamId::new(2, 0));
        assert_eq!(s.trim_minid(StreamId::new(5, 0)), 2);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn entries_after_excludes_the_anchor() {
        let mut s = Stream::default();
        s.add(StreamId::new(1, 0), fields());
        s.add(StreamId::new(2, 0), fields());
        let got = s.entries_after(StreamId::new(1, 0), None);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, StreamId::new(2, 0));
    }
}
