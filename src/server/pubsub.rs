//! Channel and pattern subscription registries plus the
//! `notify-keyspace-events` class bitset.
//!
//! Delivery is a per-connection unbounded push channel: the connection task
//! drains it and encodes frames with whatever protocol version it negotiated
//! (RESP3 push frames, RESP2 multi-bulk arrays). A failed send means the
//! connection is gone and the registration is dropped on the spot.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc::UnboundedSender;

use crate::glob::glob_match;

/// Out-of-band frame pushed to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Message {
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
    PMessage {
        pattern: Vec<u8>,
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
    /// CLIENT KILL: the connection task closes at the next boundary.
    Kill,
}

pub type PushSender = UnboundedSender<PushEvent>;

/// Keyspace-notification classes (`notify-keyspace-events`).
pub mod classes {
    pub const KEYSPACE: u32 = 1 << 0; // K
    pub const KEYEVENT: u32 = 1 << 1; // E
    pub const GENERIC: u32 = 1 << 2; // g
    pub const STRING: u32 = 1 << 3; // $
    pub const LIST: u32 = 1 << 4; // l
    pub const SET: u32 = 1 << 5; // s
    pub const HASH: u32 = 1 << 6; // h
    pub const ZSET: u32 = 1 << 7; // z
    pub const EXPIRED: u32 = 1 << 8; // x
    pub const EVICTED: u32 = 1 << 9; // e
    pub const STREAM: u32 = 1 << 10; // t
    pub const KEY_MISS: u32 = 1 << 11; // m
    pub const NEW: u32 = 1 << 12; // n

    /// `A` covers every class except K, E, m and n.
    pub const ALL: u32 =
        GENERIC | STRING | LIST | SET | HASH | ZSET | EXPIRED | EVICTED | STREAM;
}

/// Parse a `notify-keyspace-events` flag string; `None` on unknown flags.
pub fn parse_notify_flags(s: &str) -> Option<u32> {
    let mut mask = 0u32;
    for c in s.chars() {
        mask |= match c {
            'K' => classes::KEYSPACE,
            'E' => classes::KEYEVENT,
            'g' => classes::GENERIC,
            '$' => classes::STRING,
            'l' => classes::LIST,
            's' => classes::SET,
            'h' => classes::HASH,
            'z' => classes::ZSET,
            'x' => classes::EXPIRED,
            'e' => classes::EVICTED,
            't' => classes::STREAM,
            'm' => classes::KEY_MISS,
            'n' => classes::NEW,
            'A' => classes::ALL,
            _ => return None,
        };
    }
    Some(mask)
}

/// Render a mask back to its canonical flag string.
pub fn format_notify_flags(mask: u32) -> String {
    let mut out = String::new();
    if mask & classes::ALL == classes::ALL {
        out.push('A');
    } else {
        for (bit, c) in [
            (classes::GENERIC, 'g'),
            (classes::STRING, '$'),
            (classes::LIST, 'l'),
            (classes::SET, 's'),
            (classes::HASH, 'h'),
            (classes::ZSET, 'z'),
            (classes::EXPIRED, 'x'),
            (classes::EVICTED, 'e'),
            (classes::STREAM, 't'),
        ] {
            if mask & bit != 0 {
                out.push(c);
            }
        }
    }
    for (bit, c) in [
        (classes::KEY_MISS, 'm'),
        (classes::NEW, 'n'),
        (classes::KEYSPACE, 'K'),
        (classes::KEYEVENT, 'E'),
    ] {
        if mask & bit != 0 {
            out.push(c);
        }
    }
    out
}

/// Subscription registries. BTreeMap keyed by client id keeps delivery order
/// deterministic for tests.
#[derive(Debug, Default)]
pub struct PubSub {
    channels: HashMap<Vec<u8>, BTreeMap<u64, PushSender>>,
    patterns: HashMap<Vec<u8>, BTreeMap<u64, PushSender>>,
}

impl PubSub {
    pub fn subscribe(&mut self, channel: Vec<u8>, client: u64, tx: PushSender) {
        self.channels.entry(channel).or_default().insert(client, tx);
    }

    pub fn unsubscribe(&mut self, channel: &[u8], client: u64) {
        if let Some(subs) = self.channels.get_mut(channel) {
            subs.remove(&client);
            if subs.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    pub fn psubscribe(&mut self, pattern: Vec<u8>, client: u64, tx: PushSender) {
        self.patterns.entry(pattern).or_default().insert(client, tx);
    }

    pub fn punsubscribe(&mut self, pattern: &[u8], client: u64) {
        if let Some(subs) = self.patterns.get_mut(pattern) {
            subs.remove(&client);
            if subs.is_empty() {
                self.patterns.remove(pattern);
            }
        }
    }

    /// Deliver to exact and pattern subscribers; returns the receiver count.
    pub fn publish(&mut self, channel: &[u8], payload: &[u8]) -> i64 {
        let mut delivered = 0i64;
        if let Some(subs) = self.channels.get_mut(channel) {
            let mut dead = Vec::new();
            for (&id, tx) in subs.iter() {
                let event = PushEvent::Message {
                    channel: channel.to_vec(),
                    payload: payload.to_vec(),
                };
                if tx.send(event).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(id);
                }
            }
            for id in dead {
                subs.remove(&id);
            }
        }
        let matching: Vec<Vec<u8>> = self
            .patterns
            .keys()
            .filter(|p| glob_match(p, channel))
            .cloned()
            .collect();
        for pattern in matching {
            if let Some(subs) = self.patterns.get_mut(&pattern) {
                let mut dead = Vec::new();
                for (&id, tx) in subs.iter() {
                    let event = PushEvent::PMessage {
                        pattern: pattern.clone(),
                        channel: channel.to_vec(),
                        payload: payload.to_vec(),
                    };
                    if tx.send(event).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(id);
                    }
                }
                for id in dead {
                    subs.remove(&id);
                }
            }
        }
        delivered
    }

    /// Active channels, optionally filtered by glob pattern.
    pub fn channels_matching(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = self
            .channels
            .iter()
            .filter(|(ch, subs)| {
                !subs.is_empty() && pattern.map_or(true, |p| glob_match(p, ch))
            })
            .map(|(ch, _)| ch.clone())
            .collect();
        out.sort();
        out
    }

    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map_or(0, BTreeMap::len)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn drop_client(&mut self, client: u64) {
        self.channels.retain(|_, subs| {
            subs.remove(&client);
            !subs.is_empty()
        });
        self.patterns.retain(|_, subs| {
            subs.remove(&client);
            !subs.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn notify_flag_round_trip() {
        assert_eq!(parse_notify_flags(""), Some(0));
        let mask = parse_notify_flags("KEx").unwrap();
        assert_ne!(mask & classes::KEYSPACE, 0);
        assert_ne!(mask & classes::KEYEVENT, 0);
        assert_ne!(mask & classes::EXPIRED, 0);
        assert_eq!(parse_notify_flags("Q"), None);
        let all = parse_notify_flags("AKE").unwrap();
        assert_eq!(format_notify_flags(all), "AKE");
    }

    #[test]
    fn publish_reaches_exact_and_pattern_subscribers() {
        let mut ps = PubSub::default();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        ps.subscribe(b"news.sport".to_vec(), 1, tx1);
        ps.psubscribe(b"news.*".to_vec(), 2, tx2);

        assert_eq!(ps.publish(b"news.sport", b"hello"), 2);
        assert_eq!(
            rx1.try_recv().unwrap(),
            PushEvent::Message {
                channel: b"news.sport".to_vec(),
                payload: b"hello".to_vec()
            }
        );
        assert_eq!(
            rx2.try_recv().unwrap(),
            PushEvent::PMessage {
                pattern: b"news.*".to_vec(),
                channel: b"news.sport".to_vec(),
                payload: b"hello".to_vec()
            }
        );

        assert_eq!(ps.publish(b"weather.sport", b"hi"), 0);
    }

    #[test]
    fn drop_client_clears_registrations() {
        let mut ps = PubSub::default();
        let (tx, _rx) = unbounded_channel();
        ps.subscribe(b"a".to_vec(), 1, tx.clone());
        ps.psubscribe(b"p.*".to_vec(), 1, tx);
        ps.drop_client(1);
        assert!(ps.channels_matching(None).is_empty());
        assert_eq!(ps.pattern_count(), 0);
    }
}
