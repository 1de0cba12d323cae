use std::collections::{HashMap, HashSet, VecDeque};

use crate::store::stream::Stream;
use crate::store::zset::SortedSet;

/// The inner value held by a key. A key holds exactly one kind at a time;
/// changing kind requires deleting and re-creating the key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(SortedSet),
    Stream(Stream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Str,
    List,
    Hash,
    Set,
    ZSet,
    Stream,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Str => "string",
            ValueKind::List => "list",
            ValueKind::Hash => "hash",
            ValueKind::Set => "set",
            ValueKind::ZSet => "zset",
            ValueKind::Stream => "stream",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Hash(_) => ValueKind::Hash,
            Value::Set(_) => ValueKind::Set,
            Value::ZSet(_) => ValueKind::ZSet,
            Value::Stream(_) => ValueKind::Stream,
        }
    }

    /// Aggregates may not exist empty; streams are exempt because consumer
    /// groups can outlive the last entry.
    pub fn is_empty_aggregate(&self) -> bool {
        match self {
            Value::Str(_) | Value::Stream(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(Value::Str(vec![]).kind().as_str(), "string");
        assert_eq!(Value::List(VecDeque::new()).kind().as_str(), "list");
        assert_eq!(Value::ZSet(SortedSet::default()).kind().as_str(), "zset");
        assert_eq!(Value::Stream(Stream::default()).kind().as_str(), "stream");
    }

    #[test]
    fn empty_aggregate_rules() {
        assert!(Value::List(VecDeque::new()).is_empty_aggregate());
        assert!(Value::Hash(HashMap::new()).is_empty_aggregate());
        assert!(!Value::Str(vec![]).is_empty_aggregate());
        assert!(!Value::Stream(Stream::default()).is_empty_aggregate());
    }
}
