//! Per-connection state: selected database, authentication, transaction
//! queue, watched keys, subscriptions, negotiated protocol version.

use std::collections::HashSet;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::server::pubsub::PushEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    On,
    Off,
    /// Suppress the reply to the next command, then return to On.
    Skip,
}

/// MULTI bookkeeping. A syntactically bad command while queueing marks the
/// transaction dirty; EXEC then aborts with EXECABORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    None,
    Queuing {
        queue: Vec<Vec<Vec<u8>>>,
        dirty: bool,
    },
}

/// One watched key with the version captured at WATCH time. The epoch
/// detects FLUSH/SWAPDB which invalidate all watches wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedKey {
    pub db: usize,
    pub key: Vec<u8>,
    pub epoch: u64,
    pub version: u64,
}

#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub addr: String,
    pub db: usize,
    pub name: Vec<u8>,
    pub authenticated: bool,
    pub protocol: u8,
    pub tx: TxState,
    pub watches: Vec<WatchedKey>,
    pub channels: HashSet<Vec<u8>>,
    pub patterns: HashSet<Vec<u8>>,
    pub reply_mode: ReplyMode,
    pub should_close: bool,
    /// Executing inside EXEC or a script: blocking commands degrade to their
    /// immediate form.
    pub no_blocking: bool,
    /// Scripted calls bypass the AUTH gate.
    pub from_script: bool,
    pub push_tx: UnboundedSender<PushEvent>,
    push_rx: Option<UnboundedReceiver<PushEvent>>,
}

impl Session {
    pub fn new(id: u64, addr: String, authenticated: bool) -> Self {
        let (push_tx, push_rx) = unbounded_channel();
        Self {
            id,
            addr,
            db: 0,
            name: Vec::new(),
            authenticated,
            protocol: 2,
            tx: TxState::None,
            watches: Vec::new(),
            channels: HashSet::new(),
            patterns: HashSet::new(),
            reply_mode: ReplyMode::On,
            should_close: false,
            no_blocking: false,
            from_script: false,
            push_tx,
            push_rx: Some(push_rx),
        }
    }

    /// The connection task takes the receiving half exactly once.
    pub fn take_push_rx(&mut self) -> Option<UnboundedReceiver<PushEvent>> {
        self.push_rx.take()
    }

    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty() || !self.patterns.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    pub fn in_multi(&self) -> bool {
        matches!(self.tx, TxState::Queuing { .. })
    }

    /// Reset everything RESET resets: transaction, watches, subscriptions,
    /// db selection, name, reply mode. Protocol version survives.
    pub fn reset(&mut self) {
        self.tx = TxState::None;
        self.watches.clear();
        self.channels.clear();
        self.patterns.clear();
        self.db = 0;
        self.name.clear();
        self.reply_mode = ReplyMode::On;
        self.no_blocking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_defaults() {
        let s = Session::new(1, "127.0.0.1:1".into(), true);
        assert_eq!(s.db, 0);
        assert_eq!(s.protocol, 2);
        assert!(!s.in_multi());
        assert!(!s.is_subscribed());
        assert_eq!(s.reply_mode, ReplyMode::On);
    }

    #[test]
    fn reset_clears_transaction_and_subscriptions() {
        let mut s = Session::new(1, "t".into(), true);
        s.db = 3;
        s.tx = TxState::Queuing {
            queue: vec![vec![b"GET".to_vec(), b"k".to_vec()]],
            dirty: false,
        };
        s.channels.insert(b"c".to_vec());
        s.reset();
        assert_eq!(s.db, 0);
        assert!(!s.in_multi());
        assert!(!s.is_subscribed());
    }

    #[test]
    fn push_receiver_is_taken_once() {
        let mut s = Session::new(1, "t".into(), true);
        assert!(s.take_push_rx().is_some());
        assert!(s.take_push_rx().is_none());
    }
}
