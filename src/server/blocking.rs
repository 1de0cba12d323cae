//! Wait queues for the blocking command family.
//!
//! A blocked connection parks a passive `Waiter` record on every key it
//! waits for and sleeps on its `Notify`, never holding the server lock. The
//! writer that makes a key ready signals the first compatible waiter in FIFO
//! order; the woken task retakes the lock and rechecks its condition, so a
//! lost race simply re-registers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    List,
    ZSet,
    Stream,
}

#[derive(Debug)]
pub struct Waiter {
    pub seq: u64,
    pub client: u64,
    pub kind: WaitKind,
    pub notify: Notify,
}

#[derive(Debug, Default)]
pub struct BlockingCoordinator {
    next_seq: u64,
    waiters: HashMap<(usize, Vec<u8>), VecDeque<Arc<Waiter>>>,
}

impl BlockingCoordinator {
    pub fn new_waiter(&mut self, client: u64, kind: WaitKind) -> Arc<Waiter> {
        self.next_seq += 1;
        Arc::new(Waiter {
            seq: self.next_seq,
            client,
            kind,
            notify: Notify::new(),
        })
    }

    pub fn register(&mut self, db: usize, key: Vec<u8>, waiter: Arc<Waiter>) {
        self.waiters.entry((db, key)).or_default().push_back(waiter);
    }

    pub fn unregister(&mut self, db: usize, key: &[u8], seq: u64) {
        let slot = (db, key.to_vec());
        if let Some(queue) = self.waiters.get_mut(&slot) {
            queue.retain(|w| w.seq != seq);
            if queue.is_empty() {
                self.waiters.remove(&slot);
            }
        }
    }

    /// Wake the first waiter of `kind` parked on `(db, key)`.
    pub fn signal(&mut self, db: usize, key: &[u8], kind: WaitKind) {
        if let Some(queue) = self.waiters.get(&(db, key.to_vec())) {
            if let Some(waiter) = queue.iter().find(|w| w.kind == kind) {
                waiter.notify.notify_one();
            }
        }
    }

    /// Disconnect cleanup.
    pub fn drop_client(&mut self, client: u64) {
        self.waiters.retain(|_, queue| {
            queue.retain(|w| w.client != client);
            !queue.is_empty()
        });
    }

    pub fn waiting_on(&self, db: usize, key: &[u8]) -> usize {
        self.waiters
            .get(&(db, key.to_vec()))
            .map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_signal_hits_first_compatible_waiter() {
        let mut bc = BlockingCoordinator::default();
        let w1 = bc.new_waiter(1, WaitKind::ZSet);
        let w2 = bc.new_waiter(2, WaitKind::List);
        bc.register(0, b"q".to_vec(), w1.clone());
        bc.register(0, b"q".to_vec(), w2.clone());

        bc.signal(0, b"q", WaitKind::List);
        // w2 holds a stored permit; w1 does not.
        assert!(futures_ready(&w2.notify));
        assert!(!futures_ready(&w1.notify));
    }

    fn futures_ready(notify: &Notify) -> bool {
        use std::future::Future;
        use std::task::{Context, Poll};
        let waker = futures_noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(notify.notified());
        matches!(fut.as_mut().poll(&mut cx), Poll::Ready(()))
    }

    fn futures_noop_waker() -> std::task::Waker {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn unregister_and_drop_client() {
        let mut bc = BlockingCoordinator::default();
        let w1 = bc.new_waiter(1, WaitKind::List);
        let w2 = bc.new_waiter(1, WaitKind::List);
        bc.register(0, b"a".to_vec(), w1.clone());
        bc.register(0, b"b".to_vec(), w2.clone());
        assert_eq!(bc.waiting_on(0, b"a"), 1);

        bc.unregister(0, b"a", w1.seq);
        assert_eq!(bc.waiting_on(0, b"a"), 0);

        bc.drop_client(1);
        assert_eq!(bc.waiting_on(0, b"b"), 0);
    }
}
