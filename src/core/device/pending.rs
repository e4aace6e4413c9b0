//! Outstanding command table
//!
//! Each attempt registers one entry and holds a [`PendingGuard`]; dropping
//! the guard removes the entry whether or not it was resolved.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// What an entry is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// ACK or NAK of the command
    Ack,
    /// A reply message with the same key, or a NAK
    Reply,
}

/// How an entry was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<M> {
    /// Command acknowledged
    Acked,
    /// Command rejected
    Nak,
    /// Reply message received
    Reply(M),
}

/// Reply filter applied before an entry is resolved
pub type Accept<M> = fn(&M) -> bool;

/// Filter accepting every reply
pub fn accept_any<M>(_: &M) -> bool {
    true
}

struct Entry<K, M> {
    id: u64,
    key: K,
    expect: Expect,
    accept: Accept<M>,
    tx: oneshot::Sender<Resolution<M>>,
}

/// Entries in registration order
pub struct PendingTable<K, M> {
    entries: Vec<Entry<K, M>>,
    next_id: u64,
}

impl<K: PartialEq, M> PendingTable<K, M> {
    /// Empty table
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Outstanding entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: K, expect: Expect, accept: Accept<M>) -> (u64, oneshot::Receiver<Resolution<M>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            key,
            expect,
            accept,
            tx,
        });
        (id, rx)
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    /// Resolve the first still-pending entry matching `key` and `accepts`
    ///
    /// Returns false when no entry matched. An entry whose waiter has gone
    /// away is discarded and the search continues.
    fn resolve_first(
        &mut self,
        key: &K,
        accepts: impl Fn(&Entry<K, M>, &Resolution<M>) -> bool,
        mut resolution: Resolution<M>,
    ) -> bool {
        while let Some(index) = self
            .entries
            .iter()
            .position(|e| e.key == *key && accepts(e, &resolution))
        {
            let entry = self.entries.remove(index);
            match entry.tx.send(resolution) {
                Ok(()) => return true,
                Err(returned) => resolution = returned,
            }
        }
        false
    }

    /// ACK for `key`
    pub fn ack(&mut self, key: &K) -> bool {
        self.resolve_first(key, |e, _| e.expect == Expect::Ack, Resolution::Acked)
    }

    /// NAK for `key`; fails commands and polls alike
    pub fn nak(&mut self, key: &K) -> bool {
        self.resolve_first(key, |_, _| true, Resolution::Nak)
    }

    /// Reply message carrying `key`, offered to poll entries whose filter accepts it
    pub fn reply(&mut self, key: &K, message: M) -> bool {
        self.resolve_first(
            key,
            |e, resolution| {
                e.expect == Expect::Reply
                    && matches!(resolution, Resolution::Reply(reply) if (e.accept)(reply))
            },
            Resolution::Reply(message),
        )
    }
}

impl<K: PartialEq, M> Default for PendingTable<K, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, M> fmt::Debug for PendingTable<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.key, e.expect)))
            .finish()
    }
}

/// Removes its entry on drop
pub struct PendingGuard<K: PartialEq, M> {
    table: Arc<Mutex<PendingTable<K, M>>>,
    id: u64,
}

impl<K: PartialEq, M> PendingGuard<K, M> {
    /// Register an entry and return its guard with the resolution channel
    pub fn register(
        table: &Arc<Mutex<PendingTable<K, M>>>,
        key: K,
        expect: Expect,
    ) -> (Self, oneshot::Receiver<Resolution<M>>) {
        Self::register_with(table, key, expect, accept_any)
    }

    /// Register an entry that only takes replies passing `accept`
    pub fn register_with(
        table: &Arc<Mutex<PendingTable<K, M>>>,
        key: K,
        expect: Expect,
        accept: Accept<M>,
    ) -> (Self, oneshot::Receiver<Resolution<M>>) {
        let (id, rx) = table.lock().insert(key, expect, accept);
        (
            Self {
                table: table.clone(),
                id,
            },
            rx,
        )
    }
}

impl<K: PartialEq, M> Drop for PendingGuard<K, M> {
    fn drop(&mut self) {
        self.table.lock().remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    type Table = Arc<Mutex<PendingTable<u8, &'static str>>>;

    #[test]
    fn test_first_matching_entry_wins() {
        let table: Table = Arc::default();
        let (_g1, mut first) = PendingGuard::register(&table, 1, Expect::Ack);
        let (_g2, mut second) = PendingGuard::register(&table, 1, Expect::Ack);

        assert!(table.lock().ack(&1));
        assert_eq!(first.try_recv().unwrap(), Resolution::Acked);
        assert!(second.try_recv().is_err());
        assert_eq!(table.lock().len(), 1);

        assert!(table.lock().ack(&1));
        assert_eq!(second.try_recv().unwrap(), Resolution::Acked);
        assert!(!table.lock().ack(&1));
    }

    #[test]
    fn test_reply_skips_ack_waiters() {
        let table: Table = Arc::default();
        let (_g1, mut ack) = PendingGuard::register(&table, 7, Expect::Ack);
        let (_g2, mut poll) = PendingGuard::register(&table, 7, Expect::Reply);

        assert!(table.lock().reply(&7, "version"));
        assert_eq!(poll.try_recv().unwrap(), Resolution::Reply("version"));
        assert!(ack.try_recv().is_err());

        assert!(table.lock().nak(&7));
        assert_eq!(ack.try_recv().unwrap(), Resolution::Nak);
    }

    #[test]
    fn test_guard_removes_entry() {
        let table: Table = Arc::default();
        {
            let (_guard, _rx) = PendingGuard::register(&table, 3, Expect::Reply);
            assert_eq!(table.lock().len(), 1);
        }
        assert!(table.lock().is_empty());
        assert!(!table.lock().reply(&3, "late"));
    }

    #[test]
    fn test_dropped_waiter_is_skipped() {
        let table: Table = Arc::default();
        let (_g1, rx1) = PendingGuard::register(&table, 2, Expect::Ack);
        let (_g2, mut rx2) = PendingGuard::register(&table, 2, Expect::Ack);
        drop(rx1);
        assert!(table.lock().ack(&2));
        assert_eq!(rx2.try_recv().unwrap(), Resolution::Acked);
    }

    #[test]
    fn test_waiter_wakes_on_reply() {
        let table: Table = Arc::default();
        let (_guard, rx) = PendingGuard::register(&table, 9, Expect::Reply);
        let mut waiter = task::spawn(rx);
        assert_pending!(waiter.poll());

        assert!(table.lock().reply(&9, "rate"));
        assert!(waiter.is_woken());
        assert_eq!(assert_ready_ok!(waiter.poll()), Resolution::Reply("rate"));
    }

    #[test]
    fn test_filtered_reply_keeps_waiting() {
        let table: Table = Arc::default();
        let (_guard, mut rx) =
            PendingGuard::register_with(&table, 4, Expect::Reply, |reply: &&str| reply.starts_with("rate"));

        assert!(!table.lock().reply(&4, "version"));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.lock().len(), 1);

        assert!(table.lock().reply(&4, "rate 1000"));
        assert_eq!(rx.try_recv().unwrap(), Resolution::Reply("rate 1000"));
    }
}
