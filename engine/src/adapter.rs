//! Patch history adapters.
//!
//! An adapter carries committed transactions between replicas and keeps
//! the history that undo and redo refer to. Inbound deliveries go through
//! the channel handed to [`Adapter::attach`]; the datastore drains it in
//! [`Datastore::run_pending`](crate::Datastore::run_pending).
//!
//! [`MemoryHub`] connects any number of datastores within one process.

use crate::{error::Result, Error, Transaction, TransactionId, TransactionKind};
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A transaction delivered to a datastore.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub kind: TransactionKind,
    pub transaction: Transaction,
}

/// Sender half of a datastore's inbound channel.
pub type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Receiver half of a datastore's inbound channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Transport and history for a datastore's transactions.
pub trait Adapter: Send + Sync {
    /// Start delivering remote transactions, undos and redos to `inbound`.
    fn attach(&self, inbound: InboundSender);

    /// Publish a locally committed transaction.
    fn broadcast(&self, transaction: &Transaction);

    /// Ask every replica to undo a transaction.
    fn undo(&self, id: &str) -> BoxFuture<'static, Result<()>>;

    /// Ask every replica to redo a transaction.
    fn redo(&self, id: &str) -> BoxFuture<'static, Result<()>>;

    /// Stop delivering to the attached datastore.
    fn detach(&self);
}

pub type PeerId = u64;

#[derive(Debug, Default)]
struct Peer {
    sender: Option<InboundSender>,
    paused: bool,
    held: Vec<Inbound>,
}

#[derive(Debug, Default)]
struct Hub {
    peers: DashMap<PeerId, Peer>,
    history: DashMap<TransactionId, Transaction>,
    next_peer: AtomicU64,
}

/// An in-process loopback connecting several datastores.
///
/// Cloning the hub shares it.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    hub: Arc<Hub>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter for a new peer.
    pub fn adapter(&self) -> MemoryAdapter {
        let peer = self.hub.next_peer.fetch_add(1, Ordering::Relaxed);
        self.hub.peers.insert(peer, Peer::default());
        MemoryAdapter {
            hub: self.clone(),
            peer,
        }
    }

    /// Create an adapter whose peer starts paused.
    pub fn paused_adapter(&self) -> MemoryAdapter {
        let adapter = self.adapter();
        self.pause(adapter.peer_id());
        adapter
    }

    /// Hold messages for `peer` until it is resumed.
    pub fn pause(&self, peer: PeerId) {
        if let Some(mut p) = self.hub.peers.get_mut(&peer) {
            p.paused = true;
        }
    }

    /// Deliver held messages in arrival order and stop holding.
    pub fn resume(&self, peer: PeerId) {
        let held = match self.hub.peers.get_mut(&peer) {
            Some(mut p) => {
                p.paused = false;
                std::mem::take(&mut p.held)
            }
            None => return,
        };
        for message in held {
            // A detached peer drops what it was holding.
            let _ = self.deliver(peer, message);
        }
    }

    /// Number of messages held for `peer`.
    pub fn held(&self, peer: PeerId) -> usize {
        self.hub.peers.get(&peer).map_or(0, |p| p.held.len())
    }

    /// Remove and return the messages held for `peer`. The peer stays
    /// paused; hand the messages back with [`MemoryHub::deliver`] in any
    /// order.
    pub fn take_held(&self, peer: PeerId) -> Vec<Inbound> {
        self.hub
            .peers
            .get_mut(&peer)
            .map(|mut p| std::mem::take(&mut p.held))
            .unwrap_or_default()
    }

    /// Send a message to `peer` now, even if it is paused.
    pub fn deliver(&self, peer: PeerId, message: Inbound) -> Result<()> {
        let p = self.hub.peers.get(&peer).ok_or(Error::AdapterClosed)?;
        let sender = p.sender.as_ref().ok_or(Error::AdapterClosed)?;
        sender.send(message).map_err(|_| Error::AdapterClosed)
    }

    /// A transaction recorded by a broadcast.
    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.hub.history.get(id).map(|t| t.clone())
    }

    /// Number of transactions recorded by broadcasts.
    pub fn history_len(&self) -> usize {
        self.hub.history.len()
    }

    pub fn peer_count(&self) -> usize {
        self.hub.peers.len()
    }

    /// Queue or send `message` to every peer accepted by `include`.
    fn dispatch(&self, message: &Inbound, include: impl Fn(PeerId) -> bool) -> usize {
        let mut recipients = 0;
        for mut entry in self.hub.peers.iter_mut() {
            let peer = *entry.key();
            if !include(peer) {
                continue;
            }
            let p = entry.value_mut();
            if p.paused {
                p.held.push(message.clone());
                recipients += 1;
            } else if let Some(sender) = &p.sender {
                if sender.send(message.clone()).is_ok() {
                    recipients += 1;
                }
            }
        }
        recipients
    }

    fn replay(&self, id: &str, kind: TransactionKind) -> BoxFuture<'static, Result<()>> {
        let result = match self.transaction(id) {
            Some(transaction) => {
                let recipients = self.dispatch(&Inbound { kind, transaction }, |_| true);
                tracing::debug!(transaction = %id, %kind, recipients, "replayed transaction");
                Ok(())
            }
            None => Err(Error::UnknownTransaction(id.to_string())),
        };
        future::ready(result).boxed()
    }
}

/// One datastore's connection to a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    hub: MemoryHub,
    peer: PeerId,
}

impl MemoryAdapter {
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl Adapter for MemoryAdapter {
    fn attach(&self, inbound: InboundSender) {
        if let Some(mut p) = self.hub.hub.peers.get_mut(&self.peer) {
            p.sender = Some(inbound);
        }
        tracing::debug!(peer = self.peer, "memory adapter attached");
    }

    fn broadcast(&self, transaction: &Transaction) {
        self.hub
            .hub
            .history
            .insert(transaction.id.clone(), transaction.clone());
        let message = Inbound {
            kind: TransactionKind::Transaction,
            transaction: transaction.clone(),
        };
        let recipients = self.hub.dispatch(&message, |peer| peer != self.peer);
        tracing::debug!(
            peer = self.peer,
            transaction = %transaction.id,
            recipients,
            "broadcast transaction"
        );
    }

    fn undo(&self, id: &str) -> BoxFuture<'static, Result<()>> {
        self.hub.replay(id, TransactionKind::Undo)
    }

    fn redo(&self, id: &str) -> BoxFuture<'static, Result<()>> {
        self.hub.replay(id, TransactionKind::Redo)
    }

    fn detach(&self) {
        if let Some(mut p) = self.hub.hub.peers.get_mut(&self.peer) {
            p.sender = None;
            p.held.clear();
        }
        tracing::debug!(peer = self.peer, "memory adapter detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatastorePatch;

    fn transaction(id: &str, store_id: u32) -> Transaction {
        Transaction {
            id: id.to_string(),
            store_id,
            version: 1,
            patch: DatastorePatch::new(),
        }
    }

    fn attached(hub: &MemoryHub) -> (MemoryAdapter, InboundReceiver) {
        let adapter = hub.adapter();
        let (tx, rx) = mpsc::unbounded_channel();
        adapter.attach(tx);
        (adapter, rx)
    }

    #[test]
    fn broadcast_skips_sender() {
        let hub = MemoryHub::new();
        let (a, mut rx_a) = attached(&hub);
        let (_b, mut rx_b) = attached(&hub);

        a.broadcast(&transaction("t1", 1));

        assert!(rx_a.try_recv().is_err());
        let message = rx_b.try_recv().unwrap();
        assert_eq!(message.kind, TransactionKind::Transaction);
        assert_eq!(message.transaction.id, "t1");
        assert_eq!(hub.history_len(), 1);
    }

    #[tokio::test]
    async fn undo_reaches_every_peer() {
        let hub = MemoryHub::new();
        let (a, mut rx_a) = attached(&hub);
        let (_b, mut rx_b) = attached(&hub);
        a.broadcast(&transaction("t1", 1));
        rx_b.try_recv().unwrap();

        a.undo("t1").await.unwrap();
        assert_eq!(rx_a.try_recv().unwrap().kind, TransactionKind::Undo);
        assert_eq!(rx_b.try_recv().unwrap().kind, TransactionKind::Undo);

        a.redo("t1").await.unwrap();
        assert_eq!(rx_a.try_recv().unwrap().kind, TransactionKind::Redo);
    }

    #[tokio::test]
    async fn unknown_transaction_fails() {
        let hub = MemoryHub::new();
        let (a, _rx) = attached(&hub);
        assert_eq!(
            a.undo("missing").await,
            Err(Error::UnknownTransaction("missing".into()))
        );
    }

    #[test]
    fn paused_peer_holds_until_released() {
        let hub = MemoryHub::new();
        let (a, _rx_a) = attached(&hub);
        let (b, mut rx_b) = attached(&hub);
        hub.pause(b.peer_id());

        a.broadcast(&transaction("t1", 1));
        a.broadcast(&transaction("t2", 1));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(hub.held(b.peer_id()), 2);

        let mut held = hub.take_held(b.peer_id());
        held.reverse();
        for message in held {
            hub.deliver(b.peer_id(), message).unwrap();
        }
        assert_eq!(rx_b.try_recv().unwrap().transaction.id, "t2");
        assert_eq!(rx_b.try_recv().unwrap().transaction.id, "t1");

        a.broadcast(&transaction("t3", 1));
        hub.resume(b.peer_id());
        assert_eq!(rx_b.try_recv().unwrap().transaction.id, "t3");
        assert_eq!(hub.held(b.peer_id()), 0);
    }

    #[test]
    fn detached_peer_receives_nothing() {
        let hub = MemoryHub::new();
        let (a, _rx_a) = attached(&hub);
        let (b, mut rx_b) = attached(&hub);
        b.detach();

        a.broadcast(&transaction("t1", 1));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(
            hub.deliver(b.peer_id(), Inbound {
                kind: TransactionKind::Transaction,
                transaction: transaction("t1", 1),
            }),
            Err(Error::AdapterClosed)
        );
    }
}
