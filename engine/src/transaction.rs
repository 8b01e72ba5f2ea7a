//! Transactions: the wire record exchanged between replicas, the change
//! event published to listeners, and the accumulator of an open
//! transaction.

use crate::{
    table::{TableChange, TablePatch},
    SchemaId, StoreId, TransactionId, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `schemaId -> recordId -> field -> patch`.
pub type DatastorePatch = BTreeMap<SchemaId, TablePatch>;

/// `schemaId -> recordId -> field -> change`.
pub type DatastoreChange = BTreeMap<SchemaId, TableChange>;

/// A committed transaction as sent to other replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction id, unique across replicas
    pub id: TransactionId,
    /// Replica that produced the transaction
    pub store_id: StoreId,
    /// Version at which the patch was produced
    pub version: Version,
    /// The wire-format delta
    pub patch: DatastorePatch,
}

impl Transaction {
    /// Serialize to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How a transaction is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Transaction,
    Undo,
    Redo,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Transaction => write!(f, "transaction"),
            TransactionKind::Undo => write!(f, "undo"),
            TransactionKind::Redo => write!(f, "redo"),
        }
    }
}

/// Published after a transaction changes the visible state of a datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Replica that produced the transaction
    pub store_id: StoreId,
    pub transaction_id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// User-facing deltas of every changed field
    pub change: DatastoreChange,
}

/// State of the transaction currently open on a datastore.
#[derive(Debug, Default)]
pub(crate) struct Context {
    pub in_transaction: bool,
    pub id: TransactionId,
    pub version: Version,
    pub store_id: StoreId,
    pub change: DatastoreChange,
    pub patch: DatastorePatch,
}

impl Context {
    /// Open a transaction, discarding any previous accumulators.
    pub fn begin(&mut self, id: TransactionId, version: Version, store_id: StoreId) {
        *self = Context {
            in_transaction: true,
            id,
            version,
            store_id,
            change: DatastoreChange::new(),
            patch: DatastorePatch::new(),
        };
    }

    /// Close the transaction and hand back its accumulators.
    pub fn finish(&mut self) -> (TransactionId, DatastoreChange, DatastorePatch) {
        self.in_transaction = false;
        (
            std::mem::take(&mut self.id),
            std::mem::take(&mut self.change),
            std::mem::take(&mut self.patch),
        )
    }
}
