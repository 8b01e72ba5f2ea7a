//! The datastore: tables, the transaction state machine and remote
//! transaction processing.
//!
//! A datastore is `Idle` or `InTransaction`. Local edits happen between
//! [`Datastore::begin_transaction`] and [`Datastore::end_transaction`];
//! remote transactions delivered while one is open are queued and replayed
//! from [`Datastore::run_pending`], which the host calls at the end of each
//! turn of its event loop.

use crate::{
    adapter::{Adapter, Inbound, InboundReceiver, InboundSender},
    cemetery::Cemetery,
    config::{Options, TransactionIdFactory},
    error::Result,
    observer::{Observers, Subscription},
    schema::validate_schema,
    snapshot::DatastoreSnapshot,
    table::{Table, TableUpdate},
    transaction::Context,
    ChangeEvent, DatastoreChange, Error, SchemaId, StoreId, Transaction, TransactionId,
    TransactionKind, Version,
};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::mpsc;

/// Deferred work, each kind pending at most once.
#[derive(Debug, Default)]
struct Pending {
    auto_end: bool,
    drain: bool,
}

/// A replica of a collaborative datastore.
pub struct Datastore {
    store_id: StoreId,
    version: Version,
    tables: BTreeMap<SchemaId, Table>,
    context: Context,
    cemetery: Cemetery,
    adapter: Option<Box<dyn Adapter>>,
    inbound_tx: InboundSender,
    inbound_rx: InboundReceiver,
    queue: VecDeque<Inbound>,
    pending: Pending,
    observers: Observers,
    transaction_id_factory: TransactionIdFactory,
    disposed: bool,
}

impl Datastore {
    /// Create a datastore.
    ///
    /// Fails if two schemas share an id, if any schema is invalid (all
    /// problems are reported together), or if the snapshot cannot be read.
    pub fn create(options: Options) -> Result<Self> {
        let Options {
            store_id,
            schemas,
            adapter,
            restore,
            transaction_id_factory,
        } = options;

        let errors: Vec<String> = schemas.iter().flat_map(validate_schema).collect();
        if !errors.is_empty() {
            return Err(Error::InvalidSchema(errors));
        }

        let mut tables = BTreeMap::new();
        for schema in schemas {
            if tables.contains_key(&schema.id) {
                return Err(Error::DuplicateSchema(schema.id));
            }
            tables.insert(schema.id.clone(), Table::new(schema));
        }

        let version = match restore {
            Some(json) => DatastoreSnapshot::from_json(&json)?.restore_into(&mut tables)?,
            None => 0,
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if let Some(adapter) = &adapter {
            adapter.attach(inbound_tx.clone());
        }

        tracing::debug!(store_id, version, tables = tables.len(), "datastore created");

        Ok(Self {
            store_id,
            version,
            tables,
            context: Context::default(),
            cemetery: Cemetery::new(),
            adapter,
            inbound_tx,
            inbound_rx,
            queue: VecDeque::new(),
            pending: Pending::default(),
            observers: Observers::new(),
            transaction_id_factory,
            disposed: false,
        })
    }

    /// The replica id.
    pub fn id(&self) -> StoreId {
        self.store_id
    }

    /// The current version.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn in_transaction(&self) -> bool {
        self.context.in_transaction
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Get a table by schema id.
    pub fn get(&self, schema_id: &str) -> Result<&Table> {
        self.tables
            .get(schema_id)
            .ok_or_else(|| Error::TableNotFound(schema_id.to_string()))
    }

    /// Iterate over tables in schema id order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Transaction reference counts.
    pub fn cemetery(&self) -> &Cemetery {
        &self.cemetery
    }

    /// A sender for delivering transactions to this datastore directly,
    /// without an adapter. Messages are processed by
    /// [`Datastore::run_pending`].
    pub fn inbound(&self) -> InboundSender {
        self.inbound_tx.clone()
    }

    /// Number of remote transactions waiting for the open transaction to
    /// end.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Open a transaction and return its id.
    pub fn begin_transaction(&mut self) -> Result<TransactionId> {
        self.ensure_live()?;
        if self.context.in_transaction {
            return Err(Error::TransactionInProgress);
        }

        self.version += 1;
        let id = (self.transaction_id_factory)(self.version, self.store_id);
        self.context.begin(id.clone(), self.version, self.store_id);
        self.pending.auto_end = true;
        Ok(id)
    }

    /// Apply local edits to one table within the open transaction.
    pub fn update(&mut self, schema_id: &str, data: TableUpdate) -> Result<()> {
        self.ensure_live()?;
        if !self.context.in_transaction {
            return Err(Error::NoTransaction);
        }
        let table = self
            .tables
            .get_mut(schema_id)
            .ok_or_else(|| Error::TableNotFound(schema_id.to_string()))?;
        table.update(&mut self.context, data)
    }

    /// Close the open transaction, broadcasting its patch and publishing its
    /// change.
    pub fn end_transaction(&mut self) -> Result<()> {
        self.ensure_live()?;
        if !self.context.in_transaction {
            return Err(Error::NoTransaction);
        }

        let version = self.context.version;
        let (id, change, patch) = self.context.finish();

        if !patch.is_empty() {
            if let Some(adapter) = &self.adapter {
                adapter.broadcast(&Transaction {
                    id: id.clone(),
                    store_id: self.store_id,
                    version,
                    patch,
                });
            }
        }

        self.cemetery.mark_visible(&id);

        if !change.is_empty() {
            self.publish(self.store_id, id, TransactionKind::Transaction, change);
        }
        Ok(())
    }

    /// Undo a transaction on every replica.
    ///
    /// The returned future resolves once the adapter has accepted the
    /// request; the local effect arrives through the inbound channel like
    /// any other delivery.
    pub fn undo(&self, id: &str) -> Result<BoxFuture<'static, Result<()>>> {
        Ok(self.history_adapter()?.undo(id))
    }

    /// Redo a previously undone transaction on every replica.
    pub fn redo(&self, id: &str) -> Result<BoxFuture<'static, Result<()>>> {
        Ok(self.history_adapter()?.redo(id))
    }

    /// Apply a transaction delivered by another replica or the adapter.
    ///
    /// If a local transaction is open the delivery is queued and replayed
    /// once it ends.
    pub fn process_transaction(
        &mut self,
        transaction: Transaction,
        kind: TransactionKind,
    ) -> Result<()> {
        self.ensure_live()?;
        if self.context.in_transaction {
            tracing::debug!(
                store_id = self.store_id,
                transaction = %transaction.id,
                %kind,
                "transaction in progress, queueing delivery"
            );
            self.queue.push_back(Inbound { kind, transaction });
            self.pending.drain = true;
            return Ok(());
        }

        self.version = self.version.max(transaction.version);

        let apply = match kind {
            TransactionKind::Transaction | TransactionKind::Redo => {
                self.cemetery.apply(&transaction.id)
            }
            TransactionKind::Undo => self.cemetery.unapply(&transaction.id),
        };
        if !apply {
            tracing::debug!(
                store_id = self.store_id,
                transaction = %transaction.id,
                %kind,
                count = self.cemetery.count(&transaction.id),
                "skipping delivery"
            );
            return Ok(());
        }

        self.context
            .begin(transaction.id.clone(), self.version, transaction.store_id);

        let mut change = DatastoreChange::new();
        for (schema_id, table_patch) in &transaction.patch {
            let Some(table) = self.tables.get_mut(schema_id) else {
                tracing::warn!(
                    store_id = self.store_id,
                    transaction = %transaction.id,
                    schema = %schema_id,
                    "remote transaction names unknown table, skipping it"
                );
                continue;
            };
            tracing::trace!(schema = %schema_id, records = table_patch.len(), %kind, "patching table");
            let table_change = match kind {
                TransactionKind::Undo => table.unpatch(table_patch),
                _ => table.patch(table_patch),
            };
            if !table_change.is_empty() {
                change.insert(schema_id.clone(), table_change);
            }
        }

        self.context.finish();

        if !change.is_empty() {
            self.publish(transaction.store_id, transaction.id, kind, change);
        }
        Ok(())
    }

    /// Run deferred work: close a transaction left open, replay deliveries
    /// queued behind it, then process new inbound deliveries.
    ///
    /// Deliveries queued while the backlog is replayed wait for the next
    /// call.
    pub fn run_pending(&mut self) {
        if self.disposed {
            return;
        }

        if std::mem::take(&mut self.pending.auto_end) && self.context.in_transaction {
            tracing::warn!(
                store_id = self.store_id,
                transaction = %self.context.id,
                "transaction left open, ending it automatically"
            );
            if let Err(err) = self.end_transaction() {
                tracing::warn!(error = %err, "failed to end transaction");
            }
        }

        if std::mem::take(&mut self.pending.drain) {
            let backlog = std::mem::take(&mut self.queue);
            for Inbound { kind, transaction } in backlog {
                if let Err(err) = self.process_transaction(transaction, kind) {
                    tracing::warn!(error = %err, "failed to process queued transaction");
                }
            }
        }

        while let Ok(Inbound { kind, transaction }) = self.inbound_rx.try_recv() {
            if let Err(err) = self.process_transaction(transaction, kind) {
                tracing::warn!(error = %err, "failed to process inbound transaction");
            }
        }
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    /// Snapshot every table.
    pub fn snapshot(&self) -> Result<DatastoreSnapshot> {
        DatastoreSnapshot::capture(self.tables.values())
    }

    /// Serialize every table to JSON, in the format accepted by
    /// [`Options::with_restore`].
    pub fn to_json(&self) -> Result<String> {
        self.snapshot()?.to_json()
    }

    /// Detach the adapter and drop all listeners. Later transactional calls
    /// fail with [`Error::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(adapter) = self.adapter.take() {
            adapter.detach();
        }
        self.observers.clear();
        self.queue.clear();
        self.inbound_rx.close();
        self.disposed = true;
        tracing::debug!(store_id = self.store_id, "datastore disposed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn history_adapter(&self) -> Result<&dyn Adapter> {
        self.ensure_live()?;
        if self.context.in_transaction {
            return Err(Error::TransactionInProgress);
        }
        self.adapter.as_deref().ok_or(Error::NoAdapter)
    }

    fn publish(
        &self,
        store_id: StoreId,
        transaction_id: TransactionId,
        kind: TransactionKind,
        change: DatastoreChange,
    ) {
        self.observers.publish(&ChangeEvent {
            store_id,
            transaction_id,
            kind,
            change,
        });
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("store_id", &self.store_id)
            .field("version", &self.version)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("in_transaction", &self.context.in_transaction)
            .field("queued", &self.queue.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}
