//! Datastore construction options.

use crate::{
    adapter::Adapter, identifier::create_duplex_id, Schema, StoreId, TransactionId, Version,
};
use std::fmt;

/// Produces the id of a local transaction from its version and store id.
pub type TransactionIdFactory = fn(Version, StoreId) -> TransactionId;

/// The default transaction id: a duplex id of version and store.
pub fn default_transaction_id(version: Version, store_id: StoreId) -> TransactionId {
    create_duplex_id(version, store_id).into()
}

/// Everything needed to create a [`Datastore`](crate::Datastore).
pub struct Options {
    /// Replica id, unique among the datastores that exchange patches
    pub store_id: StoreId,
    /// One table is created per schema
    pub schemas: Vec<Schema>,
    /// Transport for broadcasts, undo and redo
    pub adapter: Option<Box<dyn Adapter>>,
    /// JSON snapshot to rehydrate from
    pub restore: Option<String>,
    pub transaction_id_factory: TransactionIdFactory,
}

impl Options {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            schemas: Vec::new(),
            adapter: None,
            restore: None,
            transaction_id_factory: default_transaction_id,
        }
    }

    /// Builder-style method to add a schema.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Builder-style method to add several schemas.
    pub fn with_schemas(mut self, schemas: impl IntoIterator<Item = Schema>) -> Self {
        self.schemas.extend(schemas);
        self
    }

    pub fn with_adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Box::new(adapter));
        self
    }

    /// Rehydrate from a snapshot produced by
    /// [`Datastore::to_json`](crate::Datastore::to_json).
    pub fn with_restore(mut self, snapshot: impl Into<String>) -> Self {
        self.restore = Some(snapshot.into());
        self
    }

    pub fn with_transaction_id_factory(mut self, factory: TransactionIdFactory) -> Self {
        self.transaction_id_factory = factory;
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("store_id", &self.store_id)
            .field("schemas", &self.schemas)
            .field("adapter", &self.adapter.is_some())
            .field("restore", &self.restore.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryHub;
    use crate::field::Field;

    #[test]
    fn builder() {
        let options = Options::new(3)
            .with_schema(Schema::new("a").with_field("x", Field::register()))
            .with_schemas([Schema::new("b"), Schema::new("c")])
            .with_adapter(MemoryHub::new().adapter())
            .with_restore("{}");

        assert_eq!(options.store_id, 3);
        assert_eq!(options.schemas.len(), 3);
        assert!(options.adapter.is_some());
        assert_eq!(options.restore.as_deref(), Some("{}"));
    }

    #[test]
    fn default_ids_order_by_version() {
        let options = Options::new(1);
        let first = (options.transaction_id_factory)(1, 9);
        let second = (options.transaction_id_factory)(2, 1);
        assert!(first < second);
        assert_eq!(first.len(), 20);

        fn custom(version: Version, store_id: StoreId) -> TransactionId {
            format!("{store_id}:{version}")
        }
        let options = Options::new(1).with_transaction_id_factory(custom);
        assert_eq!((options.transaction_id_factory)(4, 2), "2:4");
    }
}
