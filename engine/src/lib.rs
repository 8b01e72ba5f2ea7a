//! # Tandem Engine
//!
//! A collaborative datastore whose replicas converge without coordination.
//!
//! Every replica edits its own copy at any time and exchanges patches
//! asynchronously. Fields are conflict-free replicated data types, so all
//! replicas reach the same state whatever order the patches arrive in.
//!
//! ## Core Concepts
//!
//! ### Identifiers
//!
//! [`identifier`] generates dense, totally ordered ids. Any replica can mint
//! an id between two existing ones without asking anyone, which is what
//! orders the elements of lists and text.
//!
//! ### Fields
//!
//! A [`Schema`] maps field names to one of four [`Field`] kinds:
//! - **register**: a single JSON value, last writer wins
//! - **map**: a register per key
//! - **list**: an ordered sequence of JSON values
//! - **text**: an ordered sequence of characters
//!
//! ### Transactions
//!
//! Local edits are grouped into transactions. Ending one hands its patch to
//! the [`Adapter`], which delivers it to the other replicas and keeps the
//! history used by undo and redo. A per-transaction reference count makes
//! duplicate and reordered deliveries harmless.
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_engine::{
//!     Datastore, Field, FieldUpdate, MemoryHub, Options, Schema, TableUpdate,
//! };
//!
//! let schema = Schema::new("notes")
//!     .with_field("title", Field::text())
//!     .with_field("pinned", Field::register());
//!
//! let hub = MemoryHub::new();
//! let mut alice = Datastore::create(
//!     Options::new(1).with_schema(schema.clone()).with_adapter(hub.adapter()),
//! )
//! .unwrap();
//! let mut bob = Datastore::create(
//!     Options::new(2).with_schema(schema).with_adapter(hub.adapter()),
//! )
//! .unwrap();
//!
//! let mut data = TableUpdate::new();
//! data.entry("n1".to_string())
//!     .or_default()
//!     .insert("title".to_string(), FieldUpdate::edit(0, 0, "hello"));
//!
//! alice.begin_transaction().unwrap();
//! alice.update("notes", data).unwrap();
//! alice.end_transaction().unwrap();
//!
//! // Deliveries are processed at the end of the host's turn.
//! bob.run_pending();
//!
//! let record = bob.get("notes").unwrap().get("n1").unwrap().clone();
//! assert_eq!(record.get("title").unwrap().as_text(), Some("hello"));
//! assert_eq!(alice.to_json().unwrap(), bob.to_json().unwrap());
//! ```
//!
//! ## Persistence
//!
//! [`Datastore::to_json`] writes a snapshot keyed by schema id;
//! [`Options::with_restore`] reads it back.

pub mod adapter;
pub mod cemetery;
pub mod config;
pub mod datastore;
pub mod error;
pub mod field;
pub mod identifier;
pub mod observer;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod table;
pub mod transaction;

// Re-export main types at crate root
pub use adapter::{Adapter, Inbound, InboundSender, MemoryAdapter, MemoryHub};
pub use config::Options;
pub use datastore::Datastore;
pub use error::{Error, Result};
pub use field::{
    Field, FieldChange, FieldKind, FieldMetadata, FieldPatch, FieldUpdate, FieldValue,
};
pub use identifier::Identifier;
pub use observer::Subscription;
pub use record::Record;
pub use schema::{validate_schema, Schema};
pub use snapshot::DatastoreSnapshot;
pub use table::{Table, TableChange, TablePatch, TableUpdate};
pub use transaction::{ChangeEvent, DatastoreChange, DatastorePatch, Transaction, TransactionKind};

/// Type aliases for clarity
pub type RecordId = String;
pub type SchemaId = String;
pub type TransactionId = String;
pub type StoreId = u32;
pub type Version = u64;
