//! Error types for the Tandem engine.

use crate::{field::FieldKind, RecordId, SchemaId, TransactionId};
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Protocol misuse
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    #[error("no transaction is in progress")]
    NoTransaction,

    #[error("no patch history adapter is attached")]
    NoAdapter,

    #[error("datastore has been disposed")]
    Disposed,

    // Lookup errors
    #[error("no table found for schema: {0}")]
    TableNotFound(SchemaId),

    #[error("unknown field '{field}' in schema '{schema}'")]
    UnknownField { schema: SchemaId, field: String },

    #[error("field kind mismatch: expected {expected}, got {got}")]
    FieldKindMismatch { expected: FieldKind, got: FieldKind },

    // Construction errors
    #[error("invalid schema: {}", .0.join("; "))]
    InvalidSchema(Vec<String>),

    #[error("duplicate schema id: {0}")]
    DuplicateSchema(SchemaId),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid record '{0}' in snapshot")]
    InvalidRecord(RecordId),

    // Adapter errors
    #[error("unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("adapter channel closed")]
    AdapterClosed,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidSnapshot(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TableNotFound("users".into());
        assert_eq!(err.to_string(), "no table found for schema: users");

        let err = Error::FieldKindMismatch {
            expected: FieldKind::List,
            got: FieldKind::Text,
        };
        assert_eq!(
            err.to_string(),
            "field kind mismatch: expected list, got text"
        );

        let err = Error::UnknownField {
            schema: "users".into(),
            field: "age".into(),
        };
        assert_eq!(err.to_string(), "unknown field 'age' in schema 'users'");
    }

    #[test]
    fn invalid_schema_joins_all_messages() {
        let err = Error::InvalidSchema(vec![
            "schema 'a': field name '$x' is reserved".into(),
            "schema 'b': field name '@y' is reserved".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid schema: schema 'a': field name '$x' is reserved; schema 'b': field name '@y' is reserved"
        );
    }

    #[test]
    fn json_errors_become_snapshot_errors() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }
}
