//! Schema definition and validation.
//!
//! A schema names a table and maps each field name to its [`Field`] kind.
//! Names starting with `$` or `@` are reserved for record identity and
//! metadata in the snapshot format.

use crate::{field::Field, SchemaId};
use std::collections::BTreeMap;

/// Leading characters reserved for record identity and metadata keys.
pub const RESERVED_PREFIXES: [char; 2] = ['$', '@'];

/// Immutable description of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Unique schema id, also the table name
    pub id: SchemaId,
    /// Field definitions by name
    pub fields: BTreeMap<String, Field>,
}

impl Schema {
    /// Create a schema with no fields.
    pub fn new(id: impl Into<SchemaId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the schema.
    pub fn add_field(&mut self, name: impl Into<String>, field: Field) -> &mut Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Builder-style method to add a field.
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.add_field(name, field);
        self
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }
}

/// Check a schema, returning one human-readable message per problem.
pub fn validate_schema(schema: &Schema) -> Vec<String> {
    let mut errors = Vec::new();

    if schema.id.is_empty() {
        errors.push("schema id must not be empty".to_string());
    }

    for name in schema.fields.keys() {
        if name.is_empty() {
            errors.push(format!("schema '{}': field name must not be empty", schema.id));
        } else if name.starts_with(RESERVED_PREFIXES) {
            errors.push(format!(
                "schema '{}': field name '{}' is reserved (names may not start with '$' or '@')",
                schema.id, name
            ));
        }
    }

    errors
}
