//! Error types for the Tether engine.

use crate::{FieldName, RecordIdentity, TypeName};
use thiserror::Error;

/// Errors raised while deriving a schema from model descriptions.
///
/// These are fatal at startup: a bad model description cannot be recovered
/// from at runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("type '{type_name}' is declared more than once")]
    DuplicateType { type_name: TypeName },

    #[error("type '{type_name}' declares field '{field}' more than once")]
    DuplicateField { type_name: TypeName, field: FieldName },

    #[error("type '{type_name}' declares more than one key field")]
    MultipleKeys { type_name: TypeName },

    #[error("field '{type_name}.{field}' references undeclared type '{related}'")]
    UnknownRelatedType {
        type_name: TypeName,
        field: FieldName,
        related: TypeName,
    },
}

/// All possible errors from the Tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    // Validation errors
    #[error("unknown record type: {0}")]
    UnknownType(TypeName),

    #[error("unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: TypeName, field: FieldName },

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: FieldName,
        expected: String,
        got: String,
    },

    #[error("relationship '{field}' expects '{expected}' records, got '{got}'")]
    RelatedTypeMismatch {
        field: FieldName,
        expected: TypeName,
        got: TypeName,
    },

    #[error("relationship '{field}' has the wrong cardinality")]
    CardinalityMismatch { field: FieldName },

    // State errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordIdentity),

    #[error("key conflict for {type_name} '{remote_id}': already bound to '{existing}'")]
    KeyConflict {
        type_name: TypeName,
        remote_id: String,
        existing: String,
    },

    #[error("no remote id known for {0}")]
    MissingRemoteId(RecordIdentity),

    // Document errors
    #[error("malformed document: {0}")]
    Decode(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
