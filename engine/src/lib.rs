//! # Tether Engine
//!
//! The IO-free core of Tether: a schema derived from explicit model
//! descriptions, normalized records, the remote/internal key map, the
//! in-memory record cache and the JSON:API document model.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about networks or runtimes
//! - **Normalized**: records reference each other by [`RecordIdentity`] only
//! - **Deterministic**: ordered maps everywhere equality or output matters
//!
//! ## Core Concepts
//!
//! ### Schema
//!
//! A [`Schema`] is derived from [`ModelDescription`]s, each an ordered list of
//! key, attribute, has-one and has-many fields. Derivation fails with a
//! [`SchemaError`] on duplicate fields, multiple keys or dangling relations.
//!
//! ### Records and the key map
//!
//! [`Record`]s are stored under internal ids. The [`KeyMap`] binds those to
//! the ids used by the remote server, allocating internal ids the first time
//! a remote id is seen.
//!
//! ### Cache
//!
//! The [`RecordCache`] stores records, evaluates [`QueryExpr`]s and applies
//! [`Operation`]s. Upserts merge, and merging identical content is a no-op.
//!
//! ### Documents
//!
//! [`ResourceDocument`] models JSON:API payloads. The [`Normalizer`] turns a
//! compound document into a [`RecordBatch`]; the [`Serializer`] goes back.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_engine::{
//!     FieldType, KeyMap, ModelDescription, Normalizer, RecordCache, ResourceDocument, Schema,
//! };
//!
//! // 1. Derive a schema
//! let schema = Arc::new(
//!     Schema::derive([(
//!         "planet",
//!         ModelDescription::new()
//!             .key("remoteId")
//!             .attr("name", FieldType::String),
//!     )])
//!     .unwrap(),
//! );
//!
//! // 2. Normalize a remote document
//! let keymap = KeyMap::new();
//! let document = ResourceDocument::from_slice(
//!     br#"{"data": {"type": "planet", "id": "12345", "attributes": {"name": "Jupiter"}}}"#,
//! )
//! .unwrap();
//! let batch = Normalizer::new(&schema, &keymap).document(&document).unwrap().batch;
//!
//! // 3. Merge it into the cache and read it back by key
//! let mut cache = RecordCache::new(schema.clone());
//! cache.upsert_all(batch.records.iter().map(|r| (**r).clone())).unwrap();
//!
//! let jupiter = cache.find_by_key("planet", "remoteId", "12345", &keymap).unwrap().unwrap();
//! assert_eq!(jupiter.attribute("name").unwrap(), "Jupiter");
//! ```

pub mod cache;
pub mod document;
pub mod error;
pub mod keymap;
pub mod operation;
pub mod query;
pub mod record;
pub mod schema;

// Re-export main types at crate root
pub use cache::{Collection, RecordCache, RecordChange};
pub use document::{
    Linkage, Normalized, Normalizer, PrimaryData, RelationshipObject, Resource, ResourceDocument,
    ResourceIdentifier, Serializer,
};
pub use error::{Error, SchemaError};
pub use keymap::{KeyMap, KeyMapEntry};
pub use operation::Operation;
pub use query::{FieldFilter, FilterOp, Page, QueryExpr, SortOrder, SortSpec};
pub use record::{Record, RecordBatch, RecordIdentity, RelationshipData};
pub use schema::{
    pluralize, FieldDef, FieldKind, FieldType, ModelDescription, RecordType, Schema,
    TypeDescription,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type TypeName = String;
pub type FieldName = String;
