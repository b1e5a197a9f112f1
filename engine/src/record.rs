//! Normalized records and the identities that reference them.

use crate::{FieldName, RecordId, TypeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A lightweight reference to a record: type plus internal id.
///
/// Relationships hold identities, never records, so cycles such as
/// planet <-> moon never become ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    #[serde(rename = "type")]
    pub type_name: TypeName,
    pub id: RecordId,
}

impl RecordIdentity {
    pub fn new(type_name: impl Into<TypeName>, id: impl Into<RecordId>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// Relationship linkage stored on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    /// To-many linkage; an ordered set.
    Many(Vec<RecordIdentity>),
    /// To-one linkage; `None` when explicitly empty.
    One(Option<RecordIdentity>),
}

impl RelationshipData {
    /// Build to-many linkage, dropping duplicate identities.
    pub fn many(identities: impl IntoIterator<Item = RecordIdentity>) -> Self {
        let mut out: Vec<RecordIdentity> = Vec::new();
        for identity in identities {
            if !out.contains(&identity) {
                out.push(identity);
            }
        }
        RelationshipData::Many(out)
    }

    /// Iterate over the referenced identities.
    pub fn identities(&self) -> impl Iterator<Item = &RecordIdentity> {
        let slice: &[RecordIdentity] = match self {
            RelationshipData::Many(ids) => ids,
            RelationshipData::One(Some(id)) => std::slice::from_ref(id),
            RelationshipData::One(None) => &[],
        };
        slice.iter()
    }
}

/// A normalized record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record type
    #[serde(rename = "type")]
    pub type_name: TypeName,
    /// Internal id, assigned locally
    pub id: RecordId,
    /// Remote keys by key field name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<FieldName, String>,
    /// Attribute values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<FieldName, serde_json::Value>,
    /// Relationship linkage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<FieldName, RelationshipData>,
}

impl Record {
    /// Create an empty record.
    pub fn new(type_name: impl Into<TypeName>, id: impl Into<RecordId>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            keys: BTreeMap::new(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(self.type_name.clone(), self.id.clone())
    }

    pub fn is(&self, identity: &RecordIdentity) -> bool {
        self.type_name == identity.type_name && self.id == identity.id
    }

    pub fn with_key(mut self, name: impl Into<FieldName>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<FieldName>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_has_one(
        mut self,
        name: impl Into<FieldName>,
        related: Option<RecordIdentity>,
    ) -> Self {
        self.relationships
            .insert(name.into(), RelationshipData::One(related));
        self
    }

    pub fn with_has_many(
        mut self,
        name: impl Into<FieldName>,
        related: impl IntoIterator<Item = RecordIdentity>,
    ) -> Self {
        self.relationships
            .insert(name.into(), RelationshipData::many(related));
        self
    }

    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipData> {
        self.relationships.get(name)
    }

    /// Merge a partial record over this one.
    ///
    /// Keys, attributes and relationships present on `incoming` replace the
    /// current values; everything else is kept.
    pub fn merged(&self, incoming: &Record) -> Record {
        let mut merged = self.clone();
        merged
            .keys
            .extend(incoming.keys.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.attributes.extend(
            incoming
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged.relationships.extend(
            incoming
                .relationships
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}

/// The normalized result of a source operation.
///
/// `primary` names the operation's subjects in response order; `records`
/// holds every record the response carried, primary and included alike.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub primary: Vec<RecordIdentity>,
    pub records: Vec<Arc<Record>>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch whose records are all primary.
    pub fn from_primary(records: Vec<Arc<Record>>) -> Self {
        Self {
            primary: records.iter().map(|r| r.identity()).collect(),
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Primary records in `primary` order. Primary identities without a
    /// record in the batch are skipped.
    pub fn primary_records(&self) -> Vec<Arc<Record>> {
        self.primary
            .iter()
            .filter_map(|identity| self.records.iter().find(|r| r.is(identity)).cloned())
            .collect()
    }
}
