//! Store façade: typed reads and writes against the memory source.
//!
//! Everything goes through the memory source, so whatever strategies are
//! active on it (forwarding to a remote, merging results back) apply to
//! store calls as well.

use std::sync::Arc;

use tether_engine::{
    Operation, QueryExpr, Record, RecordBatch, RecordIdentity, RelationshipData, Schema,
};

use crate::error::Result;
use crate::memory::MemorySource;
use crate::source::Source;

/// How to pick a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSelector {
    /// By the remote key, e.g. `remoteId = "12345"`
    ByKey {
        type_name: String,
        key: String,
        value: String,
    },
    /// By internal id
    ById { type_name: String, id: String },
}

impl RecordSelector {
    pub fn by_key(
        type_name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        RecordSelector::ByKey {
            type_name: type_name.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn by_id(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        RecordSelector::ById {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    memory: Arc<MemorySource>,
}

impl Store {
    pub fn new(memory: Arc<MemorySource>) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &Arc<MemorySource> {
        &self.memory
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.memory.schema()
    }

    fn views(&self, batch: RecordBatch) -> Vec<RecordView> {
        batch
            .primary_records()
            .into_iter()
            .map(|record| RecordView::new(record, Arc::clone(&self.memory)))
            .collect()
    }

    /// Resolve a selector to an identity.
    ///
    /// A key the key map has never seen is allocated an internal id, so a
    /// forwarded query has an identity to address.
    fn identity(&self, selector: &RecordSelector) -> Result<RecordIdentity> {
        match selector {
            RecordSelector::ById { type_name, id } => {
                Ok(RecordIdentity::new(type_name.clone(), id.clone()))
            }
            RecordSelector::ByKey {
                type_name,
                key,
                value,
            } => {
                if let Some(record) = self.memory.find_by_key(type_name, key, value)? {
                    return Ok(record.identity());
                }
                let id = self.memory.keymap().resolve_or_allocate(type_name, value);
                Ok(RecordIdentity::new(type_name.clone(), id))
            }
        }
    }

    /// Find a single record. `None` when neither source has it.
    pub async fn find_record(&self, selector: RecordSelector) -> Result<Option<RecordView>> {
        let identity = self.identity(&selector)?;
        let batch = self
            .memory
            .query(&QueryExpr::find_record(identity))
            .await?;
        Ok(self.views(batch).into_iter().next())
    }

    pub async fn query(&self, query: &QueryExpr) -> Result<Vec<RecordView>> {
        let batch = self.memory.query(query).await?;
        Ok(self.views(batch))
    }

    pub async fn update(&self, operation: &Operation) -> Result<Vec<RecordView>> {
        let batch = self.memory.update(operation).await?;
        Ok(self.views(batch))
    }

    /// Read a record from the memory source only, without any forwarding.
    pub fn peek(&self, identity: &RecordIdentity) -> Option<RecordView> {
        self.memory
            .get(identity)
            .map(|record| RecordView::new(record, Arc::clone(&self.memory)))
    }
}

/// A read-only view of a stored record.
///
/// Shares the stored `Arc<Record>`; later updates produce a new record and
/// do not change what an existing view sees. Related records are looked up
/// in the memory source when asked for.
#[derive(Clone)]
pub struct RecordView {
    record: Arc<Record>,
    memory: Arc<MemorySource>,
}

impl RecordView {
    fn new(record: Arc<Record>, memory: Arc<MemorySource>) -> Self {
        Self { record, memory }
    }

    pub fn identity(&self) -> RecordIdentity {
        self.record.identity()
    }

    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn get_attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.record.attribute(name)
    }

    pub fn get_key(&self, name: &str) -> Option<&str> {
        self.record.key(name)
    }

    /// The record on the other end of a to-one relationship, if set and
    /// present locally.
    pub fn get_related_record(&self, relationship: &str) -> Option<RecordView> {
        match self.record.relationship(relationship)? {
            RelationshipData::One(Some(identity)) => self.resolve(identity),
            _ => None,
        }
    }

    /// The records on the other end of a to-many relationship that are
    /// present locally, in relationship order.
    pub fn get_related_records(&self, relationship: &str) -> Vec<RecordView> {
        match self.record.relationship(relationship) {
            Some(RelationshipData::Many(identities)) => {
                identities.iter().filter_map(|i| self.resolve(i)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn resolve(&self, identity: &RecordIdentity) -> Option<RecordView> {
        self.memory
            .get(identity)
            .map(|record| RecordView::new(record, Arc::clone(&self.memory)))
    }
}

impl std::fmt::Debug for RecordView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecordView").field(&self.record).finish()
    }
}

impl PartialEq for RecordView {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_engine::{FieldType, KeyMap, ModelDescription};

    fn store() -> Store {
        let schema = Schema::derive([
            (
                "planet",
                ModelDescription::new()
                    .key("remoteId")
                    .attr("name", FieldType::String)
                    .has_many("moons", "moon"),
            ),
            (
                "moon",
                ModelDescription::new()
                    .key("remoteId")
                    .attr("name", FieldType::String)
                    .has_one("planet", "planet"),
            ),
        ])
        .unwrap();
        Store::new(MemorySource::new_shared(
            "memory",
            Arc::new(schema),
            Arc::new(KeyMap::new()),
        ))
    }

    #[tokio::test]
    async fn find_by_id_and_key() {
        let store = store();
        store
            .update(&Operation::add_record(
                Record::new("planet", "p1")
                    .with_key("remoteId", "3")
                    .with_attribute("name", json!("Earth")),
            ))
            .await
            .unwrap();

        let by_id = store
            .find_record(RecordSelector::by_id("planet", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.get_attribute("name"), Some(&json!("Earth")));
        assert_eq!(by_id.get_key("remoteId"), Some("3"));

        let by_key = store
            .find_record(RecordSelector::by_key("planet", "remoteId", "3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key, by_id);
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let store = store();
        let found = store
            .find_record(RecordSelector::by_key("planet", "remoteId", "404"))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn wrong_key_field_is_an_error() {
        let store = store();
        let result = store
            .find_record(RecordSelector::by_key("planet", "name", "Earth"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn related_getters_read_locally() {
        let store = store();
        let earth = RecordIdentity::new("planet", "p1");
        let moon = RecordIdentity::new("moon", "m1");
        let ghost = RecordIdentity::new("moon", "never-loaded");

        store
            .update(&Operation::add_record(
                Record::new("moon", "m1")
                    .with_attribute("name", json!("Moon"))
                    .with_has_one("planet", Some(earth.clone())),
            ))
            .await
            .unwrap();
        store
            .update(&Operation::add_record(
                Record::new("planet", "p1")
                    .with_attribute("name", json!("Earth"))
                    .with_has_many("moons", [moon.clone(), ghost]),
            ))
            .await
            .unwrap();

        let view = store.peek(&moon).unwrap();
        let planet = view.get_related_record("planet").unwrap();
        assert_eq!(planet.get_attribute("name"), Some(&json!("Earth")));

        let moons = planet.get_related_records("moons");
        assert_eq!(moons.len(), 1);
        assert_eq!(moons[0].identity(), moon);

        assert!(view.get_related_record("missing").is_none());
        assert!(planet.get_related_records("planet").is_empty());
    }

    #[tokio::test]
    async fn views_share_the_stored_record() {
        let store = store();
        let identity = RecordIdentity::new("planet", "p1");
        store
            .update(&Operation::add_record(Record::new("planet", "p1")))
            .await
            .unwrap();

        let first = store.peek(&identity).unwrap();
        let second = store.peek(&identity).unwrap();
        assert!(Arc::ptr_eq(first.record(), second.record()));

        store
            .update(&Operation::replace_attribute(identity.clone(), "name", json!("Earth")))
            .await
            .unwrap();
        assert_eq!(first.get_attribute("name"), None);
        assert_eq!(
            store.peek(&identity).unwrap().get_attribute("name"),
            Some(&json!("Earth"))
        );
    }
}
