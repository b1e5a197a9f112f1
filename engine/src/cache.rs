//! Record cache - the in-memory record container.
//!
//! The cache holds every locally known record, indexed by type and internal
//! id. Records are stored behind `Arc` so query results are cheap snapshots:
//! a result taken before a write keeps seeing the old record.

use crate::{
    error::Result,
    query::{compare_records, QueryExpr},
    Error, KeyMap, Operation, Record, RecordBatch, RecordId, RecordIdentity, RelationshipData,
    Schema, TypeName,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A collection of records of one type.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: HashMap<RecordId, Arc<Record>>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    /// Insert a record, replacing any previous version.
    pub fn insert(&mut self, record: Arc<Record>) -> Option<Arc<Record>> {
        self.records.insert(record.id.clone(), record)
    }

    /// Remove a record.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Record>> {
        self.records.remove(id)
    }

    /// Iterate over all records.
    pub fn records(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An observable mutation of the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Inserted(Arc<Record>),
    Updated {
        before: Arc<Record>,
        after: Arc<Record>,
    },
    Removed(Arc<Record>),
}

impl RecordChange {
    /// Identity of the changed record.
    pub fn identity(&self) -> RecordIdentity {
        match self {
            RecordChange::Inserted(record) | RecordChange::Removed(record) => record.identity(),
            RecordChange::Updated { after, .. } => after.identity(),
        }
    }

    /// The record as it is after the change, if it still exists.
    pub fn current(&self) -> Option<&Arc<Record>> {
        match self {
            RecordChange::Inserted(record) => Some(record),
            RecordChange::Updated { after, .. } => Some(after),
            RecordChange::Removed(_) => None,
        }
    }
}

/// The in-memory record cache.
#[derive(Debug, Clone)]
pub struct RecordCache {
    /// Schema for validation
    schema: Arc<Schema>,
    /// Collections by type name
    collections: HashMap<TypeName, Collection>,
}

impl RecordCache {
    /// Create an empty cache for the given schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        // One collection per declared type
        let collections = schema
            .types()
            .map(|t| (t.name.clone(), Collection::new()))
            .collect();

        Self {
            schema,
            collections,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn collection(&self, type_name: &str) -> Result<&Collection> {
        self.collections
            .get(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))
    }

    fn collection_mut(&mut self, type_name: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))
    }

    /// Get a record by identity.
    pub fn get(&self, identity: &RecordIdentity) -> Option<Arc<Record>> {
        self.collections
            .get(&identity.type_name)
            .and_then(|c| c.get(&identity.id))
            .cloned()
    }

    fn get_existing(&self, identity: &RecordIdentity) -> Result<Arc<Record>> {
        self.collection(&identity.type_name)?;
        self.get(identity)
            .ok_or_else(|| Error::RecordNotFound(identity.clone()))
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate a query against the current contents.
    pub fn query(&self, query: &QueryExpr) -> Result<RecordBatch> {
        match query {
            QueryExpr::FindRecord { record } => {
                self.collection(&record.type_name)?;
                Ok(RecordBatch::from_primary(self.get(record).into_iter().collect()))
            }
            QueryExpr::FindRecords {
                type_name,
                filter,
                sort,
                page,
            } => {
                let mut records: Vec<Arc<Record>> = self
                    .collection(type_name)?
                    .records()
                    .filter(|r| filter.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect();

                // Ties fall back to id so results are deterministic
                records.sort_by(|a, b| compare_records(a, b, sort).then_with(|| a.id.cmp(&b.id)));

                if let Some(page) = page {
                    let limit = page.limit.unwrap_or(usize::MAX);
                    records = records.into_iter().skip(page.offset).take(limit).collect();
                }

                Ok(RecordBatch::from_primary(records))
            }
            QueryExpr::FindRelatedRecord {
                record,
                relationship,
            }
            | QueryExpr::FindRelatedRecords {
                record,
                relationship,
            } => {
                let owner = self.get_existing(record)?;
                let field = self
                    .schema
                    .record_type(&record.type_name)?
                    .relationship(relationship)
                    .ok_or_else(|| Error::UnknownField {
                        type_name: record.type_name.clone(),
                        field: relationship.clone(),
                    })?;

                let expects_many = matches!(query, QueryExpr::FindRelatedRecords { .. });
                let is_many = matches!(field.kind, crate::FieldKind::HasMany { .. });
                if expects_many != is_many {
                    return Err(Error::CardinalityMismatch {
                        field: relationship.clone(),
                    });
                }

                let related: Vec<Arc<Record>> = owner
                    .relationship(relationship)
                    .map(|data| data.identities().filter_map(|i| self.get(i)).collect())
                    .unwrap_or_default();

                Ok(RecordBatch::from_primary(related))
            }
        }
    }

    /// Validate a record without storing it.
    pub fn validate(&self, record: &Record) -> Result<()> {
        self.schema.validate_record(record)
    }

    /// Merge a record into the cache.
    ///
    /// Returns `None` when the merged result equals what is already stored,
    /// so re-applying identical content produces no change.
    pub fn upsert(&mut self, record: Record) -> Result<Option<RecordChange>> {
        self.validate(&record)?;
        Ok(self.upsert_validated(record))
    }

    fn upsert_validated(&mut self, record: Record) -> Option<RecordChange> {
        let collection = self.collections.get_mut(&record.type_name)?;

        match collection.get(&record.id).cloned() {
            Some(before) => {
                let merged = before.merged(&record);
                if merged == *before {
                    return None;
                }
                let after = Arc::new(merged);
                collection.insert(Arc::clone(&after));
                Some(RecordChange::Updated { before, after })
            }
            None => {
                let inserted = Arc::new(record);
                collection.insert(Arc::clone(&inserted));
                Some(RecordChange::Inserted(inserted))
            }
        }
    }

    /// Merge a batch of records: every record is validated before any is
    /// written, so a bad batch leaves the cache untouched.
    pub fn upsert_all<I>(&mut self, records: I) -> Result<Vec<RecordChange>>
    where
        I: IntoIterator<Item = Record>,
    {
        let records: Vec<Record> = records.into_iter().collect();
        for record in &records {
            self.validate(record)?;
        }

        Ok(records
            .into_iter()
            .filter_map(|r| self.upsert_validated(r))
            .collect())
    }

    /// Remove a record. Removing an absent record is not an error.
    pub fn remove(&mut self, identity: &RecordIdentity) -> Result<Option<RecordChange>> {
        Ok(self
            .collection_mut(&identity.type_name)?
            .remove(&identity.id)
            .map(RecordChange::Removed))
    }

    /// Apply an operation.
    pub fn apply(&mut self, op: &Operation) -> Result<Option<RecordChange>> {
        match op {
            Operation::AddRecord { record } | Operation::UpdateRecord { record } => {
                self.upsert(record.clone())
            }
            Operation::RemoveRecord { record } => self.remove(record),
            Operation::ReplaceAttribute {
                record,
                attribute,
                value,
            } => {
                self.get_existing(record)?;
                let partial = Record::new(record.type_name.clone(), record.id.clone())
                    .with_attribute(attribute.clone(), value.clone());
                self.upsert(partial)
            }
            Operation::ReplaceRelatedRecord {
                record,
                relationship,
                related,
            } => {
                self.get_existing(record)?;
                let partial = Record::new(record.type_name.clone(), record.id.clone())
                    .with_has_one(relationship.clone(), related.clone());
                self.upsert(partial)
            }
            Operation::ReplaceRelatedRecords {
                record,
                relationship,
                related,
            } => {
                self.get_existing(record)?;
                let partial = Record::new(record.type_name.clone(), record.id.clone())
                    .with_has_many(relationship.clone(), related.clone());
                self.upsert(partial)
            }
            Operation::AddToRelatedRecords {
                record,
                relationship,
                related,
            } => {
                let current = self.related_many(record, relationship)?;
                let members = current.into_iter().chain(related.iter().cloned());
                let partial = Record::new(record.type_name.clone(), record.id.clone())
                    .with_has_many(relationship.clone(), members);
                self.upsert(partial)
            }
            Operation::RemoveFromRelatedRecords {
                record,
                relationship,
                related,
            } => {
                let members: Vec<RecordIdentity> = self
                    .related_many(record, relationship)?
                    .into_iter()
                    .filter(|i| !related.contains(i))
                    .collect();
                let partial = Record::new(record.type_name.clone(), record.id.clone())
                    .with_has_many(relationship.clone(), members);
                self.upsert(partial)
            }
        }
    }

    fn related_many(
        &self,
        record: &RecordIdentity,
        relationship: &str,
    ) -> Result<Vec<RecordIdentity>> {
        let owner = self.get_existing(record)?;
        match owner.relationship(relationship) {
            Some(RelationshipData::Many(ids)) => Ok(ids.clone()),
            Some(RelationshipData::One(_)) => Err(Error::CardinalityMismatch {
                field: relationship.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Find a record by its remote key.
    ///
    /// Consults the key map first, then falls back to scanning for records
    /// that carry the key but were never bound.
    pub fn find_by_key(
        &self,
        type_name: &str,
        key_field: &str,
        value: &str,
        keymap: &KeyMap,
    ) -> Result<Option<Arc<Record>>> {
        let record_type = self.schema.record_type(type_name)?;
        if record_type.key_field() != Some(key_field) {
            return Err(Error::UnknownField {
                type_name: type_name.to_string(),
                field: key_field.to_string(),
            });
        }

        if let Some(id) = keymap.internal_id(type_name, value) {
            if let Some(record) = self.get(&RecordIdentity::new(type_name, id)) {
                return Ok(Some(record));
            }
        }

        Ok(self
            .collection(type_name)?
            .records()
            .find(|r| r.key(key_field) == Some(value))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FieldFilter, SortSpec};
    use crate::schema::{FieldType, ModelDescription};
    use serde_json::json;

    fn test_schema() -> Arc<Schema> {
        Arc::new(
            Schema::derive([
                (
                    "planet",
                    ModelDescription::new()
                        .key("remoteId")
                        .attr("name", FieldType::String)
                        .attr("order", FieldType::Int)
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
            .unwrap(),
        )
    }

    fn test_cache() -> RecordCache {
        RecordCache::new(test_schema())
    }

    fn planet(id: &str, name: &str, order: i64) -> Record {
        Record::new("planet", id)
            .with_attribute("name", json!(name))
            .with_attribute("order", json!(order))
    }

    #[test]
    fn create_cache() {
        let cache = test_cache();
        assert!(cache.is_empty());
        assert!(cache.collection("planet").is_ok());
        assert!(matches!(cache.collection("comet"), Err(Error::UnknownType(_))));
    }

    #[test]
    fn upsert_insert_then_update() {
        let mut cache = test_cache();

        let change = cache.upsert(planet("p-1", "Jupiter", 5)).unwrap();
        assert!(matches!(change, Some(RecordChange::Inserted(_))));

        let change = cache
            .upsert(Record::new("planet", "p-1").with_attribute("name", json!("Jove")))
            .unwrap();
        match change {
            Some(RecordChange::Updated { before, after }) => {
                assert_eq!(before.attribute("name"), Some(&json!("Jupiter")));
                assert_eq!(after.attribute("name"), Some(&json!("Jove")));
                assert_eq!(after.attribute("order"), Some(&json!(5)));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn upsert_identical_is_unchanged() {
        let mut cache = test_cache();
        cache.upsert(planet("p-1", "Jupiter", 5)).unwrap();

        assert_eq!(cache.upsert(planet("p-1", "Jupiter", 5)).unwrap(), None);
        // A subset of the stored content is also a no-op
        assert_eq!(
            cache
                .upsert(Record::new("planet", "p-1").with_attribute("name", json!("Jupiter")))
                .unwrap(),
            None
        );
    }

    #[test]
    fn upsert_rejects_invalid() {
        let mut cache = test_cache();
        let result =
            cache.upsert(Record::new("planet", "p-1").with_attribute("order", json!("5th")));
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn upsert_all_is_all_or_nothing() {
        let mut cache = test_cache();
        let result = cache.upsert_all(vec![
            planet("p-1", "Mercury", 1),
            Record::new("comet", "c-1"),
        ]);

        assert!(matches!(result, Err(Error::UnknownType(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn snapshot_not_affected_by_later_writes() {
        let mut cache = test_cache();
        cache.upsert(planet("p-1", "Jupiter", 5)).unwrap();

        let snapshot = cache.query(&QueryExpr::find_records("planet")).unwrap();
        cache
            .upsert(Record::new("planet", "p-1").with_attribute("name", json!("Jove")))
            .unwrap();
        cache.upsert(planet("p-2", "Saturn", 6)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records[0].attribute("name"), Some(&json!("Jupiter")));
    }

    #[test]
    fn query_filter_sort_page() {
        let mut cache = test_cache();
        for (i, name) in ["Mercury", "Venus", "Earth", "Mars", "Jupiter"].iter().enumerate() {
            cache
                .upsert(planet(&format!("p-{i}"), name, i as i64 + 1))
                .unwrap();
        }

        let query = QueryExpr::find_records("planet")
            .filter(FieldFilter::new("order", crate::query::FilterOp::Gt, json!(1)))
            .sort(SortSpec::descending("order"))
            .page(1, Some(2));
        let batch = cache.query(&query).unwrap();

        let names: Vec<_> = batch
            .primary_records()
            .iter()
            .map(|r| r.attribute("name").cloned().unwrap())
            .collect();
        assert_eq!(names, vec![json!("Mars"), json!("Earth")]);
    }

    #[test]
    fn query_find_record_missing() {
        let cache = test_cache();
        let batch = cache
            .query(&QueryExpr::find_record(RecordIdentity::new("planet", "nope")))
            .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn query_related_records() {
        let mut cache = test_cache();
        let earth = RecordIdentity::new("planet", "p-3");
        let moon = RecordIdentity::new("moon", "m-1");
        let unknown = RecordIdentity::new("moon", "m-2");

        cache
            .upsert(planet("p-3", "Earth", 3).with_has_many("moons", vec![moon.clone(), unknown]))
            .unwrap();
        cache
            .upsert(
                Record::new("moon", "m-1")
                    .with_attribute("name", json!("Moon"))
                    .with_has_one("planet", Some(earth.clone())),
            )
            .unwrap();

        let moons = cache
            .query(&QueryExpr::find_related_records(earth.clone(), "moons"))
            .unwrap();
        assert_eq!(moons.primary, vec![moon.clone()]);

        let owner = cache
            .query(&QueryExpr::find_related_record(moon, "planet"))
            .unwrap();
        assert_eq!(owner.primary, vec![earth.clone()]);

        let wrong = cache.query(&QueryExpr::find_related_record(earth, "moons"));
        assert!(matches!(wrong, Err(Error::CardinalityMismatch { .. })));
    }

    #[test]
    fn apply_relationship_operations() {
        let mut cache = test_cache();
        let earth = RecordIdentity::new("planet", "p-3");
        let m1 = RecordIdentity::new("moon", "m-1");
        let m2 = RecordIdentity::new("moon", "m-2");

        cache.upsert(planet("p-3", "Earth", 3)).unwrap();

        cache
            .apply(&Operation::add_to_related_records(
                earth.clone(),
                "moons",
                vec![m1.clone(), m2.clone(), m1.clone()],
            ))
            .unwrap();
        assert_eq!(
            cache.get(&earth).unwrap().relationship("moons"),
            Some(&RelationshipData::Many(vec![m1.clone(), m2.clone()]))
        );

        cache
            .apply(&Operation::remove_from_related_records(
                earth.clone(),
                "moons",
                vec![m1],
            ))
            .unwrap();
        assert_eq!(
            cache.get(&earth).unwrap().relationship("moons"),
            Some(&RelationshipData::Many(vec![m2]))
        );

        cache
            .apply(&Operation::replace_attribute(earth.clone(), "name", json!("Terra")))
            .unwrap();
        assert_eq!(
            cache.get(&earth).unwrap().attribute("name"),
            Some(&json!("Terra"))
        );
    }

    #[test]
    fn apply_on_missing_record() {
        let mut cache = test_cache();
        let ghost = RecordIdentity::new("planet", "ghost");

        let result = cache.apply(&Operation::replace_attribute(ghost.clone(), "name", json!("X")));
        assert!(matches!(result, Err(Error::RecordNotFound(_))));

        // Removing an absent record is a no-op
        assert_eq!(cache.apply(&Operation::remove_record(ghost)).unwrap(), None);
    }

    #[test]
    fn apply_remove() {
        let mut cache = test_cache();
        cache.upsert(planet("p-1", "Mercury", 1)).unwrap();

        let change = cache
            .apply(&Operation::remove_record(RecordIdentity::new("planet", "p-1")))
            .unwrap();
        assert!(matches!(change, Some(RecordChange::Removed(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn find_by_key_uses_keymap_then_scan() {
        let mut cache = test_cache();
        let keymap = KeyMap::new();

        keymap.bind("planet", "12345", "p-1").unwrap();
        cache.upsert(planet("p-1", "Jupiter", 5)).unwrap();
        cache
            .upsert(planet("p-2", "Saturn", 6).with_key("remoteId", "67890"))
            .unwrap();

        let found = cache.find_by_key("planet", "remoteId", "12345", &keymap).unwrap();
        assert_eq!(found.unwrap().id, "p-1");

        let scanned = cache.find_by_key("planet", "remoteId", "67890", &keymap).unwrap();
        assert_eq!(scanned.unwrap().id, "p-2");

        assert!(cache
            .find_by_key("planet", "remoteId", "00000", &keymap)
            .unwrap()
            .is_none());

        let wrong_key = cache.find_by_key("planet", "name", "Jupiter", &keymap);
        assert!(matches!(wrong_key, Err(Error::UnknownField { .. })));
    }
}
