//! Edge case tests for tether-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use std::sync::Arc;
use tether_engine::{
    FieldType, KeyMap, ModelDescription, Normalizer, Operation, QueryExpr, Record, RecordCache,
    RecordIdentity, ResourceDocument, Schema, Serializer,
};

fn create_test_schema() -> Arc<Schema> {
    Arc::new(
        Schema::derive([
            (
                "item",
                ModelDescription::new()
                    .key("remoteId")
                    .attr("name", FieldType::String)
                    .attr("count", FieldType::Int)
                    .attr("data", FieldType::Json)
                    .has_many("parts", "part"),
            ),
            (
                "part",
                ModelDescription::new()
                    .key("remoteId")
                    .has_one("item", "item"),
            ),
        ])
        .unwrap(),
    )
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let mut cache = RecordCache::new(create_test_schema());

    cache
        .upsert(Record::new("item", "item1").with_attribute("name", json!("")))
        .unwrap();

    let record = cache.get(&RecordIdentity::new("item", "item1")).unwrap();
    assert_eq!(record.attributes["name"], "");
}

#[test]
fn unicode_remote_ids() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let normalizer = Normalizer::new(&schema, &keymap);

    let remote_ids = ["日本語", "Привет", "🎉🚀", "with space", "slash/inside"];
    for remote_id in remote_ids {
        let document: ResourceDocument =
            serde_json::from_value(json!({"data": {"type": "item", "id": remote_id}})).unwrap();
        let batch = normalizer.document(&document).unwrap().batch;

        assert_eq!(batch.records[0].key("remoteId"), Some(remote_id));
        assert_eq!(
            keymap.internal_id("item", remote_id),
            Some(batch.records[0].id.clone())
        );
    }
    assert_eq!(keymap.len(), remote_ids.len());
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let mut cache = RecordCache::new(create_test_schema());

    for (i, value) in [i64::MIN, i64::MAX, 0, -1, 1].iter().enumerate() {
        let id = format!("item_{i}");
        cache
            .upsert(Record::new("item", id.clone()).with_attribute("count", json!(value)))
            .unwrap();

        let record = cache.get(&RecordIdentity::new("item", id)).unwrap();
        assert_eq!(record.attributes["count"], *value);
    }
}

#[test]
fn u64_accepted_as_int() {
    let mut cache = RecordCache::new(create_test_schema());
    let result =
        cache.upsert(Record::new("item", "big").with_attribute("count", json!(u64::MAX)));
    assert!(result.is_ok());
}

// ============================================================================
// JSON Edge Cases
// ============================================================================

#[test]
fn deeply_nested_json_attribute() {
    let mut cache = RecordCache::new(create_test_schema());

    let mut nested = json!({"value": "leaf"});
    for _ in 0..50 {
        nested = json!({"nested": nested});
    }

    let result = cache.upsert(Record::new("item", "item1").with_attribute("data", nested));
    assert!(result.is_ok());
}

#[test]
fn null_attribute_overwrites() {
    let mut cache = RecordCache::new(create_test_schema());
    let identity = RecordIdentity::new("item", "item1");

    cache
        .upsert(Record::new("item", "item1").with_attribute("name", json!("x")))
        .unwrap();
    cache
        .apply(&Operation::replace_attribute(identity.clone(), "name", json!(null)))
        .unwrap();

    assert_eq!(
        cache.get(&identity).unwrap().attributes["name"],
        serde_json::Value::Null
    );
}

// ============================================================================
// Document Edge Cases
// ============================================================================

#[test]
fn empty_collection_document() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let document = ResourceDocument::from_slice(br#"{"data": []}"#).unwrap();

    let batch = Normalizer::new(&schema, &keymap).document(&document).unwrap().batch;
    assert!(batch.is_empty());
    assert!(batch.primary.is_empty());
}

#[test]
fn resource_repeated_in_data_and_included() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let document: ResourceDocument = serde_json::from_value(json!({
        "data": {"type": "item", "id": "1", "attributes": {"name": "one"}},
        "included": [
            {"type": "item", "id": "1", "attributes": {"count": 1}}
        ]
    }))
    .unwrap();

    let batch = Normalizer::new(&schema, &keymap).document(&document).unwrap().batch;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.records[0].attributes["name"], "one");
    assert_eq!(batch.records[0].attributes["count"], 1);
}

#[test]
fn self_referencing_cycle_normalizes() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let document: ResourceDocument = serde_json::from_value(json!({
        "data": {
            "type": "item", "id": "1",
            "relationships": {"parts": {"data": [{"type": "part", "id": "a"}]}}
        },
        "included": [{
            "type": "part", "id": "a",
            "relationships": {"item": {"data": {"type": "item", "id": "1"}}}
        }]
    }))
    .unwrap();

    let batch = Normalizer::new(&schema, &keymap).document(&document).unwrap().batch;
    let mut cache = RecordCache::new(schema.clone());
    cache
        .upsert_all(batch.records.iter().map(|r| (**r).clone()))
        .unwrap();

    let item = &batch.primary[0];
    let parts = cache
        .query(&QueryExpr::find_related_records(item.clone(), "parts"))
        .unwrap();
    let back = cache
        .query(&QueryExpr::find_related_record(parts.primary[0].clone(), "item"))
        .unwrap();
    assert_eq!(&back.primary[0], item);
}

#[test]
fn wrong_cardinality_on_wire_is_rejected() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let document: ResourceDocument = serde_json::from_value(json!({
        "data": {
            "type": "part", "id": "a",
            "relationships": {"item": {"data": [{"type": "item", "id": "1"}]}}
        }
    }))
    .unwrap();

    assert!(Normalizer::new(&schema, &keymap).document(&document).is_err());
}

#[test]
fn normalize_then_serialize_keeps_remote_ids() {
    let schema = create_test_schema();
    let keymap = KeyMap::new();
    let wire = json!({
        "type": "item",
        "id": "42",
        "attributes": {"name": "answer"},
        "relationships": {"parts": {"data": [{"type": "part", "id": "p"}]}}
    });
    let document: ResourceDocument = serde_json::from_value(json!({"data": wire})).unwrap();

    let batch = Normalizer::new(&schema, &keymap).document(&document).unwrap().batch;
    let resource = Serializer::new(&schema, &keymap)
        .record(&batch.records[0])
        .unwrap();

    assert_eq!(serde_json::to_value(&resource).unwrap(), wire);
}
