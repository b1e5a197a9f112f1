//! JSON:API resource documents and their normalization.
//!
//! A [`ResourceDocument`] is the wire shape exchanged with the remote source.
//! It is decoded once per response, normalized into flat [`Record`]s with
//! [`RecordIdentity`]-based relationships, and then discarded.

use crate::{
    error::Result, Error, KeyMap, Record, RecordBatch, RecordIdentity, RecordType,
    RelationshipData, Schema,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// `{type, id}` pair as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

/// Relationship linkage on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourceIdentifier>),
    One(Option<ResourceIdentifier>),
}

/// A relationship object. `data` is `None` when the member is absent
/// (links-only relationships), and `Some(Linkage::One(None))` when it is
/// an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipObject {
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Linkage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<serde_json::Value>,
}

impl RelationshipObject {
    pub fn with_data(data: Linkage) -> Self {
        Self {
            data: Some(data),
            links: None,
        }
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A single resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Absent on resources sent for creation without a client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<BTreeMap<String, RelationshipObject>>,
}

impl Resource {
    pub fn new(type_name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            attributes: None,
            relationships: None,
        }
    }
}

/// Primary data: a single resource, `null`, or a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<Resource>),
    One(Option<Box<Resource>>),
}

impl Default for PrimaryData {
    fn default() -> Self {
        PrimaryData::One(None)
    }
}

impl PrimaryData {
    pub fn resources(&self) -> Vec<&Resource> {
        match self {
            PrimaryData::Many(resources) => resources.iter().collect(),
            PrimaryData::One(Some(resource)) => vec![resource.as_ref()],
            PrimaryData::One(None) => Vec::new(),
        }
    }
}

/// A top-level JSON:API document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default)]
    pub data: PrimaryData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Resource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ResourceDocument {
    /// A document with a single primary resource.
    pub fn single(resource: Resource) -> Self {
        Self {
            data: PrimaryData::One(Some(Box::new(resource))),
            ..Default::default()
        }
    }

    /// Decode a document from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Every resource in the document: primary data, then included.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.data
            .resources()
            .into_iter()
            .chain(self.included.iter().flatten())
    }
}

/// Output of normalizing a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub batch: RecordBatch,
    /// Attributes and relationships the schema does not declare, as
    /// `type.field`; they are dropped from the records.
    pub skipped: Vec<String>,
}

/// Converts wire documents into normalized records.
///
/// Every remote id met in the document, including ids only mentioned in
/// relationship linkage, is resolved through the key map (allocating on
/// first sight), so referenced-but-not-included records still get a stable
/// internal id.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    schema: &'a Schema,
    keymap: &'a KeyMap,
}

impl<'a> Normalizer<'a> {
    pub fn new(schema: &'a Schema, keymap: &'a KeyMap) -> Self {
        Self { schema, keymap }
    }

    fn record_type(&self, wire_type: &str) -> Result<&'a RecordType> {
        self.schema
            .resolve_type(wire_type)
            .ok_or_else(|| Error::UnknownType(wire_type.to_string()))
    }

    fn internal_id(&self, record_type: &RecordType, remote_id: &str) -> String {
        match record_type.key_field() {
            Some(_) => self.keymap.resolve_or_allocate(&record_type.name, remote_id),
            // Types without a key use the remote id as-is
            None => remote_id.to_string(),
        }
    }

    /// Resolve a wire identifier to an internal identity.
    pub fn identity(&self, identifier: &ResourceIdentifier) -> Result<RecordIdentity> {
        let record_type = self.record_type(&identifier.type_name)?;
        Ok(RecordIdentity::new(
            record_type.name.clone(),
            self.internal_id(record_type, &identifier.id),
        ))
    }

    /// Bind the document's single primary resource to a local identity.
    ///
    /// Used for creation responses, where the server assigns the remote id of
    /// a record that already exists locally.
    pub fn bind_primary(&self, document: &ResourceDocument, local: &RecordIdentity) -> Result<()> {
        let PrimaryData::One(Some(resource)) = &document.data else {
            return Ok(());
        };
        let record_type = self.record_type(&resource.type_name)?;
        match (&resource.id, record_type.key_field()) {
            (Some(remote_id), Some(_)) if record_type.name == local.type_name => {
                self.keymap.bind(&record_type.name, remote_id, &local.id)
            }
            _ => Ok(()),
        }
    }

    /// Normalize one resource into a record.
    pub fn resource(&self, resource: &Resource, skipped: &mut Vec<String>) -> Result<Record> {
        let record_type = self.record_type(&resource.type_name)?;
        let remote_id = resource.id.as_deref().ok_or_else(|| {
            Error::Decode(format!("'{}' resource without id", resource.type_name))
        })?;

        let mut record = Record::new(
            record_type.name.clone(),
            self.internal_id(record_type, remote_id),
        );
        if let Some(key) = record_type.key_field() {
            record.keys.insert(key.to_string(), remote_id.to_string());
        }

        for (name, value) in resource.attributes.iter().flatten() {
            if record_type.attribute(name).is_some() {
                record.attributes.insert(name.clone(), value.clone());
            } else {
                skipped.push(format!("{}.{}", record_type.name, name));
            }
        }

        for (name, object) in resource.relationships.iter().flatten() {
            if record_type.relationship(name).is_none() {
                skipped.push(format!("{}.{}", record_type.name, name));
                continue;
            }
            let data = match &object.data {
                None => continue,
                Some(Linkage::One(None)) => RelationshipData::One(None),
                Some(Linkage::One(Some(identifier))) => {
                    RelationshipData::One(Some(self.identity(identifier)?))
                }
                Some(Linkage::Many(identifiers)) => RelationshipData::many(
                    identifiers
                        .iter()
                        .map(|i| self.identity(i))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            record.relationships.insert(name.clone(), data);
        }

        record_type.validate_record(&record)?;
        Ok(record)
    }

    /// Normalize a whole document.
    ///
    /// A resource appearing more than once (say, in `data` and `included`)
    /// yields a single merged record.
    pub fn document(&self, document: &ResourceDocument) -> Result<Normalized> {
        let mut skipped = Vec::new();
        let mut primary = Vec::new();
        let mut records: Vec<Record> = Vec::new();

        for resource in document.data.resources() {
            let record = self.resource(resource, &mut skipped)?;
            primary.push(record.identity());
            push_merged(&mut records, record);
        }
        for resource in document.included.iter().flatten() {
            let record = self.resource(resource, &mut skipped)?;
            push_merged(&mut records, record);
        }

        Ok(Normalized {
            batch: RecordBatch {
                primary,
                records: records.into_iter().map(Arc::new).collect(),
            },
            skipped,
        })
    }
}

fn push_merged(records: &mut Vec<Record>, record: Record) {
    match records.iter_mut().find(|r| r.is(&record.identity())) {
        Some(existing) => *existing = existing.merged(&record),
        None => records.push(record),
    }
}

/// Converts normalized records back into wire resources.
#[derive(Debug, Clone, Copy)]
pub struct Serializer<'a> {
    schema: &'a Schema,
    keymap: &'a KeyMap,
}

impl<'a> Serializer<'a> {
    pub fn new(schema: &'a Schema, keymap: &'a KeyMap) -> Self {
        Self { schema, keymap }
    }

    /// The remote id of a record, if one is known.
    pub fn remote_id(&self, identity: &RecordIdentity) -> Result<Option<String>> {
        let record_type = self.schema.record_type(&identity.type_name)?;
        Ok(match record_type.key_field() {
            Some(_) => self.keymap.remote_id(&identity.type_name, &identity.id),
            None => Some(identity.id.clone()),
        })
    }

    /// The remote id of a record, failing when none is known.
    pub fn require_remote_id(&self, identity: &RecordIdentity) -> Result<String> {
        self.remote_id(identity)?
            .ok_or_else(|| Error::MissingRemoteId(identity.clone()))
    }

    pub fn identifier(&self, identity: &RecordIdentity) -> Result<ResourceIdentifier> {
        Ok(ResourceIdentifier::new(
            identity.type_name.clone(),
            self.require_remote_id(identity)?,
        ))
    }

    pub fn linkage(&self, data: &RelationshipData) -> Result<Linkage> {
        Ok(match data {
            RelationshipData::One(None) => Linkage::One(None),
            RelationshipData::One(Some(identity)) => Linkage::One(Some(self.identifier(identity)?)),
            RelationshipData::Many(identities) => Linkage::Many(
                identities
                    .iter()
                    .map(|i| self.identifier(i))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Serialize a record. The id is omitted when no remote id is known yet.
    pub fn record(&self, record: &Record) -> Result<Resource> {
        let record_type = self.schema.record_type(&record.type_name)?;
        let id = match record_type.key_field() {
            Some(key) => self
                .keymap
                .remote_id(&record.type_name, &record.id)
                .or_else(|| record.key(key).map(str::to_string)),
            None => Some(record.id.clone()),
        };

        let mut resource = Resource::new(record.type_name.clone(), id);
        if !record.attributes.is_empty() {
            resource.attributes = Some(
                record
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }
        if !record.relationships.is_empty() {
            let relationships = record
                .relationships
                .iter()
                .map(|(name, data)| {
                    Ok((
                        name.clone(),
                        RelationshipObject::with_data(self.linkage(data)?),
                    ))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            resource.relationships = Some(relationships);
        }
        Ok(resource)
    }
}
