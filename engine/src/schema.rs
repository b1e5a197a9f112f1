//! Schema definition and derivation.
//!
//! Model descriptions are explicit, ordered lists of field declarations built
//! with [`ModelDescription`]'s builder methods (or loaded from JSON). The
//! deriver turns a set of them into a [`Schema`]: a registry of
//! [`RecordType`]s used to validate records and to resolve remote resource
//! types.

use crate::{
    error::{Result, SchemaError},
    Error, FieldName, Record, RelationshipData, TypeName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Attribute value types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

impl FieldType {
    /// Check a JSON value against this type. `null` is always accepted.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            _ if value.is_null() => true,
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        }
    }
}

/// The kind of a declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldKind {
    /// External identifier used by the remote source.
    Key,
    /// Scalar attribute.
    Attribute {
        #[serde(rename = "valueType")]
        value_type: FieldType,
    },
    /// To-one relation.
    HasOne {
        #[serde(rename = "relatedType")]
        related_type: TypeName,
    },
    /// To-many relation.
    HasMany {
        #[serde(rename = "relatedType")]
        related_type: TypeName,
    },
}

/// Definition of a field in a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: FieldName,
    /// Field kind
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDef {
    /// Create a key field definition.
    pub fn key(name: impl Into<FieldName>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Key,
        }
    }

    /// Create an attribute field definition.
    pub fn attr(name: impl Into<FieldName>, value_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute { value_type },
        }
    }

    /// Create a to-one relation definition.
    pub fn has_one(name: impl Into<FieldName>, related_type: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::HasOne {
                related_type: related_type.into(),
            },
        }
    }

    /// Create a to-many relation definition.
    pub fn has_many(name: impl Into<FieldName>, related_type: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::HasMany {
                related_type: related_type.into(),
            },
        }
    }

    /// The related type, for relation fields.
    pub fn related_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::HasOne { related_type } | FieldKind::HasMany { related_type } => {
                Some(related_type)
            }
            _ => None,
        }
    }

    /// Validate an attribute value against this field definition.
    pub fn validate_value(&self, value: &serde_json::Value) -> Result<()> {
        let FieldKind::Attribute { value_type } = &self.kind else {
            return Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: "attribute".into(),
                got: "relationship or key".into(),
            });
        };

        if value_type.accepts(value) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: value_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }

    /// Validate relationship data against this field definition.
    pub fn validate_relationship(&self, data: &RelationshipData) -> Result<()> {
        let related = match (&self.kind, data) {
            (FieldKind::HasOne { related_type }, RelationshipData::One(_))
            | (FieldKind::HasMany { related_type }, RelationshipData::Many(_)) => related_type,
            (FieldKind::HasOne { .. }, _) | (FieldKind::HasMany { .. }, _) => {
                return Err(Error::CardinalityMismatch {
                    field: self.name.clone(),
                })
            }
            _ => {
                return Err(Error::TypeMismatch {
                    field: self.name.clone(),
                    expected: "relationship".into(),
                    got: "attribute or key".into(),
                })
            }
        };

        match data.identities().find(|i| &i.type_name != related) {
            Some(wrong) => Err(Error::RelatedTypeMismatch {
                field: self.name.clone(),
                expected: related.clone(),
                got: wrong.type_name.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// An ordered description of a model's fields.
///
/// ```rust
/// use tether_engine::{FieldType, ModelDescription};
///
/// let planet = ModelDescription::new()
///     .key("remoteId")
///     .attr("name", FieldType::String)
///     .has_many("moons", "moon");
/// assert_eq!(planet.fields.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Collection name used in remote paths; derived from the type name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Declared fields, in declaration order
    pub fields: Vec<FieldDef>,
}

impl ModelDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn key(self, name: impl Into<FieldName>) -> Self {
        self.field(FieldDef::key(name))
    }

    pub fn attr(self, name: impl Into<FieldName>, value_type: FieldType) -> Self {
        self.field(FieldDef::attr(name, value_type))
    }

    pub fn has_one(self, name: impl Into<FieldName>, related: impl Into<TypeName>) -> Self {
        self.field(FieldDef::has_one(name, related))
    }

    pub fn has_many(self, name: impl Into<FieldName>, related: impl Into<TypeName>) -> Self {
        self.field(FieldDef::has_many(name, related))
    }

    /// Override the plural collection name.
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }
}

/// A named model description, the shape used in schema files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    pub name: TypeName,
    #[serde(flatten)]
    pub model: ModelDescription,
}

/// A derived record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    /// Type name
    pub name: TypeName,
    /// Plural collection name
    pub plural: String,
    /// Field definitions in declaration order
    pub fields: Vec<FieldDef>,
}

impl RecordType {
    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the key field, if the type declares one.
    pub fn key_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::Key)
            .map(|f| f.name.as_str())
    }

    /// Get an attribute's value type.
    pub fn attribute(&self, name: &str) -> Option<FieldType> {
        match self.field(name).map(|f| &f.kind) {
            Some(FieldKind::Attribute { value_type }) => Some(*value_type),
            _ => None,
        }
    }

    /// Get a relation field definition.
    pub fn relationship(&self, name: &str) -> Option<&FieldDef> {
        self.field(name).filter(|f| f.related_type().is_some())
    }

    fn unknown_field(&self, field: &str) -> Error {
        Error::UnknownField {
            type_name: self.name.clone(),
            field: field.to_string(),
        }
    }

    /// Validate a record's keys, attributes and relationships.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        for name in record.keys.keys() {
            if self.key_field() != Some(name.as_str()) {
                return Err(self.unknown_field(name));
            }
        }

        for (name, value) in &record.attributes {
            let field = self
                .field(name)
                .filter(|f| matches!(f.kind, FieldKind::Attribute { .. }))
                .ok_or_else(|| self.unknown_field(name))?;
            field.validate_value(value)?;
        }

        for (name, data) in &record.relationships {
            let field = self
                .relationship(name)
                .ok_or_else(|| self.unknown_field(name))?;
            field.validate_relationship(data)?;
        }

        Ok(())
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            plural: Some(self.plural.clone()),
            fields: self.fields.clone(),
        }
    }
}

/// Naive English pluralization for collection paths.
pub fn pluralize(word: &str) -> String {
    let consonant_y = word.len() > 1
        && word.ends_with('y')
        && !word[..word.len() - 1].ends_with(&['a', 'e', 'i', 'o', 'u'][..]);

    if consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Registry of record types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<TypeName, RecordType>,
}

impl Schema {
    /// Derive a schema from named model descriptions.
    ///
    /// Fails if a type name is repeated, a type repeats a field name or
    /// declares more than one key, or a relation names an undeclared type.
    pub fn derive<I, N>(models: I) -> std::result::Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (N, ModelDescription)>,
        N: Into<TypeName>,
    {
        let models: Vec<(TypeName, ModelDescription)> =
            models.into_iter().map(|(n, m)| (n.into(), m)).collect();

        let mut declared = HashSet::new();
        for (name, _) in &models {
            if !declared.insert(name.as_str()) {
                return Err(SchemaError::DuplicateType {
                    type_name: name.clone(),
                });
            }
        }

        let mut types = BTreeMap::new();
        for (name, model) in &models {
            let mut seen = HashSet::new();
            let mut keys = 0;

            for field in &model.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        type_name: name.clone(),
                        field: field.name.clone(),
                    });
                }
                if field.kind == FieldKind::Key {
                    keys += 1;
                }
                if let Some(related) = field.related_type() {
                    if !declared.contains(related) {
                        return Err(SchemaError::UnknownRelatedType {
                            type_name: name.clone(),
                            field: field.name.clone(),
                            related: related.to_string(),
                        });
                    }
                }
            }

            if keys > 1 {
                return Err(SchemaError::MultipleKeys {
                    type_name: name.clone(),
                });
            }

            let record_type = RecordType {
                name: name.clone(),
                plural: model.plural.clone().unwrap_or_else(|| pluralize(name)),
                fields: model.fields.clone(),
            };
            types.insert(name.clone(), record_type);
        }

        Ok(Self { types })
    }

    /// Derive a schema from the file format (a list of named descriptions).
    pub fn from_descriptions(
        descriptions: Vec<TypeDescription>,
    ) -> std::result::Result<Self, SchemaError> {
        Self::derive(descriptions.into_iter().map(|d| (d.name, d.model)))
    }

    /// The schema's own description; deriving from it yields an equal schema.
    pub fn describe(&self) -> Vec<(TypeName, ModelDescription)> {
        self.types
            .values()
            .map(|t| (t.name.clone(), t.describe()))
            .collect()
    }

    /// Get a record type by exact name.
    pub fn get(&self, name: &str) -> Option<&RecordType> {
        self.types.get(name)
    }

    /// Get a record type, failing with [`Error::UnknownType`].
    pub fn record_type(&self, name: &str) -> Result<&RecordType> {
        self.get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Resolve a wire type name, which may be singular or plural.
    pub fn resolve_type(&self, name: &str) -> Option<&RecordType> {
        self.get(name)
            .or_else(|| self.types.values().find(|t| t.plural == name))
    }

    /// All record types, ordered by name.
    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    /// Validate a record against its type.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        self.record_type(&record.type_name)?.validate_record(record)
    }
}
