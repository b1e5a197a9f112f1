//! Operation types for expressing changes.
//!
//! Changes are expressed as operations, not direct mutations. Every source
//! understands the same operations, which lets a listener replay an update
//! against another source.

use crate::{FieldName, Record, RecordIdentity};
use serde::{Deserialize, Serialize};

/// An operation that can be applied to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    /// Create a record (or merge into one that already exists).
    AddRecord { record: Record },
    /// Merge a partial record into an existing one.
    UpdateRecord { record: Record },
    /// Remove a record.
    RemoveRecord { record: RecordIdentity },
    /// Replace a single attribute value.
    ReplaceAttribute {
        record: RecordIdentity,
        attribute: FieldName,
        value: serde_json::Value,
    },
    /// Replace a to-one relationship.
    ReplaceRelatedRecord {
        record: RecordIdentity,
        relationship: FieldName,
        related: Option<RecordIdentity>,
    },
    /// Replace a to-many relationship.
    ReplaceRelatedRecords {
        record: RecordIdentity,
        relationship: FieldName,
        related: Vec<RecordIdentity>,
    },
    /// Add members to a to-many relationship.
    AddToRelatedRecords {
        record: RecordIdentity,
        relationship: FieldName,
        related: Vec<RecordIdentity>,
    },
    /// Remove members from a to-many relationship.
    RemoveFromRelatedRecords {
        record: RecordIdentity,
        relationship: FieldName,
        related: Vec<RecordIdentity>,
    },
}

impl Operation {
    pub fn add_record(record: Record) -> Self {
        Operation::AddRecord { record }
    }

    pub fn update_record(record: Record) -> Self {
        Operation::UpdateRecord { record }
    }

    pub fn remove_record(record: RecordIdentity) -> Self {
        Operation::RemoveRecord { record }
    }

    pub fn replace_attribute(
        record: RecordIdentity,
        attribute: impl Into<FieldName>,
        value: serde_json::Value,
    ) -> Self {
        Operation::ReplaceAttribute {
            record,
            attribute: attribute.into(),
            value,
        }
    }

    pub fn replace_related_record(
        record: RecordIdentity,
        relationship: impl Into<FieldName>,
        related: Option<RecordIdentity>,
    ) -> Self {
        Operation::ReplaceRelatedRecord {
            record,
            relationship: relationship.into(),
            related,
        }
    }

    pub fn replace_related_records(
        record: RecordIdentity,
        relationship: impl Into<FieldName>,
        related: Vec<RecordIdentity>,
    ) -> Self {
        Operation::ReplaceRelatedRecords {
            record,
            relationship: relationship.into(),
            related,
        }
    }

    pub fn add_to_related_records(
        record: RecordIdentity,
        relationship: impl Into<FieldName>,
        related: Vec<RecordIdentity>,
    ) -> Self {
        Operation::AddToRelatedRecords {
            record,
            relationship: relationship.into(),
            related,
        }
    }

    pub fn remove_from_related_records(
        record: RecordIdentity,
        relationship: impl Into<FieldName>,
        related: Vec<RecordIdentity>,
    ) -> Self {
        Operation::RemoveFromRelatedRecords {
            record,
            relationship: relationship.into(),
            related,
        }
    }

    /// Get the identity of the record this operation targets.
    pub fn record(&self) -> RecordIdentity {
        match self {
            Operation::AddRecord { record } | Operation::UpdateRecord { record } => {
                record.identity()
            }
            Operation::RemoveRecord { record }
            | Operation::ReplaceAttribute { record, .. }
            | Operation::ReplaceRelatedRecord { record, .. }
            | Operation::ReplaceRelatedRecords { record, .. }
            | Operation::AddToRelatedRecords { record, .. }
            | Operation::RemoveFromRelatedRecords { record, .. } => record.clone(),
        }
    }

    /// The relationship an operation targets, for relationship operations.
    pub fn relationship(&self) -> Option<&str> {
        match self {
            Operation::ReplaceRelatedRecord { relationship, .. }
            | Operation::ReplaceRelatedRecords { relationship, .. }
            | Operation::AddToRelatedRecords { relationship, .. }
            | Operation::RemoveFromRelatedRecords { relationship, .. } => Some(relationship),
            _ => None,
        }
    }

    /// Operation name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddRecord { .. } => "addRecord",
            Operation::UpdateRecord { .. } => "updateRecord",
            Operation::RemoveRecord { .. } => "removeRecord",
            Operation::ReplaceAttribute { .. } => "replaceAttribute",
            Operation::ReplaceRelatedRecord { .. } => "replaceRelatedRecord",
            Operation::ReplaceRelatedRecords { .. } => "replaceRelatedRecords",
            Operation::AddToRelatedRecords { .. } => "addToRelatedRecords",
            Operation::RemoveFromRelatedRecords { .. } => "removeFromRelatedRecords",
        }
    }
}
