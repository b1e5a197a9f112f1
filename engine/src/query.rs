//! Query expressions shared by every source.

use crate::{FieldName, Record, RecordIdentity, TypeName};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison used by an attribute filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Equal,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    /// Wire prefix for non-equality filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equal => "equal",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        }
    }
}

/// Attribute filter: `attribute <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub attribute: FieldName,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl FieldFilter {
    pub fn new(attribute: impl Into<FieldName>, op: FilterOp, value: serde_json::Value) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    pub fn equal(attribute: impl Into<FieldName>, value: serde_json::Value) -> Self {
        Self::new(attribute, FilterOp::Equal, value)
    }

    /// Check a record against this filter. Missing attributes never match.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.attribute(&self.attribute) else {
            return false;
        };
        match self.op {
            FilterOp::Equal => actual == &self.value,
            op => match compare_values(actual, &self.value) {
                Some(ordering) => match op {
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Gte => ordering != Ordering::Less,
                    FilterOp::Lt => ordering == Ordering::Less,
                    FilterOp::Lte => ordering != Ordering::Greater,
                    FilterOp::Equal => ordering == Ordering::Equal,
                },
                None => false,
            },
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort criterion on an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub attribute: FieldName,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(attribute: impl Into<FieldName>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<FieldName>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }

    /// Wire form: `name` or `-name`.
    pub fn to_param(&self) -> String {
        match self.order {
            SortOrder::Ascending => self.attribute.clone(),
            SortOrder::Descending => format!("-{}", self.attribute),
        }
    }
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A query expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueryExpr {
    /// A single record by identity.
    FindRecord { record: RecordIdentity },
    /// Records of a type, optionally filtered, sorted and paged.
    #[serde(rename_all = "camelCase")]
    FindRecords {
        #[serde(rename = "type")]
        type_name: TypeName,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        filter: Vec<FieldFilter>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sort: Vec<SortSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<Page>,
    },
    /// The record on the other end of a to-one relationship.
    FindRelatedRecord {
        record: RecordIdentity,
        relationship: FieldName,
    },
    /// The records on the other end of a to-many relationship.
    FindRelatedRecords {
        record: RecordIdentity,
        relationship: FieldName,
    },
}

impl QueryExpr {
    pub fn find_record(record: RecordIdentity) -> Self {
        QueryExpr::FindRecord { record }
    }

    pub fn find_records(type_name: impl Into<TypeName>) -> Self {
        QueryExpr::FindRecords {
            type_name: type_name.into(),
            filter: Vec::new(),
            sort: Vec::new(),
            page: None,
        }
    }

    pub fn find_related_record(record: RecordIdentity, relationship: impl Into<FieldName>) -> Self {
        QueryExpr::FindRelatedRecord {
            record,
            relationship: relationship.into(),
        }
    }

    pub fn find_related_records(
        record: RecordIdentity,
        relationship: impl Into<FieldName>,
    ) -> Self {
        QueryExpr::FindRelatedRecords {
            record,
            relationship: relationship.into(),
        }
    }

    /// Add a filter to a `FindRecords` expression; other variants are unchanged.
    pub fn filter(mut self, filter: FieldFilter) -> Self {
        if let QueryExpr::FindRecords { filter: filters, .. } = &mut self {
            filters.push(filter);
        }
        self
    }

    /// Add a sort criterion to a `FindRecords` expression.
    pub fn sort(mut self, spec: SortSpec) -> Self {
        if let QueryExpr::FindRecords { sort, .. } = &mut self {
            sort.push(spec);
        }
        self
    }

    /// Page a `FindRecords` expression.
    pub fn page(mut self, offset: usize, limit: Option<usize>) -> Self {
        if let QueryExpr::FindRecords { page, .. } = &mut self {
            *page = Some(Page { offset, limit });
        }
        self
    }

    /// The record type the expression's results belong to, when known
    /// without a schema.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            QueryExpr::FindRecord { record } => Some(&record.type_name),
            QueryExpr::FindRecords { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

/// Order two JSON values of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Compare two records by a list of sort criteria. Records missing an
/// attribute sort after those that have it.
pub fn compare_records(a: &Record, b: &Record, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ordering = match (a.attribute(&spec.attribute), b.attribute(&spec.attribute)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match spec.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
