//! Index field schema.
//!
//! Field metadata is immutable and sourced from an index's schema. The
//! schema decides which conditions are legal for a field and how stored
//! values are typed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expression::Condition;

/// The type of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Identifier field, indexed as an exact numeric id.
    Id,
    /// Free text field.
    Text,
    /// Numeric field (64-bit signed).
    Numeric,
    /// Date field, stored as epoch milliseconds.
    Date,
}

impl FieldType {
    /// Human readable name used in validation error messages.
    pub fn display_value(&self) -> &'static str {
        match self {
            FieldType::Id => "Id",
            FieldType::Text => "Text",
            FieldType::Numeric => "Number",
            FieldType::Date => "Date",
        }
    }

    /// Whether values of this type are compared numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Id | FieldType::Numeric)
    }
}

/// Metadata describing one index field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Whether values are stored and can be read back from matches.
    pub stored: bool,
    /// Whether the field is indexed and can be queried.
    pub indexed: bool,
    /// Whether text matching is case sensitive.
    pub case_sensitive: bool,
}

impl IndexField {
    /// Create a stored, indexed, case insensitive field.
    pub fn new<S: Into<String>>(name: S, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            stored: true,
            indexed: true,
            case_sensitive: false,
        }
    }

    /// Create a text field.
    pub fn text<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Create a numeric field.
    pub fn numeric<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Numeric)
    }

    /// Create a date field.
    pub fn date<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Date)
    }

    /// Create an id field.
    pub fn id<S: Into<String>>(name: S) -> Self {
        Self::new(name, FieldType::Id)
    }

    /// Mark the field case sensitive.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Mark the field as not stored.
    pub fn with_stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Whether this field's type supports the given condition.
    pub fn supports_condition(&self, condition: Condition) -> bool {
        match self.field_type {
            FieldType::Text => matches!(
                condition,
                Condition::Equals
                    | Condition::Contains
                    | Condition::In
                    | Condition::InDictionary
            ),
            // Numeric, id and date fields support the full comparison set.
            _ => true,
        }
    }
}

/// Immutable map of field name to field metadata for one index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSchema {
    fields: HashMap<String, IndexField>,
}

impl IndexSchema {
    /// Create a schema from a list of fields.
    pub fn new(fields: Vec<IndexField>) -> Self {
        let fields = fields.into_iter().map(|f| (f.name.clone(), f)).collect();
        Self { fields }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&IndexField> {
        self.fields.get(name)
    }

    /// Number of fields in the schema.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A typed stored value in a shard document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text value.
    Text(String),
    /// Numeric value.
    Long(i64),
    /// Date value as epoch milliseconds.
    Date(i64),
}

impl FieldValue {
    /// The value rendered as a stored string for row extraction.
    pub fn as_stored_string(&self) -> String {
        match self {
            FieldValue::Text(v) => v.clone(),
            FieldValue::Long(v) => v.to_string(),
            FieldValue::Date(v) => v.to_string(),
        }
    }

    /// The value as an i64 if it is numeric or a date.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            FieldValue::Long(v) | FieldValue::Date(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}
