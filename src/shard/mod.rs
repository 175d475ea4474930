//! Index shards and shard documents.
//!
//! A shard is an independently searchable partition of an index's documents,
//! assigned to exactly one node. How shards are physically stored is outside
//! this crate's scope; here a shard is an in-memory document collection plus
//! the catalogued document count recorded when the shard was written.

pub mod searcher;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::FieldValue;

pub use searcher::{IndexShardSearcher, RowReceiver, ShardSearchExecutor, ShardSearchOutcome};

/// Identifies one index shard.
pub type ShardId = u64;

/// One matched document's stored field values, ordered by the search task's
/// stored field list.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Row {
    /// Stored values; None where the document has no value for the field.
    pub values: Vec<Option<String>>,
}

impl Row {
    /// Create a row from stored values.
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }
}

/// A document held in a shard, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardDocument {
    values: HashMap<String, FieldValue>,
}

impl ShardDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field value.
    pub fn with_field<S: Into<String>>(mut self, name: S, value: FieldValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Get a field value.
    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// The field's value as an i64 if it is numeric or a date.
    pub fn long_value(&self, field: &str) -> Option<i64> {
        match self.values.get(field)? {
            FieldValue::Long(v) | FieldValue::Date(v) => Some(*v),
            FieldValue::Text(v) => v.parse().ok(),
        }
    }

    /// Word tokens of the field's value. Non-text values yield their string
    /// rendering as a single token.
    pub fn text_tokens(&self, field: &str) -> impl Iterator<Item = String> + '_ {
        let tokens: Vec<String> = match self.values.get(field) {
            Some(FieldValue::Text(v)) => v
                .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Some(other) => vec![other.as_stored_string()],
            None => Vec::new(),
        };
        tokens.into_iter()
    }

    /// Project the document onto a stored field list, producing a row.
    pub fn project(&self, stored_fields: &[String]) -> Row {
        Row::new(
            stored_fields
                .iter()
                .map(|f| self.values.get(f).map(FieldValue::as_stored_string))
                .collect(),
        )
    }
}

/// An in-memory index shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexShard {
    /// Shard id, unique across the cluster.
    pub id: ShardId,
    /// The shard's documents.
    pub documents: Vec<ShardDocument>,
    /// Document count recorded in the shard catalogue. A mismatch with the
    /// actual count is reported as a warning, never an error.
    pub catalogued_doc_count: usize,
    /// Whether the shard failed its integrity check when opened.
    pub corrupt: bool,
}

impl IndexShard {
    /// Create a healthy shard from documents.
    pub fn new(id: ShardId, documents: Vec<ShardDocument>) -> Self {
        let catalogued_doc_count = documents.len();
        Self {
            id,
            documents,
            catalogued_doc_count,
            corrupt: false,
        }
    }

    /// Override the catalogued document count.
    pub fn with_catalogued_doc_count(mut self, count: usize) -> Self {
        self.catalogued_doc_count = count;
        self
    }

    /// Mark the shard corrupt.
    pub fn with_corrupt(mut self, corrupt: bool) -> Self {
        self.corrupt = corrupt;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_order_follows_stored_fields() {
        let doc = ShardDocument::new()
            .with_field("Feed", FieldValue::Text("TEST".to_string()))
            .with_field("EventId", FieldValue::Long(7));

        let row = doc.project(&[
            "EventId".to_string(),
            "Feed".to_string(),
            "Missing".to_string(),
        ]);
        assert_eq!(
            row.values,
            vec![Some("7".to_string()), Some("TEST".to_string()), None]
        );
    }

    #[test]
    fn test_text_tokens() {
        let doc = ShardDocument::new()
            .with_field("Description", FieldValue::Text("User login, failed!".to_string()));
        let tokens: Vec<String> = doc.text_tokens("Description").collect();
        assert_eq!(tokens, vec!["User", "login", "failed"]);
    }

    #[test]
    fn test_long_value_parses_text() {
        let doc = ShardDocument::new().with_field("Id", FieldValue::Text("42".to_string()));
        assert_eq!(doc.long_value("Id"), Some(42));
    }
}
