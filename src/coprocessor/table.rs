//! Table aggregation coprocessor.
//!
//! Groups matched rows by the configured group fields and keeps a bounded
//! sample of rows per group alongside an exact row count. Payload creation
//! partitions the accumulated delta by group and trims the row sample so
//! payload size stays bounded; counts are never trimmed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shard::Row;

/// Default bound on sampled rows carried per group per payload.
pub const DEFAULT_MAX_GROUP_ROWS: usize = 100;

/// Settings for a table coprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSettings {
    /// Stored field names to group by. The group key is the tuple of these
    /// fields' values; an empty list aggregates everything under one root
    /// group.
    pub group_fields: Vec<String>,

    /// Maximum sampled rows retained per group.
    pub max_group_rows: usize,
}

impl TableSettings {
    /// Create settings grouping by the given stored fields.
    pub fn new(group_fields: Vec<String>) -> Self {
        Self {
            group_fields,
            max_group_rows: DEFAULT_MAX_GROUP_ROWS,
        }
    }

    /// Set the per-group sampled row bound.
    pub fn with_max_group_rows(mut self, max: usize) -> Self {
        self.max_group_rows = max;
        self
    }
}

/// The values of the group fields, in settings order.
pub type GroupKey = Vec<String>;

/// One group's contribution within a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableGroup {
    /// Group key values.
    pub key: GroupKey,
    /// Exact number of rows attributed to this group in the delta.
    pub count: u64,
    /// Bounded row sample, kept in row order so trimming is deterministic.
    pub rows: Vec<Row>,
}

/// Partitioned snapshot of a table coprocessor's unsent delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    /// Grouping depth (number of group fields).
    pub depth: usize,
    /// Per-group deltas, ordered by group key.
    pub groups: Vec<TableGroup>,
    /// Per-group row sample bound, carried so merge targets apply the same
    /// trim.
    pub max_group_rows: usize,
}

impl TablePayload {
    /// Merge another payload for the same coprocessor key into this one.
    /// Counts add; row samples union and re-trim, keeping the smallest rows
    /// in row order so the outcome is independent of arrival order.
    pub fn merge(&mut self, incoming: TablePayload) {
        let mut merged: BTreeMap<GroupKey, TableGroup> = BTreeMap::new();
        for group in self.groups.drain(..).chain(incoming.groups) {
            match merged.get_mut(&group.key) {
                Some(existing) => {
                    existing.count += group.count;
                    existing.rows.extend(group.rows);
                }
                None => {
                    merged.insert(group.key.clone(), group);
                }
            }
        }
        for group in merged.values_mut() {
            trim_rows(&mut group.rows, self.max_group_rows);
        }
        self.groups = merged.into_values().collect();
    }

    /// Total row count across groups.
    pub fn total_count(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }
}

/// Sort, dedupe and bound a row sample. Keeping the smallest rows makes the
/// retained sample a function of the full row set, not of arrival order.
pub(crate) fn trim_rows(rows: &mut Vec<Row>, max: usize) {
    rows.sort();
    rows.dedup();
    rows.truncate(max);
}

/// Table aggregation unit for one search on one node.
#[derive(Debug)]
pub struct TableCoprocessor {
    settings: TableSettings,
    /// Indices of the group fields within the task's stored field list.
    group_indices: Vec<usize>,
    /// Unsent per-group deltas.
    pending: BTreeMap<GroupKey, TableGroup>,
}

impl TableCoprocessor {
    /// Create a table coprocessor, resolving group fields against the
    /// task's stored field list. Returns None if a group field is not
    /// stored.
    pub fn new(settings: TableSettings, stored_fields: &[String]) -> Option<Self> {
        let mut group_indices = Vec::with_capacity(settings.group_fields.len());
        for field in &settings.group_fields {
            let index = stored_fields.iter().position(|f| f == field)?;
            group_indices.push(index);
        }
        Some(Self {
            settings,
            group_indices,
            pending: BTreeMap::new(),
        })
    }

    /// Accumulate one matched row. The group's sample re-trims as it
    /// overflows, so the retained rows are the smallest received rather than
    /// the first received.
    pub fn receive(&mut self, row: &Row) {
        let key: GroupKey = self
            .group_indices
            .iter()
            .map(|&i| row.values.get(i).cloned().flatten().unwrap_or_default())
            .collect();

        let group = self.pending.entry(key.clone()).or_insert_with(|| TableGroup {
            key,
            count: 0,
            rows: Vec::new(),
        });
        group.count += 1;
        group.rows.push(row.clone());
        if group.rows.len() > self.settings.max_group_rows {
            trim_rows(&mut group.rows, self.settings.max_group_rows);
        }
    }

    /// Snapshot and clear the unsent delta.
    pub fn create_payload(&mut self) -> Option<TablePayload> {
        if self.pending.is_empty() {
            return None;
        }
        let mut groups: Vec<TableGroup> = std::mem::take(&mut self.pending).into_values().collect();
        for group in &mut groups {
            trim_rows(&mut group.rows, self.settings.max_group_rows);
        }
        Some(TablePayload {
            depth: self.group_indices.len(),
            groups,
            max_group_rows: self.settings.max_group_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(feed: &str, id: &str) -> Row {
        Row::new(vec![Some(feed.to_string()), Some(id.to_string())])
    }

    fn coprocessor(max_group_rows: usize) -> TableCoprocessor {
        let settings =
            TableSettings::new(vec!["Feed".to_string()]).with_max_group_rows(max_group_rows);
        TableCoprocessor::new(settings, &["Feed".to_string(), "EventId".to_string()]).unwrap()
    }

    #[test]
    fn test_grouping_and_counts() {
        let mut c = coprocessor(10);
        c.receive(&row("A", "1"));
        c.receive(&row("A", "2"));
        c.receive(&row("B", "3"));

        let payload = c.create_payload().unwrap();
        assert_eq!(payload.depth, 1);
        assert_eq!(payload.groups.len(), 2);
        assert_eq!(payload.total_count(), 3);

        let a = payload.groups.iter().find(|g| g.key == vec!["A"]).unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(a.rows.len(), 2);
    }

    #[test]
    fn test_payload_drains_delta() {
        let mut c = coprocessor(10);
        c.receive(&row("A", "1"));
        assert!(c.create_payload().is_some());
        // Nothing new accumulated.
        assert!(c.create_payload().is_none());

        c.receive(&row("A", "2"));
        let payload = c.create_payload().unwrap();
        assert_eq!(payload.total_count(), 1);
    }

    #[test]
    fn test_row_sample_trimmed_counts_exact() {
        let mut c = coprocessor(2);
        for i in 0..5 {
            c.receive(&row("A", &i.to_string()));
        }
        let payload = c.create_payload().unwrap();
        let a = &payload.groups[0];
        assert_eq!(a.count, 5);
        assert_eq!(a.rows.len(), 2);
    }

    #[test]
    fn test_row_sample_keeps_smallest_of_all_received() {
        let mut c = coprocessor(2);
        for id in ["9", "8", "3", "7", "1"] {
            c.receive(&row("A", id));
        }

        let payload = c.create_payload().unwrap();
        let a = &payload.groups[0];
        assert_eq!(a.count, 5);
        assert_eq!(a.rows, vec![row("A", "1"), row("A", "3")]);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let make = |ids: &[&str]| {
            let mut c = coprocessor(3);
            for id in ids {
                c.receive(&row("A", id));
            }
            c.create_payload().unwrap()
        };

        let p1 = make(&["5", "6", "7"]);
        let p2 = make(&["1", "2"]);

        let mut forward = p1.clone();
        forward.merge(p2.clone());

        let mut backward = p2;
        backward.merge(p1);

        assert_eq!(forward, backward);
        assert_eq!(forward.total_count(), 5);
        // Trim keeps the smallest rows of the union.
        assert_eq!(forward.groups[0].rows.len(), 3);
    }

    #[test]
    fn test_root_group_with_no_group_fields() {
        let settings = TableSettings::new(vec![]);
        let mut c = TableCoprocessor::new(settings, &["Feed".to_string()]).unwrap();
        c.receive(&row("A", "1"));
        c.receive(&row("B", "2"));

        let payload = c.create_payload().unwrap();
        assert_eq!(payload.depth, 0);
        assert_eq!(payload.groups.len(), 1);
        assert_eq!(payload.groups[0].key, Vec::<String>::new());
        assert_eq!(payload.groups[0].count, 2);
    }
}
