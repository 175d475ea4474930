//! Per-search aggregation units.
//!
//! A coprocessor consumes raw matched rows on the node that searched them
//! and accumulates mergeable intermediate state. At the configured send
//! frequency the accumulated-but-unsent state is snapshotted into a
//! serializable [`Payload`] and forwarded to the requesting node, where
//! payloads for the same [`CoprocessorKey`] are merged into the result
//! store. Payload merging is associative and commutative, so arrival order
//! across nodes and sends does not change the final merged result.

pub mod event;
pub mod table;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shard::Row;

pub use event::{EventCoprocessor, EventRef, EventRefsPayload, EventSettings};
pub use table::{TableCoprocessor, TableGroup, TablePayload, TableSettings};

/// Identifies one aggregation unit within a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoprocessorKey(pub u64);

/// Configuration for one aggregation unit, fixed for the lifetime of the
/// search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoprocessorSettings {
    /// Grouped/aggregated table results.
    Table(TableSettings),
    /// Bounded window of matched event references.
    Event(EventSettings),
}

/// A serializable snapshot of a coprocessor's accumulated-but-not-yet-merged
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Partitioned table rows and group counts.
    Table(TablePayload),
    /// A bounded set of matched event references.
    Events(EventRefsPayload),
}

/// A per-search, per-node aggregation unit.
#[derive(Debug)]
pub enum Coprocessor {
    /// Table aggregation.
    Table(TableCoprocessor),
    /// Event reference aggregation.
    Event(EventCoprocessor),
}

impl Coprocessor {
    /// Consume one matched row.
    pub fn receive(&mut self, row: &Row) {
        match self {
            Coprocessor::Table(c) => c.receive(row),
            Coprocessor::Event(c) => c.receive(row),
        }
    }

    /// Snapshot and drain the accumulated-but-unsent state. Returns None
    /// when nothing has accumulated since the last call; safe to call
    /// repeatedly.
    pub fn create_payload(&mut self) -> Option<Payload> {
        match self {
            Coprocessor::Table(c) => c.create_payload().map(Payload::Table),
            Coprocessor::Event(c) => c.create_payload().map(Payload::Events),
        }
    }
}

/// Builds the coprocessor set for one node's search task.
pub struct CoprocessorsFactory;

impl CoprocessorsFactory {
    /// Create a coprocessor for each settings entry. Settings whose fields
    /// cannot be resolved against the task's stored field list yield no
    /// coprocessor; an empty result makes the owning task a no-op.
    pub fn create_all(
        settings: &HashMap<CoprocessorKey, CoprocessorSettings>,
        stored_fields: &[String],
    ) -> Vec<(CoprocessorKey, Coprocessor)> {
        let mut coprocessors = Vec::new();
        for (key, settings) in settings {
            if let Some(coprocessor) = Self::create(settings, stored_fields) {
                coprocessors.push((*key, coprocessor));
            }
        }
        // Stable iteration order for tests and logs.
        coprocessors.sort_by_key(|(key, _)| *key);
        coprocessors
    }

    fn create(settings: &CoprocessorSettings, stored_fields: &[String]) -> Option<Coprocessor> {
        match settings {
            CoprocessorSettings::Table(table) => {
                TableCoprocessor::new(table.clone(), stored_fields).map(Coprocessor::Table)
            }
            CoprocessorSettings::Event(event) => {
                EventCoprocessor::new(event.clone(), stored_fields).map(Coprocessor::Event)
            }
        }
    }
}

/// Merge a payload into an existing payload of the same key.
///
/// Used by tests to demonstrate order independence; the production merge
/// path goes through the result store, which applies the same group/ref
/// arithmetic.
pub fn merge_payloads(target: &mut Payload, incoming: Payload) {
    match (target, incoming) {
        (Payload::Table(target), Payload::Table(incoming)) => target.merge(incoming),
        (Payload::Events(target), Payload::Events(incoming)) => target.merge(incoming),
        _ => {
            // Payloads for one key always share a variant; a mismatch means
            // the settings map changed mid-search, which is not supported.
            log::warn!("Discarding payload with mismatched variant");
        }
    }
}
