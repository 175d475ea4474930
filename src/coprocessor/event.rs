//! Event reference coprocessor.
//!
//! Tracks a bounded window of matched event references. The window honours
//! three limits: maximum distinct streams, maximum events overall and
//! maximum events per stream. Bounds keep the numerically smallest
//! references, so the retained window is a function of the full matched set
//! rather than of arrival order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::shard::Row;

/// Default maximum distinct streams tracked.
pub const DEFAULT_MAX_STREAMS: usize = 1000;
/// Default maximum events tracked overall.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;
/// Default maximum events tracked per stream.
pub const DEFAULT_MAX_EVENTS_PER_STREAM: usize = 1000;

/// Settings for an event coprocessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Stored field holding the stream id.
    pub stream_id_field: String,
    /// Stored field holding the event id.
    pub event_id_field: String,
    /// Maximum distinct streams.
    pub max_streams: usize,
    /// Maximum events overall.
    pub max_events: usize,
    /// Maximum events per stream.
    pub max_events_per_stream: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            stream_id_field: "StreamId".to_string(),
            event_id_field: "EventId".to_string(),
            max_streams: DEFAULT_MAX_STREAMS,
            max_events: DEFAULT_MAX_EVENTS,
            max_events_per_stream: DEFAULT_MAX_EVENTS_PER_STREAM,
        }
    }
}

impl EventSettings {
    /// Set the maximum distinct streams.
    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }

    /// Set the maximum events overall.
    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    /// Set the maximum events per stream.
    pub fn with_max_events_per_stream(mut self, max: usize) -> Self {
        self.max_events_per_stream = max;
        self
    }
}

/// Reference to one matched event within a stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventRef {
    /// Stream the event belongs to.
    pub stream_id: u64,
    /// Event id within the stream.
    pub event_id: u64,
}

impl EventRef {
    /// Create a new event reference.
    pub fn new(stream_id: u64, event_id: u64) -> Self {
        Self {
            stream_id,
            event_id,
        }
    }
}

/// Bounded, ordered snapshot of matched event references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRefsPayload {
    /// Ordered event references.
    pub refs: Vec<EventRef>,
    /// Smallest event reference observed, kept even when trimmed away.
    pub min_event: Option<EventRef>,
    /// Largest event reference observed, kept even when trimmed away.
    pub max_event: Option<EventRef>,
    /// Limits carried so merge targets apply the same bounds.
    pub max_streams: usize,
    /// Maximum events overall.
    pub max_events: usize,
    /// Maximum events per stream.
    pub max_events_per_stream: usize,
}

impl EventRefsPayload {
    /// Merge another payload for the same coprocessor key into this one.
    /// The union is re-bounded, so merging is associative and commutative.
    pub fn merge(&mut self, incoming: EventRefsPayload) {
        let mut refs: BTreeSet<EventRef> = self.refs.iter().copied().collect();
        refs.extend(incoming.refs);

        self.min_event = min_option(self.min_event, incoming.min_event);
        self.max_event = max_option(self.max_event, incoming.max_event);
        self.refs = bound_refs(
            refs,
            self.max_streams,
            self.max_events,
            self.max_events_per_stream,
        );
    }

    /// Number of retained references.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether no references are retained.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

fn min_option(a: Option<EventRef>, b: Option<EventRef>) -> Option<EventRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (x, None) | (None, x) => x,
    }
}

fn max_option(a: Option<EventRef>, b: Option<EventRef>) -> Option<EventRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (x, None) | (None, x) => x,
    }
}

/// Apply the stream/event bounds to an ordered ref set, keeping the
/// smallest references at every level.
fn bound_refs(
    refs: BTreeSet<EventRef>,
    max_streams: usize,
    max_events: usize,
    max_events_per_stream: usize,
) -> Vec<EventRef> {
    let mut by_stream: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for r in refs {
        by_stream.entry(r.stream_id).or_default().push(r.event_id);
    }

    let mut out = Vec::new();
    for (stream_id, events) in by_stream.into_iter().take(max_streams) {
        for event_id in events.into_iter().take(max_events_per_stream) {
            out.push(EventRef::new(stream_id, event_id));
        }
    }
    out.truncate(max_events);
    out
}

/// Event reference aggregation unit for one search on one node.
#[derive(Debug)]
pub struct EventCoprocessor {
    settings: EventSettings,
    stream_id_index: usize,
    event_id_index: usize,
    /// Unsent references.
    pending: BTreeSet<EventRef>,
    min_event: Option<EventRef>,
    max_event: Option<EventRef>,
}

impl EventCoprocessor {
    /// Create an event coprocessor, resolving id fields against the task's
    /// stored field list. Returns None if either id field is not stored.
    pub fn new(settings: EventSettings, stored_fields: &[String]) -> Option<Self> {
        let stream_id_index = stored_fields
            .iter()
            .position(|f| f == &settings.stream_id_field)?;
        let event_id_index = stored_fields
            .iter()
            .position(|f| f == &settings.event_id_field)?;
        Some(Self {
            settings,
            stream_id_index,
            event_id_index,
            pending: BTreeSet::new(),
            min_event: None,
            max_event: None,
        })
    }

    /// Accumulate one matched row. Rows whose id fields are missing or not
    /// numeric are skipped.
    pub fn receive(&mut self, row: &Row) {
        let Some(stream_id) = parse_id(row, self.stream_id_index) else {
            return;
        };
        let Some(event_id) = parse_id(row, self.event_id_index) else {
            return;
        };

        let event_ref = EventRef::new(stream_id, event_id);
        self.min_event = min_option(self.min_event, Some(event_ref));
        self.max_event = max_option(self.max_event, Some(event_ref));
        if self.pending.len() < self.settings.max_events {
            self.pending.insert(event_ref);
        }
    }

    /// Snapshot and clear the unsent references.
    pub fn create_payload(&mut self) -> Option<EventRefsPayload> {
        if self.pending.is_empty() {
            return None;
        }
        let refs = bound_refs(
            std::mem::take(&mut self.pending),
            self.settings.max_streams,
            self.settings.max_events,
            self.settings.max_events_per_stream,
        );
        Some(EventRefsPayload {
            refs,
            min_event: self.min_event,
            max_event: self.max_event,
            max_streams: self.settings.max_streams,
            max_events: self.settings.max_events,
            max_events_per_stream: self.settings.max_events_per_stream,
        })
    }
}

fn parse_id(row: &Row, index: usize) -> Option<u64> {
    row.values.get(index)?.as_ref()?.parse().ok()
}
