//! Merged search results on the coordinating node.
//!
//! The result store receives drained node payloads and folds them into one
//! merged payload per aggregation unit. Merging reuses the payload
//! arithmetic, so the stored result is independent of which node sent what
//! and in which order. Pollers block on the store's condition variable and
//! wake on any change or on completion; reads take a trimmed snapshot so a
//! client never sees more rows per component than the configured bound.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::coprocessor::{CoprocessorKey, Payload, merge_payloads};

struct StoreInner {
    data: HashMap<CoprocessorKey, Payload>,
    complete: bool,
    /// Bumped on every mutation so pollers can detect changes.
    version: u64,
}

/// Accumulates merged payloads for one search.
pub struct ResultStore {
    inner: Mutex<StoreInner>,
    condvar: Condvar,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// Create an empty, incomplete store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                data: HashMap::new(),
                complete: false,
                version: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Fold a batch of node payloads into the store and wake pollers.
    pub fn add_payloads(&self, payloads: HashMap<CoprocessorKey, Payload>) {
        if payloads.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for (key, payload) in payloads {
            match inner.data.entry(key) {
                Entry::Occupied(mut existing) => merge_payloads(existing.get_mut(), payload),
                Entry::Vacant(slot) => {
                    slot.insert(payload);
                }
            }
        }
        inner.version += 1;
        self.condvar.notify_all();
    }

    /// Mark the search complete and wake pollers. Idempotent; payloads that
    /// arrive after completion are still merged (a node's final batch may
    /// race the last completion check).
    pub fn set_complete(&self) {
        let mut inner = self.inner.lock();
        if !inner.complete {
            debug!("Result store complete after {} change(s)", inner.version);
            inner.complete = true;
            inner.version += 1;
            self.condvar.notify_all();
        }
    }

    /// Whether the search has completed.
    pub fn is_complete(&self) -> bool {
        self.inner.lock().complete
    }

    /// Block until the store completes, changes, or the timeout elapses.
    /// Returns the completion state on wake.
    pub fn wait_for_change(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let seen = inner.version;
        while !inner.complete && inner.version == seen {
            if self.condvar.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.complete
    }

    /// A trimmed copy of the merged payloads. Table components keep at most
    /// `max_results` groups; event components keep at most `max_results`
    /// references. Counts and range markers are never trimmed.
    pub fn snapshot(&self, max_results: usize) -> HashMap<CoprocessorKey, Payload> {
        let inner = self.inner.lock();
        inner
            .data
            .iter()
            .map(|(key, payload)| {
                let mut payload = payload.clone();
                trim_payload(&mut payload, max_results);
                (*key, payload)
            })
            .collect()
    }
}

fn trim_payload(payload: &mut Payload, max_results: usize) {
    match payload {
        // Group lists are ordered by key and per-group row samples are
        // already bounded, so truncation alone is deterministic.
        Payload::Table(table) => table.groups.truncate(max_results),
        Payload::Events(events) => events.refs.truncate(max_results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coprocessor::{TableGroup, TablePayload};
    use crate::shard::Row;
    use std::sync::Arc;
    use std::thread;

    fn table_payload(key: &str, count: u64) -> Payload {
        Payload::Table(TablePayload {
            depth: 1,
            groups: vec![TableGroup {
                key: vec![key.to_string()],
                count,
                rows: vec![Row::new(vec![Some(key.to_string())])],
            }],
            max_group_rows: 10,
        })
    }

    #[test]
    fn test_payloads_merge_across_batches() {
        let store = ResultStore::new();
        store.add_payloads(HashMap::from([(CoprocessorKey(1), table_payload("A", 2))]));
        store.add_payloads(HashMap::from([(CoprocessorKey(1), table_payload("A", 3))]));

        let snapshot = store.snapshot(100);
        let Payload::Table(table) = &snapshot[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(table.total_count(), 5);
        assert_eq!(table.groups.len(), 1);
    }

    #[test]
    fn test_snapshot_trims_groups() {
        let store = ResultStore::new();
        for i in 0..5 {
            store.add_payloads(HashMap::from([(
                CoprocessorKey(1),
                table_payload(&format!("G{i}"), 1),
            )]));
        }

        let snapshot = store.snapshot(3);
        let Payload::Table(table) = &snapshot[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(table.groups.len(), 3);
        // The untrimmed store is unchanged.
        let Payload::Table(full) = &store.snapshot(100)[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(full.groups.len(), 5);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let store = Arc::new(ResultStore::new());
        let waiter = Arc::clone(&store);
        let handle = thread::spawn(move || waiter.wait_for_change(Duration::from_secs(10)));

        // Give the waiter a moment to block, then complete.
        thread::sleep(Duration::from_millis(20));
        store.set_complete();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_times_out_incomplete() {
        let store = ResultStore::new();
        assert!(!store.wait_for_change(Duration::from_millis(10)));
    }

    #[test]
    fn test_payloads_accepted_after_completion() {
        let store = ResultStore::new();
        store.set_complete();
        store.add_payloads(HashMap::from([(CoprocessorKey(1), table_payload("A", 1))]));
        assert!(store.is_complete());
        assert_eq!(store.snapshot(10).len(), 1);
    }
}
