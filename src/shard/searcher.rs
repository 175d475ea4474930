//! Local shard search execution.
//!
//! The executor runs one search task's shard list on a thread pool. Each
//! shard searcher iterates matching documents and emits one row per match
//! into a bounded row channel; a full channel blocks the searching thread
//! until the consumer drains it, which bounds memory during very large
//! matches. A corrupt shard is reported as a per-shard error and the
//! remaining shards are still searched. The termination token is observed
//! between documents so cancellation takes effect within one unit of work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cluster::task::TerminationToken;
use crate::error::{FathomError, Result};
use crate::query::IndexQuery;
use crate::shard::{IndexShard, Row};

/// The receiving end of the row pipeline: shard search produces rows,
/// the task handler drains them into the coprocessors.
pub type RowReceiver = Sender<Row>;

/// Aggregated outcome of searching one task's shard list.
#[derive(Debug)]
pub struct ShardSearchOutcome {
    /// Total matching documents across all searched shards.
    pub hit_count: u64,
    /// Per-shard errors, attributed but non-fatal.
    pub errors: Vec<String>,
}

/// Searches a single shard, streaming matches to the row receiver.
pub struct IndexShardSearcher {
    shard: Arc<IndexShard>,
}

impl IndexShardSearcher {
    /// Open a searcher over a shard.
    pub fn new(shard: Arc<IndexShard>) -> Self {
        Self { shard }
    }

    /// Run the query over the shard, emitting one row per match.
    pub fn search(
        &self,
        query: &IndexQuery,
        stored_fields: &[String],
        receiver: &RowReceiver,
        termination: &TerminationToken,
        hit_count: &AtomicU64,
    ) -> Result<()> {
        if self.shard.corrupt {
            return Err(FathomError::shard(format!(
                "Shard {} is corrupt and cannot be searched",
                self.shard.id
            )));
        }

        let actual = self.shard.documents.len();
        if actual != self.shard.catalogued_doc_count {
            warn!(
                "Shard {} document count mismatch: catalogue says {}, index holds {}",
                self.shard.id, self.shard.catalogued_doc_count, actual
            );
        }

        for doc in &self.shard.documents {
            if termination.is_terminated() {
                return Err(FathomError::cancelled("Shard search terminated"));
            }

            if query.matches(doc) {
                hit_count.fetch_add(1, Ordering::Relaxed);
                // A full channel blocks here until rows are drained; a
                // disconnected channel means the consumer has gone away.
                if receiver.send(doc.project(stored_fields)).is_err() {
                    return Err(FathomError::cancelled("Row receiver has shut down"));
                }
            }
        }

        debug!("Searched shard {} ({actual} documents)", self.shard.id);
        Ok(())
    }
}

/// Runs shard searches for one task on a dedicated thread pool.
pub struct ShardSearchExecutor {
    thread_pool: ThreadPool,
}

impl ShardSearchExecutor {
    /// Create an executor with the given pool size.
    pub fn new(threads: usize) -> Result<Self> {
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shard-search-{i}"))
            .build()
            .map_err(|e| FathomError::other(format!("Failed to create thread pool: {e}")))?;
        Ok(Self { thread_pool })
    }

    /// Search every shard in the list, blocking until all shard searches
    /// have finished or observed termination. Per-shard failures are
    /// collected into the outcome; termination is not reported as an error.
    pub fn search(
        &self,
        shards: &[Arc<IndexShard>],
        query: &IndexQuery,
        stored_fields: &[String],
        receiver: RowReceiver,
        termination: &TerminationToken,
    ) -> ShardSearchOutcome {
        let hit_count = AtomicU64::new(0);
        let errors: Mutex<Vec<String>> = Mutex::new(Vec::new());

        self.thread_pool.scope(|scope| {
            for shard in shards {
                let shard = Arc::clone(shard);
                let receiver = receiver.clone();
                let hit_count = &hit_count;
                let errors = &errors;
                scope.spawn(move |_| {
                    let searcher = IndexShardSearcher::new(shard);
                    if let Err(e) =
                        searcher.search(query, stored_fields, &receiver, termination, hit_count)
                    {
                        if !e.is_cancelled() {
                            errors.lock().push(e.to_string());
                        }
                    }
                });
            }
        });

        ShardSearchOutcome {
            hit_count: hit_count.load(Ordering::Relaxed),
            errors: errors.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;
    use crate::shard::ShardDocument;
    use crossbeam_channel::bounded;

    fn doc(id: i64) -> ShardDocument {
        ShardDocument::new()
            .with_field("EventId", FieldValue::Long(id))
            .with_field("Feed", FieldValue::Text("TEST".to_string()))
    }

    fn shard(id: u64, docs: Vec<ShardDocument>) -> Arc<IndexShard> {
        Arc::new(IndexShard::new(id, docs))
    }

    fn stored_fields() -> Vec<String> {
        vec!["EventId".to_string(), "Feed".to_string()]
    }

    fn match_all() -> IndexQuery {
        IndexQuery::LongRange {
            field: "EventId".to_string(),
            from: None,
            to: None,
            from_inclusive: true,
            to_inclusive: true,
        }
    }

    #[test]
    fn test_search_emits_matching_rows() {
        let executor = ShardSearchExecutor::new(2).unwrap();
        let shards = vec![
            shard(1, vec![doc(1), doc(2)]),
            shard(2, vec![doc(3)]),
        ];
        let (tx, rx) = bounded(100);
        let termination = TerminationToken::new();

        let outcome = executor.search(
            &shards,
            &match_all(),
            &stored_fields(),
            tx,
            &termination,
        );

        assert_eq!(outcome.hit_count, 3);
        assert!(outcome.errors.is_empty());
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn test_corrupt_shard_degrades_not_fails() {
        let executor = ShardSearchExecutor::new(2).unwrap();
        let mut shards = vec![shard(1, vec![doc(1), doc(2)])];
        shards.push(Arc::new(
            IndexShard::new(2, vec![doc(3)]).with_corrupt(true),
        ));
        let (tx, rx) = bounded(100);
        let termination = TerminationToken::new();

        let outcome = executor.search(
            &shards,
            &match_all(),
            &stored_fields(),
            tx,
            &termination,
        );

        assert_eq!(outcome.hit_count, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("corrupt"));
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_termination_stops_search() {
        let executor = ShardSearchExecutor::new(1).unwrap();
        let docs: Vec<ShardDocument> = (0..1000).map(doc).collect();
        let shards = vec![shard(1, docs)];
        let (tx, _rx) = bounded(10_000);
        let termination = TerminationToken::new();
        termination.terminate();

        let outcome = executor.search(
            &shards,
            &match_all(),
            &stored_fields(),
            tx,
            &termination,
        );

        // Terminated before any document was visited; not an error.
        assert_eq!(outcome.hit_count, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_doc_count_mismatch_is_non_fatal() {
        let executor = ShardSearchExecutor::new(1).unwrap();
        let shards = vec![Arc::new(
            IndexShard::new(1, vec![doc(1)]).with_catalogued_doc_count(5),
        )];
        let (tx, rx) = bounded(10);
        let termination = TerminationToken::new();

        let outcome = executor.search(
            &shards,
            &match_all(),
            &stored_fields(),
            tx,
            &termination,
        );

        assert_eq!(outcome.hit_count, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(rx.try_iter().count(), 1);
    }
}
