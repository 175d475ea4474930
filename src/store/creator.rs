//! Poll-driven access to one running search.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::cluster::collector::ClusterSearchResultCollector;
use crate::cluster::dispatcher::LocalCluster;
use crate::store::{SearchRequest, SearchResponse};

/// Wraps one running cluster search and serves poll snapshots of it.
///
/// A poll on an incomplete search blocks up to the configured poll wait for
/// the store to change, so a fast search returns data on the first poll
/// instead of an empty snapshot. Destroying the creator terminates the
/// distributed search; destruction is idempotent.
pub struct SearchResponseCreator {
    collector: Arc<ClusterSearchResultCollector>,
    highlights: HashSet<String>,
    max_results_per_component: usize,
    poll_wait: Duration,
    last_accessed: Mutex<Instant>,
}

impl SearchResponseCreator {
    /// Start the cluster search described by the request.
    pub fn start(cluster: &LocalCluster, request: SearchRequest) -> Self {
        let highlights = cluster.highlight_terms(&request.query);
        let config = cluster.config();
        let max_results_per_component = config.max_results_per_component;
        let poll_wait = config.poll_wait;

        debug!("Starting search for key {}", request.key);
        let collector = cluster.start_search(
            request.query,
            request.stored_fields,
            request.coprocessor_settings,
        );

        Self {
            collector,
            highlights,
            max_results_per_component,
            poll_wait,
            last_accessed: Mutex::new(Instant::now()),
        }
    }

    /// Take a snapshot of the search's current merged state.
    pub fn poll(&self) -> SearchResponse {
        *self.last_accessed.lock() = Instant::now();

        if !self.collector.is_complete() {
            self.collector.store().wait_for_change(self.poll_wait);
        }

        SearchResponse {
            results: self
                .collector
                .store()
                .snapshot(self.max_results_per_component),
            errors: self.collector.errors(),
            complete: self.collector.is_complete(),
            highlights: self.highlights.clone(),
        }
    }

    /// Whether the underlying search has finished.
    pub fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    /// How long since the search was last polled.
    pub fn idle_for(&self) -> Duration {
        self.last_accessed.lock().elapsed()
    }

    /// Terminate the underlying search. Idempotent.
    pub fn destroy(&self) {
        self.collector.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::dispatcher::ClusterNode;
    use crate::cluster::task::{DataSourceRef, Query};
    use crate::config::SearchConfig;
    use crate::coprocessor::{CoprocessorKey, CoprocessorSettings, Payload, TableSettings};
    use crate::dictionary::InMemoryDictionaryStore;
    use crate::expression::{Condition, ExpressionNode};
    use crate::schema::{FieldValue, IndexField, IndexSchema};
    use crate::shard::{IndexShard, ShardDocument};
    use crate::store::QueryKey;
    use std::collections::HashMap;

    const INDEX: &str = "idx-1";

    fn doc(feed: &str, id: i64) -> ShardDocument {
        ShardDocument::new()
            .with_field("Feed", FieldValue::Text(feed.to_string()))
            .with_field("EventId", FieldValue::Long(id))
    }

    fn cluster() -> LocalCluster {
        LocalCluster::new(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
            Arc::new(InMemoryDictionaryStore::new()),
        )
        .with_index(
            INDEX,
            IndexSchema::new(vec![IndexField::text("Feed"), IndexField::numeric("EventId")]),
        )
        .with_node(
            ClusterNode::new("node1")
                .with_shard(INDEX, IndexShard::new(1, vec![doc("TEST", 1), doc("TEST", 2)])),
        )
    }

    fn request(feed: &str) -> SearchRequest {
        let mut settings = HashMap::new();
        settings.insert(
            CoprocessorKey(1),
            CoprocessorSettings::Table(TableSettings::new(vec!["Feed".to_string()])),
        );
        SearchRequest::new(
            QueryKey::new("query-1"),
            Query::new(
                DataSourceRef::new(INDEX, "Test index"),
                ExpressionNode::term("Feed", Condition::Equals, feed),
            ),
            vec!["Feed".to_string(), "EventId".to_string()],
            settings,
        )
    }

    fn poll_to_completion(creator: &SearchResponseCreator) -> SearchResponse {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let response = creator.poll();
            if response.complete {
                return response;
            }
            assert!(Instant::now() < deadline, "search did not complete");
        }
    }

    #[test]
    fn test_poll_until_complete() {
        let cluster = cluster();
        let creator = SearchResponseCreator::start(&cluster, request("TEST"));

        let response = poll_to_completion(&creator);
        assert!(response.errors.is_empty());
        assert!(response.highlights.contains("TEST"));

        let Payload::Table(table) = &response.results[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(table.total_count(), 2);
    }

    #[test]
    fn test_destroy_completes_polling() {
        let cluster = cluster();
        let creator = SearchResponseCreator::start(&cluster, request("TEST"));

        creator.destroy();
        creator.destroy();

        let response = creator.poll();
        assert!(response.complete);
    }
}
