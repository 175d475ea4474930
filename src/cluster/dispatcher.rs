//! In-process cluster of search nodes.
//!
//! Dispatches one search task per participating node on its own thread and
//! returns the collector the node results converge on. Node results cross a
//! simulated wire: every batch is serialized and deserialized with bincode
//! before delivery, exactly as a remote transport would carry it, so the
//! payload types stay wire-safe. A node that holds no shard of the target
//! index does not participate; a disabled node that does hold shards is
//! recorded as a node error and immediately completed so the search never
//! waits on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::cluster::collector::ClusterSearchResultCollector;
use crate::cluster::handler::ClusterSearchTaskHandler;
use crate::cluster::sender::NodeResult;
use crate::cluster::task::{ClusterSearchTask, Query, TerminationToken};
use crate::cluster::{NodeId, NodeResultCallback};
use crate::config::SearchConfig;
use crate::coprocessor::{CoprocessorKey, CoprocessorSettings};
use crate::dictionary::DictionaryStore;
use crate::error::{FathomError, Result};
use crate::query::builder::SearchExpressionQueryBuilder;
use crate::schema::IndexSchema;
use crate::shard::IndexShard;

/// One search node: an id, an enabled flag and the shards it holds, keyed
/// by index uuid.
pub struct ClusterNode {
    /// Node id, unique within the cluster.
    pub id: NodeId,
    /// Disabled nodes keep their shards but refuse search tasks.
    pub enabled: bool,
    shards: HashMap<String, Vec<Arc<IndexShard>>>,
}

impl ClusterNode {
    /// Create an enabled node with no shards.
    pub fn new<S: Into<NodeId>>(id: S) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            shards: HashMap::new(),
        }
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Assign a shard of the given index to this node.
    pub fn with_shard<S: Into<String>>(mut self, index_uuid: S, shard: IndexShard) -> Self {
        self.shards
            .entry(index_uuid.into())
            .or_default()
            .push(Arc::new(shard));
        self
    }

    fn shards_for(&self, index_uuid: &str) -> &[Arc<IndexShard>] {
        self.shards
            .get(index_uuid)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Round-trips every delivery through bincode before handing it to the
/// collector, standing in for a remote transport.
struct WireCallback {
    collector: Arc<ClusterSearchResultCollector>,
}

impl WireCallback {
    fn round_trip<T>(value: &T) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let bytes = bincode::serialize(value)
            .map_err(|e| FathomError::serialization(format!("Failed to encode result: {e}")))?;
        bincode::deserialize(&bytes)
            .map_err(|e| FathomError::serialization(format!("Failed to decode result: {e}")))
    }
}

impl NodeResultCallback for WireCallback {
    fn on_success(&self, node: &NodeId, result: NodeResult) -> Result<()> {
        let result = Self::round_trip(&result)?;
        self.collector.on_success(node, result)
    }

    fn on_failure(&self, node: &NodeId, error: FathomError) -> Result<()> {
        // Errors cross the wire as plain messages.
        let message = Self::round_trip(&error.to_string())?;
        self.collector.on_failure(node, FathomError::node(message))
    }
}

/// A cluster of search nodes running in one process.
pub struct LocalCluster {
    config: SearchConfig,
    schemas: HashMap<String, IndexSchema>,
    dictionaries: Arc<dyn DictionaryStore>,
    nodes: Vec<ClusterNode>,
}

impl LocalCluster {
    /// Create an empty cluster.
    pub fn new(config: SearchConfig, dictionaries: Arc<dyn DictionaryStore>) -> Self {
        Self {
            config,
            schemas: HashMap::new(),
            dictionaries,
            nodes: Vec::new(),
        }
    }

    /// Register an index schema under its uuid.
    pub fn with_index<S: Into<String>>(mut self, uuid: S, schema: IndexSchema) -> Self {
        self.schemas.insert(uuid.into(), schema);
        self
    }

    /// Add a node to the cluster.
    pub fn with_node(mut self, node: ClusterNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// The cluster's configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Highlight terms for a query, computed without running it. Best
    /// effort; a query that fails validation has no highlights.
    pub fn highlight_terms(&self, query: &Query) -> HashSet<String> {
        let Some(schema) = self.schemas.get(&query.data_source.uuid) else {
            return HashSet::new();
        };
        let Some(expression) = query.expression.as_ref() else {
            return HashSet::new();
        };
        SearchExpressionQueryBuilder::new(
            schema,
            self.dictionaries.as_ref(),
            self.config.max_boolean_clause_count,
            query.time_zone.as_deref(),
            query.now_epoch_milli,
        )
        .and_then(|builder| builder.build(expression))
        .map(|built| built.highlight_terms)
        .unwrap_or_default()
    }

    /// Start a cluster search and return its collector.
    ///
    /// Dispatch is asynchronous: the collector is returned as soon as every
    /// node task has been started, and completes once every participating
    /// node has delivered its final batch or failed.
    pub fn start_search(
        &self,
        query: Query,
        stored_fields: Vec<String>,
        coprocessor_settings: HashMap<CoprocessorKey, CoprocessorSettings>,
    ) -> Arc<ClusterSearchResultCollector> {
        let index_uuid = query.data_source.uuid.clone();
        let termination = TerminationToken::new();

        let participating: Vec<&ClusterNode> = self
            .nodes
            .iter()
            .filter(|node| !node.shards_for(&index_uuid).is_empty())
            .collect();
        info!(
            "Dispatching search over index {index_uuid} to {} node(s)",
            participating.len()
        );

        let collector = Arc::new(ClusterSearchResultCollector::new(
            participating.len(),
            termination.clone(),
        ));
        let schema = self.schemas.get(&index_uuid).cloned();

        for node in participating {
            if !node.enabled {
                warn!("Node {} holds shards but is not enabled", node.id);
                let _ = collector.on_failure(
                    &node.id,
                    FathomError::node(format!("Node {} is not enabled", node.id)),
                );
                continue;
            }

            let shards: Vec<Arc<IndexShard>> = node.shards_for(&index_uuid).to_vec();
            let task = ClusterSearchTask::new(
                query.clone(),
                shards.iter().map(|s| s.id).collect(),
                stored_fields.clone(),
                self.config.result_send_frequency,
                coprocessor_settings.clone(),
                termination.clone(),
            );
            let callback: Arc<dyn NodeResultCallback> = Arc::new(WireCallback {
                collector: Arc::clone(&collector),
            });
            let config = self.config.clone();
            let schema = schema.clone();
            let dictionaries = Arc::clone(&self.dictionaries);
            let node_id = node.id.clone();

            let spawned = thread::Builder::new()
                .name(format!("search-node-{node_id}"))
                .spawn(move || {
                    let handler = ClusterSearchTaskHandler::new(config);
                    handler.exec(
                        &task,
                        &node_id,
                        &shards,
                        schema.as_ref(),
                        dictionaries.as_ref(),
                        callback,
                    );
                });
            if let Err(e) = spawned {
                let _ = collector.on_failure(
                    &node.id,
                    FathomError::node(format!("Failed to start search on {}: {e}", node.id)),
                );
            }
        }

        collector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::task::DataSourceRef;
    use crate::coprocessor::{Payload, TableSettings};
    use crate::dictionary::InMemoryDictionaryStore;
    use crate::expression::{Condition, ExpressionNode};
    use crate::schema::{FieldValue, IndexField, IndexSchema};
    use crate::shard::ShardDocument;
    use std::time::Duration;

    const INDEX: &str = "idx-1";

    fn schema() -> IndexSchema {
        IndexSchema::new(vec![
            IndexField::text("Feed"),
            IndexField::numeric("EventId"),
        ])
    }

    fn doc(feed: &str, id: i64) -> ShardDocument {
        ShardDocument::new()
            .with_field("Feed", FieldValue::Text(feed.to_string()))
            .with_field("EventId", FieldValue::Long(id))
    }

    fn query(feed: &str) -> Query {
        Query::new(
            DataSourceRef::new(INDEX, "Test index"),
            ExpressionNode::term("Feed", Condition::Equals, feed),
        )
    }

    fn table_settings() -> HashMap<CoprocessorKey, CoprocessorSettings> {
        let mut settings = HashMap::new();
        settings.insert(
            CoprocessorKey(1),
            CoprocessorSettings::Table(TableSettings::new(vec!["Feed".to_string()])),
        );
        settings
    }

    fn stored_fields() -> Vec<String> {
        vec!["Feed".to_string(), "EventId".to_string()]
    }

    fn wait_complete(collector: &ClusterSearchResultCollector) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !collector.is_complete() {
            assert!(std::time::Instant::now() < deadline, "search did not complete");
            collector.store().wait_for_change(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_results_merge_across_nodes() {
        let cluster = LocalCluster::new(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
            Arc::new(InMemoryDictionaryStore::new()),
        )
        .with_index(INDEX, schema())
        .with_node(
            ClusterNode::new("node1")
                .with_shard(INDEX, IndexShard::new(1, vec![doc("TEST", 1), doc("TEST", 2)])),
        )
        .with_node(
            ClusterNode::new("node2")
                .with_shard(INDEX, IndexShard::new(2, vec![doc("TEST", 3), doc("OTHER", 4)])),
        );

        let collector = cluster.start_search(query("TEST"), stored_fields(), table_settings());
        wait_complete(&collector);

        assert!(collector.errors().is_empty());
        let snapshot = collector.store().snapshot(100);
        let Payload::Table(table) = &snapshot[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(table.total_count(), 3);
        assert_eq!(table.groups.len(), 1);
        assert_eq!(table.groups[0].key, vec!["TEST"]);
    }

    #[test]
    fn test_disabled_node_reported_and_completed() {
        let cluster = LocalCluster::new(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
            Arc::new(InMemoryDictionaryStore::new()),
        )
        .with_index(INDEX, schema())
        .with_node(
            ClusterNode::new("node1").with_shard(INDEX, IndexShard::new(1, vec![doc("TEST", 1)])),
        )
        .with_node(
            ClusterNode::new("node2")
                .with_enabled(false)
                .with_shard(INDEX, IndexShard::new(2, vec![doc("TEST", 2)])),
        );

        let collector = cluster.start_search(query("TEST"), stored_fields(), table_settings());
        wait_complete(&collector);

        let errors = collector.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("node2"));
        assert!(errors[0].contains("not enabled"));

        let snapshot = collector.store().snapshot(100);
        let Payload::Table(table) = &snapshot[&CoprocessorKey(1)] else {
            panic!("expected table payload");
        };
        assert_eq!(table.total_count(), 1);
    }

    #[test]
    fn test_no_participating_nodes_completes_empty() {
        let cluster = LocalCluster::new(
            SearchConfig::default(),
            Arc::new(InMemoryDictionaryStore::new()),
        )
        .with_index(INDEX, schema())
        .with_node(ClusterNode::new("node1"));

        let collector = cluster.start_search(query("TEST"), stored_fields(), table_settings());
        assert!(collector.is_complete());
        assert!(collector.store().snapshot(100).is_empty());
        assert!(collector.errors().is_empty());
    }

    #[test]
    fn test_validation_error_recorded_against_node() {
        let cluster = LocalCluster::new(
            SearchConfig::default(),
            Arc::new(InMemoryDictionaryStore::new()),
        )
        .with_index(INDEX, schema())
        .with_node(
            ClusterNode::new("node1").with_shard(INDEX, IndexShard::new(1, vec![doc("TEST", 1)])),
        );

        let bad_query = Query::new(
            DataSourceRef::new(INDEX, "Test index"),
            ExpressionNode::term("Missing", Condition::Equals, "x"),
        );
        let collector = cluster.start_search(bad_query, stored_fields(), table_settings());
        wait_complete(&collector);

        let errors = collector.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Field not found in index: Missing"));
    }
}
