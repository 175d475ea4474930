//! Search task definitions and cooperative termination.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coprocessor::{CoprocessorKey, CoprocessorSettings};
use crate::expression::ExpressionNode;
use crate::shard::ShardId;

/// Cooperative cancellation token threaded through every long-running call.
///
/// Termination is checked at defined suspension points (between documents,
/// between sends, between polls); setting the flag never interrupts work
/// mid-unit.
#[derive(Debug, Clone, Default)]
pub struct TerminationToken {
    terminated: Arc<AtomicBool>,
}

impl TerminationToken {
    /// Create a token in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Idempotent.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Reference to the data source (index) a query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceRef {
    /// Unique identifier of the index.
    pub uuid: String,
    /// Display name.
    pub name: String,
}

impl DataSourceRef {
    /// Create a new data source reference.
    pub fn new<S: Into<String>>(uuid: S, name: S) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }
}

/// A parsed search query as dispatched to nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The index to search.
    pub data_source: DataSourceRef,
    /// The boolean expression tree.
    pub expression: Option<ExpressionNode>,
    /// Offset string applied to date terms without an explicit zone, such
    /// as "+02:00". None means UTC.
    pub time_zone: Option<String>,
    /// Timestamp anchoring relative date expressions, epoch milliseconds.
    pub now_epoch_milli: i64,
}

impl Query {
    /// Create a query with an expression, defaulting the locale fields.
    pub fn new(data_source: DataSourceRef, expression: ExpressionNode) -> Self {
        Self {
            data_source,
            expression: Some(expression),
            time_zone: None,
            now_epoch_milli: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Set the time zone offset for date parsing.
    pub fn with_time_zone<S: Into<String>>(mut self, time_zone: S) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    /// Set the timestamp anchoring relative dates.
    pub fn with_now(mut self, now_epoch_milli: i64) -> Self {
        self.now_epoch_milli = now_epoch_milli;
        self
    }
}

/// The per-node unit of cluster search work: search these shards with this
/// query and stream coprocessor payloads back at the send frequency.
#[derive(Debug, Clone)]
pub struct ClusterSearchTask {
    /// Unique task id.
    pub id: String,
    /// The query to execute.
    pub query: Query,
    /// Shards assigned to the executing node.
    pub shard_ids: Vec<ShardId>,
    /// Stored field names to extract from each match, in row order.
    pub stored_fields: Vec<String>,
    /// How often payloads are drained and forwarded.
    pub result_send_frequency: Duration,
    /// Aggregation configuration, fixed for the lifetime of the search.
    pub coprocessor_settings: HashMap<CoprocessorKey, CoprocessorSettings>,
    /// Cooperative termination, shared with the coordinator.
    pub termination: TerminationToken,
}

impl ClusterSearchTask {
    /// Create a task for one node's shard list.
    pub fn new(
        query: Query,
        shard_ids: Vec<ShardId>,
        stored_fields: Vec<String>,
        result_send_frequency: Duration,
        coprocessor_settings: HashMap<CoprocessorKey, CoprocessorSettings>,
        termination: TerminationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query,
            shard_ids,
            stored_fields,
            result_send_frequency,
            coprocessor_settings,
            termination,
        }
    }
}
