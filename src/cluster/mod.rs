//! Cluster search coordination.
//!
//! A coordinating node fans a parsed query out to the nodes holding the
//! relevant index shards. Each node runs a [`ClusterSearchTaskHandler`] that
//! searches its shards, streams matches through its coprocessors and
//! forwards periodic [`NodeResult`] payloads back to the coordinator, where
//! a [`ClusterSearchResultCollector`] merges them into the result store the
//! polling client reads from.

pub mod collector;
pub mod dispatcher;
pub mod handler;
pub mod sender;
pub mod task;

use crate::error::Result;

pub use collector::{ClusterSearchResultCollector, CollectorId};
pub use dispatcher::{ClusterNode, LocalCluster};
pub use handler::{ClusterSearchTaskHandler, TaskPhase};
pub use sender::{NodeResult, ResultSender};
pub use task::{ClusterSearchTask, DataSourceRef, Query, TerminationToken};

/// Identifies one cluster node.
pub type NodeId = String;

/// Receives a node's results on the coordinating side.
///
/// Both methods may fail when the coordinating task has gone away; callers
/// treat that as a signal to terminate rather than retry.
pub trait NodeResultCallback: Send + Sync {
    /// Deliver a batch of results from a node.
    fn on_success(&self, node: &NodeId, result: NodeResult) -> Result<()>;

    /// Report that a node's search failed. The node is marked completed so
    /// the coordinator does not wait on it forever.
    fn on_failure(&self, node: &NodeId, error: crate::error::FathomError) -> Result<()>;
}
