//! Coordinating-side collection of node results.
//!
//! One collector exists per cluster search. It implements the node result
//! callback: payload batches are folded into the result store, node errors
//! are recorded against the node that raised them, and a node's final batch
//! (or its failure) marks the node completed. Once every expected node has
//! completed the store is marked complete and pollers stop waiting.
//! Destroying the collector terminates the distributed task and rejects any
//! further deliveries, which makes remote senders shut themselves down.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cluster::sender::NodeResult;
use crate::cluster::task::TerminationToken;
use crate::cluster::{NodeId, NodeResultCallback};
use crate::error::{FathomError, Result};
use crate::result::ResultStore;

/// Identifies one collector (and therefore one cluster search).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectorId(String);

impl CollectorId {
    /// Create a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CollectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct CollectorState {
    started: HashSet<NodeId>,
    completed: HashSet<NodeId>,
    errors: Vec<(NodeId, String)>,
}

/// Merges node results into the result store and tracks node completion.
pub struct ClusterSearchResultCollector {
    id: CollectorId,
    store: Arc<ResultStore>,
    expected_nodes: usize,
    state: Mutex<CollectorState>,
    termination: TerminationToken,
    destroyed: AtomicBool,
}

impl ClusterSearchResultCollector {
    /// Create a collector expecting results from `expected_nodes` nodes.
    /// A zero-node search is complete from the start.
    pub fn new(expected_nodes: usize, termination: TerminationToken) -> Self {
        let store = Arc::new(ResultStore::new());
        if expected_nodes == 0 {
            store.set_complete();
        }
        Self {
            id: CollectorId::new(),
            store,
            expected_nodes,
            state: Mutex::new(CollectorState {
                started: HashSet::new(),
                completed: HashSet::new(),
                errors: Vec::new(),
            }),
            termination,
            destroyed: AtomicBool::new(false),
        }
    }

    /// The collector's id.
    pub fn id(&self) -> &CollectorId {
        &self.id
    }

    /// The store node payloads merge into.
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// The search's termination token.
    pub fn termination(&self) -> &TerminationToken {
        &self.termination
    }

    /// Whether every expected node has completed or the search was
    /// terminated.
    pub fn is_complete(&self) -> bool {
        self.store.is_complete() || self.termination.is_terminated()
    }

    /// Number of nodes whose search has started. A node reporting batches
    /// without the started flag has not yet begun searching.
    pub fn started_node_count(&self) -> usize {
        self.state.lock().started.len()
    }

    /// Number of nodes that have sent their final batch or failed.
    pub fn completed_node_count(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Errors recorded so far, attributed to the node that raised them.
    pub fn errors(&self) -> Vec<String> {
        self.state
            .lock()
            .errors
            .iter()
            .map(|(node, message)| format!("{node}: {message}"))
            .collect()
    }

    /// Terminate the search and reject further deliveries. Idempotent; a
    /// remote sender whose delivery is rejected terminates its own task, so
    /// destruction propagates outwards without a separate stop message.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            info!("Destroying collector {}", self.id);
            self.termination.terminate();
            self.store.set_complete();
        }
    }

    fn check_destroyed(&self, node: &NodeId) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(FathomError::node(format!(
                "Collector {} has been destroyed; rejecting delivery from {node}",
                self.id
            )));
        }
        Ok(())
    }

    fn mark_node_complete(&self, state: &mut CollectorState, node: &NodeId) {
        if state.completed.insert(node.clone()) {
            debug!(
                "Node {node} complete ({}/{} nodes)",
                state.completed.len(),
                self.expected_nodes
            );
            if state.completed.len() >= self.expected_nodes {
                self.store.set_complete();
            }
        }
    }
}

impl NodeResultCallback for ClusterSearchResultCollector {
    fn on_success(&self, node: &NodeId, result: NodeResult) -> Result<()> {
        self.check_destroyed(node)?;

        self.store.add_payloads(result.payloads);
        let mut state = self.state.lock();
        if result.started {
            state.started.insert(node.clone());
        }
        for message in result.errors {
            state.errors.push((node.clone(), message));
        }
        if result.complete {
            self.mark_node_complete(&mut state, node);
        }
        Ok(())
    }

    fn on_failure(&self, node: &NodeId, error: FathomError) -> Result<()> {
        self.check_destroyed(node)?;

        let mut state = self.state.lock();
        state.errors.push((node.clone(), error.to_string()));
        // A failed node sends nothing further; count it as completed so the
        // search does not hang on it.
        self.mark_node_complete(&mut state, node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn result(node: &str, started: bool, complete: bool) -> NodeResult {
        NodeResult {
            node: node.to_string(),
            started,
            payloads: HashMap::new(),
            errors: Vec::new(),
            complete,
        }
    }

    #[test]
    fn test_completes_when_all_nodes_complete() {
        let collector = ClusterSearchResultCollector::new(2, TerminationToken::new());
        let node1 = "node1".to_string();
        let node2 = "node2".to_string();

        collector
            .on_success(&node1, result("node1", true, false))
            .unwrap();
        assert!(!collector.is_complete());

        collector
            .on_success(&node1, result("node1", true, true))
            .unwrap();
        assert!(!collector.is_complete());
        assert_eq!(collector.completed_node_count(), 1);

        collector
            .on_success(&node2, result("node2", true, true))
            .unwrap();
        assert!(collector.is_complete());
    }

    #[test]
    fn test_started_nodes_tracked_separately_from_completed() {
        let collector = ClusterSearchResultCollector::new(2, TerminationToken::new());
        let node = "node1".to_string();

        // A batch sent before the node's search begins.
        collector
            .on_success(&node, result("node1", false, false))
            .unwrap();
        assert_eq!(collector.started_node_count(), 0);

        collector
            .on_success(&node, result("node1", true, false))
            .unwrap();
        assert_eq!(collector.started_node_count(), 1);
        assert_eq!(collector.completed_node_count(), 0);
    }

    #[test]
    fn test_failure_counts_as_completion() {
        let collector = ClusterSearchResultCollector::new(1, TerminationToken::new());
        let node = "node1".to_string();

        collector
            .on_failure(&node, FathomError::node("node1 is not enabled"))
            .unwrap();

        assert!(collector.is_complete());
        let errors = collector.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("node1: "));
        assert!(errors[0].contains("not enabled"));
    }

    #[test]
    fn test_zero_node_search_is_complete() {
        let collector = ClusterSearchResultCollector::new(0, TerminationToken::new());
        assert!(collector.is_complete());
        assert!(collector.errors().is_empty());
        assert!(collector.store().snapshot(10).is_empty());
    }

    #[test]
    fn test_destroy_rejects_deliveries_and_terminates() {
        let termination = TerminationToken::new();
        let collector = ClusterSearchResultCollector::new(2, termination.clone());
        let node = "node1".to_string();

        collector.destroy();
        collector.destroy();

        assert!(termination.is_terminated());
        assert!(collector.is_complete());
        assert!(
            collector
                .on_success(&node, result("node1", true, true))
                .is_err()
        );
        assert!(
            collector
                .on_failure(&node, FathomError::node("late failure"))
                .is_err()
        );
    }

    #[test]
    fn test_duplicate_completion_counted_once() {
        let collector = ClusterSearchResultCollector::new(2, TerminationToken::new());
        let node = "node1".to_string();

        collector
            .on_success(&node, result("node1", true, true))
            .unwrap();
        collector
            .on_success(&node, result("node1", true, true))
            .unwrap();

        assert_eq!(collector.completed_node_count(), 1);
        assert!(!collector.is_complete());
    }
}
