//! Periodic result delivery from a searching node to the coordinator.
//!
//! The sender thread wakes at the task's send frequency, drains every
//! coprocessor's accumulated-but-unsent payload plus any queued errors, and
//! delivers them as one [`NodeResult`]. The message carrying the final
//! drain has its `complete` flag set so the coordinator can mark the node
//! finished. A failed delivery means the coordinating task has gone away,
//! so the sender terminates its own task instead of retrying.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cluster::task::TerminationToken;
use crate::cluster::{NodeId, NodeResultCallback};
use crate::coprocessor::{Coprocessor, CoprocessorKey, Payload};
use crate::error::{FathomError, Result};

/// One batch of results from one node.
///
/// Sent at the task's send frequency while the node search runs, then once
/// more with `complete` set after the final coprocessor drain. An empty
/// batch is still sent so the coordinator can tell a slow node from a dead
/// one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node that produced the batch.
    pub node: NodeId,
    /// True once the node's search has begun, so the coordinator can tell a
    /// node that has not started from one still searching.
    pub started: bool,
    /// Drained payloads, keyed by aggregation unit.
    pub payloads: HashMap<CoprocessorKey, Payload>,
    /// Errors raised on the node since the previous batch.
    pub errors: Vec<String>,
    /// True on the final batch; the node will send nothing further.
    pub complete: bool,
}

/// The coprocessor set shared between the row-draining thread and the
/// sender thread.
pub type SharedCoprocessors = Arc<Mutex<Vec<(CoprocessorKey, Coprocessor)>>>;

/// Errors queued on the node for delivery with the next batch.
pub type SharedErrors = Arc<Mutex<Vec<String>>>;

/// Drains coprocessors on a timer and forwards the payloads.
pub struct ResultSender {
    handle: JoinHandle<()>,
}

impl ResultSender {
    /// Spawn the sender thread.
    ///
    /// The thread sends a batch every `frequency` until a message arrives on
    /// `search_complete_rx` (sent by the task handler after the last row has
    /// been consumed), then performs the final drain, sends it with the
    /// complete flag and exits. Termination stops the thread without a
    /// final send. Every batch reflects `search_started`, which the task
    /// handler raises when the shard search begins.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        node: NodeId,
        coprocessors: SharedCoprocessors,
        errors: SharedErrors,
        frequency: Duration,
        search_started: Arc<AtomicBool>,
        search_complete_rx: Receiver<()>,
        sending_complete: Arc<AtomicBool>,
        termination: TerminationToken,
        callback: Arc<dyn NodeResultCallback>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("result-sender-{node}"))
            .spawn(move || {
                Self::run(
                    node,
                    coprocessors,
                    errors,
                    frequency,
                    search_started,
                    search_complete_rx,
                    sending_complete,
                    termination,
                    callback,
                );
            })
            .map_err(|e| FathomError::other(format!("Failed to spawn result sender: {e}")))?;
        Ok(Self { handle })
    }

    /// Wait for the sender thread to exit. The thread observes termination
    /// each wake, so this returns within one send frequency of a terminate.
    pub fn join(self) {
        let _ = self.handle.join();
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        node: NodeId,
        coprocessors: SharedCoprocessors,
        errors: SharedErrors,
        frequency: Duration,
        search_started: Arc<AtomicBool>,
        search_complete_rx: Receiver<()>,
        sending_complete: Arc<AtomicBool>,
        termination: TerminationToken,
        callback: Arc<dyn NodeResultCallback>,
    ) {
        loop {
            // Wake early when the search finishes rather than sleeping out
            // the full interval.
            let complete = match search_complete_rx.recv_timeout(frequency) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            };

            if termination.is_terminated() {
                debug!("Result sender for {node} terminated before final send");
                return;
            }

            let payloads = Self::drain_payloads(&coprocessors);
            let drained_errors = std::mem::take(&mut *errors.lock());

            trace!(
                "Sending {} payload(s), {} error(s) from {node}, complete={complete}",
                payloads.len(),
                drained_errors.len(),
            );

            let result = NodeResult {
                node: node.clone(),
                started: search_started.load(Ordering::SeqCst),
                payloads,
                errors: drained_errors,
                complete,
            };
            if let Err(e) = callback.on_success(&node, result) {
                // The coordinating task has gone away; stop the whole task.
                error!("Failed to deliver results from {node}: {e}");
                termination.terminate();
                return;
            }

            if complete {
                sending_complete.store(true, Ordering::SeqCst);
                debug!("Result sender for {node} sent final batch");
                return;
            }
        }
    }

    fn drain_payloads(coprocessors: &SharedCoprocessors) -> HashMap<CoprocessorKey, Payload> {
        let mut coprocessors = coprocessors.lock();
        coprocessors
            .iter_mut()
            .filter_map(|(key, coprocessor)| coprocessor.create_payload().map(|p| (*key, p)))
            .collect()
    }
}
