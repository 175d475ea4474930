//! Per-node search task execution.
//!
//! The handler owns one node's share of a cluster search. It validates the
//! task, builds the executable query, wires the coprocessor set between the
//! shard search and the result sender, and drains matched rows from the
//! bounded row channel into the coprocessors. The sender runs on its own
//! thread for the whole search so partial results flow while shards are
//! still being read; the handler signals it after the last row and waits
//! for the final flush before returning. Termination is observed at every
//! stage, so a terminated task winds down within one unit of work per
//! thread without a final send.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::cluster::sender::{NodeResult, ResultSender, SharedCoprocessors, SharedErrors};
use crate::cluster::task::ClusterSearchTask;
use crate::cluster::{NodeId, NodeResultCallback};
use crate::config::SearchConfig;
use crate::coprocessor::CoprocessorsFactory;
use crate::dictionary::DictionaryStore;
use crate::error::{FathomError, Result};
use crate::query::builder::SearchExpressionQueryBuilder;
use crate::schema::IndexSchema;
use crate::shard::{IndexShard, ShardSearchExecutor};

/// Where a node task currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Created but not yet started.
    Pending,
    /// Validating the task and building the query.
    Initialising,
    /// Shard search running, rows flowing into the coprocessors.
    Searching,
    /// Search finished, waiting for the sender's final flush.
    SendingResults,
    /// Finished normally; the final batch was delivered.
    Complete,
    /// Stopped by termination.
    Terminated,
}

/// Executes one node's share of a cluster search.
pub struct ClusterSearchTaskHandler {
    config: SearchConfig,
    phase: Mutex<TaskPhase>,
}

impl ClusterSearchTaskHandler {
    /// Create a handler.
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            phase: Mutex::new(TaskPhase::Pending),
        }
    }

    /// The task's current lifecycle phase.
    pub fn phase(&self) -> TaskPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: TaskPhase) {
        debug!("Task phase -> {phase:?}");
        *self.phase.lock() = phase;
    }

    /// Run the task to completion on the calling thread.
    ///
    /// Validation failures are delivered through the failure callback and
    /// recorded against this node; they never panic or poison the search as
    /// a whole. If delivering the failure itself fails, the coordinator has
    /// gone away and the task self-terminates.
    pub fn exec(
        &self,
        task: &ClusterSearchTask,
        node: &NodeId,
        shards: &[Arc<IndexShard>],
        schema: Option<&IndexSchema>,
        dictionaries: &dyn DictionaryStore,
        callback: Arc<dyn NodeResultCallback>,
    ) {
        if task.termination.is_terminated() {
            self.set_phase(TaskPhase::Terminated);
            return;
        }

        self.set_phase(TaskPhase::Initialising);
        info!(
            "Executing search task {} on {node}: {} shard(s)",
            task.id,
            shards.len()
        );

        if let Err(e) = self.run(task, node, shards, schema, dictionaries, &callback) {
            error!("Search task {} failed on {node}: {e}", task.id);
            if callback.on_failure(node, e).is_err() {
                // Nowhere to report to; stop the whole task.
                task.termination.terminate();
            }
        }

        if task.termination.is_terminated() {
            self.set_phase(TaskPhase::Terminated);
        } else {
            self.set_phase(TaskPhase::Complete);
        }
    }

    fn run(
        &self,
        task: &ClusterSearchTask,
        node: &NodeId,
        shards: &[Arc<IndexShard>],
        schema: Option<&IndexSchema>,
        dictionaries: &dyn DictionaryStore,
        callback: &Arc<dyn NodeResultCallback>,
    ) -> Result<()> {
        let schema = schema.ok_or_else(|| FathomError::search("Search index has not been set"))?;
        let expression = task
            .query
            .expression
            .as_ref()
            .ok_or_else(|| FathomError::search("Search expression has not been set"))?;
        if task.stored_fields.is_empty() {
            return Err(FathomError::search("No stored fields have been requested"));
        }

        let coprocessors =
            CoprocessorsFactory::create_all(&task.coprocessor_settings, &task.stored_fields);
        if coprocessors.is_empty() {
            // Nothing to aggregate into; report immediate completion so the
            // coordinator does not wait on this node.
            debug!("No coprocessors for task {}; completing immediately", task.id);
            callback.on_success(
                node,
                NodeResult {
                    node: node.clone(),
                    started: false,
                    payloads: Default::default(),
                    errors: Vec::new(),
                    complete: true,
                },
            )?;
            return Ok(());
        }

        let builder = SearchExpressionQueryBuilder::new(
            schema,
            dictionaries,
            self.config.max_boolean_clause_count,
            task.query.time_zone.as_deref(),
            task.query.now_epoch_milli,
        )?;
        let built = builder.build(expression)?;

        let coprocessors: SharedCoprocessors = Arc::new(Mutex::new(coprocessors));
        let errors: SharedErrors = Arc::new(Mutex::new(Vec::new()));
        let (complete_tx, complete_rx) = bounded::<()>(1);
        let sending_complete = Arc::new(AtomicBool::new(false));
        let search_started = Arc::new(AtomicBool::new(false));

        let sender = ResultSender::start(
            node.clone(),
            Arc::clone(&coprocessors),
            Arc::clone(&errors),
            task.result_send_frequency,
            Arc::clone(&search_started),
            complete_rx,
            sending_complete,
            task.termination.clone(),
            Arc::clone(callback),
        )?;

        self.set_phase(TaskPhase::Searching);
        search_started.store(true, Ordering::SeqCst);
        let executor = ShardSearchExecutor::new(self.config.shard_search_thread_count())?;
        let (row_tx, row_rx) = bounded(self.config.max_stored_row_queue_size);

        let query = &built.query;
        let stored_fields = &task.stored_fields;
        let termination = &task.termination;
        let executor = &executor;
        thread::scope(|scope| {
            let search = scope.spawn(move || {
                executor.search(shards, query, stored_fields, row_tx, termination)
            });

            // The iterator ends once every shard searcher has dropped its
            // sender and the channel is drained.
            for row in &row_rx {
                if termination.is_terminated() {
                    break;
                }
                let mut coprocessors = coprocessors.lock();
                for (_, coprocessor) in coprocessors.iter_mut() {
                    coprocessor.receive(&row);
                }
            }
            // Dropping the receiver unblocks searchers stuck on a full
            // channel after termination.
            drop(row_rx);

            match search.join() {
                Ok(outcome) => {
                    debug!(
                        "Task {} matched {} document(s) on {node}",
                        task.id, outcome.hit_count
                    );
                    errors.lock().extend(outcome.errors);
                }
                Err(_) => {
                    errors
                        .lock()
                        .push("Shard search thread panicked".to_string());
                }
            }
        });

        self.set_phase(TaskPhase::SendingResults);
        // The sender may already have exited on termination; a failed send
        // just means there is nobody left to wake.
        let _ = complete_tx.send(());
        sender.join();
        Ok(())
    }
}
