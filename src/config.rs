//! Configuration for cluster search execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the cluster search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum number of clauses an executable boolean query may contain.
    pub max_boolean_clause_count: usize,

    /// Maximum number of matched rows buffered between shard search and the
    /// coprocessors. When the queue is full shard search pauses until rows
    /// are drained.
    pub max_stored_row_queue_size: usize,

    /// How often each node drains coprocessor payloads and forwards them to
    /// the requesting node.
    pub result_send_frequency: Duration,

    /// How long an idle search store lives before it is evicted.
    pub store_idle_timeout: Duration,

    /// Maximum number of concurrently cached search stores.
    pub max_active_stores: usize,

    /// Default maximum number of merged results retained per component.
    pub max_results_per_component: usize,

    /// Thread pool size for shard search.
    /// If None, uses the number of CPU cores.
    pub shard_search_threads: Option<usize>,

    /// Upper bound on how long a poll call waits for first results before
    /// returning a partial snapshot.
    pub poll_wait: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_boolean_clause_count: 1024,
            max_stored_row_queue_size: 1_000_000,
            result_send_frequency: Duration::from_secs(1),
            store_idle_timeout: Duration::from_secs(600),
            max_active_stores: 2000,
            max_results_per_component: 1000,
            shard_search_threads: None,
            poll_wait: Duration::from_millis(500),
        }
    }
}

impl SearchConfig {
    /// Set the maximum boolean clause count.
    pub fn with_max_boolean_clause_count(mut self, count: usize) -> Self {
        self.max_boolean_clause_count = count;
        self
    }

    /// Set the result send frequency.
    pub fn with_result_send_frequency(mut self, frequency: Duration) -> Self {
        self.result_send_frequency = frequency;
        self
    }

    /// Set the store idle timeout.
    pub fn with_store_idle_timeout(mut self, timeout: Duration) -> Self {
        self.store_idle_timeout = timeout;
        self
    }

    /// Set the maximum merged results retained per component.
    pub fn with_max_results_per_component(mut self, max: usize) -> Self {
        self.max_results_per_component = max;
        self
    }

    /// Resolve the shard search thread pool size.
    pub fn shard_search_thread_count(&self) -> usize {
        self.shard_search_threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.max_boolean_clause_count, 1024);
        assert_eq!(config.max_stored_row_queue_size, 1_000_000);
        assert_eq!(config.result_send_frequency, Duration::from_secs(1));
        assert_eq!(config.store_idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_active_stores, 2000);
        assert!(config.shard_search_thread_count() > 0);
    }

    #[test]
    fn test_config_builder() {
        let config = SearchConfig::default()
            .with_max_boolean_clause_count(16)
            .with_result_send_frequency(Duration::from_millis(50))
            .with_store_idle_timeout(Duration::from_secs(5))
            .with_max_results_per_component(10);

        assert_eq!(config.max_boolean_clause_count, 16);
        assert_eq!(config.result_send_frequency, Duration::from_millis(50));
        assert_eq!(config.store_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_results_per_component, 10);
    }
}
