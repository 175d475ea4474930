//! Cache of active searches keyed by query key.
//!
//! The cache guarantees at most one running search per key: the map lock is
//! held across the lookup and the search start, so two concurrent polls
//! with a fresh key start exactly one cluster search. Entries are evicted
//! when explicitly removed, when they have idled past the configured
//! timeout, or when the cache is full and a new search needs the slot; the
//! map is the single owner of the destroy call, so eviction terminates the
//! underlying search exactly once per entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::cluster::dispatcher::LocalCluster;
use crate::error::{FathomError, Result};
use crate::store::creator::SearchResponseCreator;
use crate::store::{QueryKey, SearchRequest};

/// Active searches, keyed by the client's query key.
pub struct SearchResponseCache {
    cluster: Arc<LocalCluster>,
    idle_timeout: Duration,
    max_active: usize,
    entries: Mutex<HashMap<QueryKey, Arc<SearchResponseCreator>>>,
}

impl SearchResponseCache {
    /// Create a cache over a cluster, sized from the cluster's config.
    pub fn new(cluster: Arc<LocalCluster>) -> Self {
        let config = cluster.config();
        let idle_timeout = config.store_idle_timeout;
        let max_active = config.max_active_stores;
        Self {
            cluster,
            idle_timeout,
            max_active,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the running search for the request's key, starting it if absent.
    pub fn get_or_create(&self, request: SearchRequest) -> Result<Arc<SearchResponseCreator>> {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(&request.key) {
            return Ok(Arc::clone(existing));
        }

        if entries.len() >= self.max_active {
            Self::evict_longest_idle(&mut entries);
        }
        if entries.len() >= self.max_active {
            return Err(FathomError::invalid_operation(format!(
                "Too many concurrent searches ({})",
                entries.len()
            )));
        }

        info!("Starting new search for key {}", request.key);
        let key = request.key.clone();
        let creator = Arc::new(SearchResponseCreator::start(&self.cluster, request));
        entries.insert(key, Arc::clone(&creator));
        Ok(creator)
    }

    /// Remove and destroy the search for a key. Returns whether a search
    /// existed.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(creator) => {
                debug!("Removing search for key {key}");
                creator.destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy every search that has idled past the timeout.
    pub fn evict_expired(&self) {
        let mut entries = self.entries.lock();
        let expired: Vec<QueryKey> = entries
            .iter()
            .filter(|(_, creator)| creator.idle_for() > self.idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(creator) = entries.remove(&key) {
                info!("Evicting idle search for key {key}");
                creator.destroy();
            }
        }
    }

    /// Number of cached searches.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn evict_longest_idle(entries: &mut HashMap<QueryKey, Arc<SearchResponseCreator>>) {
        let victim = entries
            .iter()
            .max_by_key(|(_, creator)| creator.idle_for())
            .map(|(key, _)| key.clone());
        if let Some(key) = victim
            && let Some(creator) = entries.remove(&key)
        {
            info!("Evicting search for key {key} to make room");
            creator.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::dispatcher::ClusterNode;
    use crate::cluster::task::{DataSourceRef, Query};
    use crate::config::SearchConfig;
    use crate::coprocessor::{CoprocessorKey, CoprocessorSettings, TableSettings};
    use crate::dictionary::InMemoryDictionaryStore;
    use crate::expression::{Condition, ExpressionNode};
    use crate::schema::{FieldValue, IndexField, IndexSchema};
    use crate::shard::{IndexShard, ShardDocument};
    use std::thread;

    const INDEX: &str = "idx-1";

    fn doc(feed: &str, id: i64) -> ShardDocument {
        ShardDocument::new()
            .with_field("Feed", FieldValue::Text(feed.to_string()))
            .with_field("EventId", FieldValue::Long(id))
    }

    fn cluster(config: SearchConfig) -> Arc<LocalCluster> {
        Arc::new(
            LocalCluster::new(config, Arc::new(InMemoryDictionaryStore::new()))
                .with_index(
                    INDEX,
                    IndexSchema::new(vec![
                        IndexField::text("Feed"),
                        IndexField::numeric("EventId"),
                    ]),
                )
                .with_node(
                    ClusterNode::new("node1")
                        .with_shard(INDEX, IndexShard::new(1, vec![doc("TEST", 1)])),
                ),
        )
    }

    fn request(key: &str) -> SearchRequest {
        let mut settings = HashMap::new();
        settings.insert(
            CoprocessorKey(1),
            CoprocessorSettings::Table(TableSettings::new(vec!["Feed".to_string()])),
        );
        SearchRequest::new(
            QueryKey::new(key),
            Query::new(
                DataSourceRef::new(INDEX, "Test index"),
                ExpressionNode::term("Feed", Condition::Equals, "TEST"),
            ),
            vec!["Feed".to_string(), "EventId".to_string()],
            settings,
        )
    }

    #[test]
    fn test_same_key_reuses_search() {
        let cache = SearchResponseCache::new(cluster(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
        ));

        let a = cache.get_or_create(request("query-1")).unwrap();
        let b = cache.get_or_create(request("query-1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_polls_start_one_search() {
        let cache = Arc::new(SearchResponseCache::new(cluster(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_create(request("query-1")).unwrap())
            })
            .collect();
        let creators: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(cache.len(), 1);
        for creator in &creators[1..] {
            assert!(Arc::ptr_eq(&creators[0], creator));
        }
    }

    #[test]
    fn test_remove_destroys_search() {
        let cache = SearchResponseCache::new(cluster(
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10)),
        ));

        let creator = cache.get_or_create(request("query-1")).unwrap();
        assert!(cache.remove(&QueryKey::new("query-1")));
        assert!(!cache.remove(&QueryKey::new("query-1")));
        assert!(cache.is_empty());

        // Destruction terminated the search; polling sees completion.
        assert!(creator.poll().complete);
    }

    #[test]
    fn test_full_cache_evicts_to_make_room() {
        let mut config =
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10));
        config.max_active_stores = 2;
        let cache = SearchResponseCache::new(cluster(config));

        let first = cache.get_or_create(request("query-1")).unwrap();
        thread::sleep(Duration::from_millis(5));
        cache.get_or_create(request("query-2")).unwrap();
        thread::sleep(Duration::from_millis(5));
        cache.get_or_create(request("query-3")).unwrap();

        assert_eq!(cache.len(), 2);
        // The longest-idle search was evicted and destroyed.
        assert!(!cache.remove(&QueryKey::new("query-1")));
        assert!(first.is_complete());
    }

    #[test]
    fn test_evict_expired() {
        let mut config =
            SearchConfig::default().with_result_send_frequency(Duration::from_millis(10));
        config.store_idle_timeout = Duration::from_millis(20);
        let cache = SearchResponseCache::new(cluster(config));

        cache.get_or_create(request("query-1")).unwrap();
        cache.evict_expired();
        assert_eq!(cache.len(), 1);

        thread::sleep(Duration::from_millis(40));
        cache.evict_expired();
        assert!(cache.is_empty());
    }
}
