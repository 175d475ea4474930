//! Client-facing search lifecycle.
//!
//! A client polls a search rather than blocking on it: the first request
//! for a query key starts the cluster search and caches its
//! [`SearchResponseCreator`]; subsequent requests with the same key reuse
//! the running search and read its current merged snapshot. Destroying the
//! key (or letting it idle out of the cache) terminates the distributed
//! search.

pub mod cache;
pub mod creator;

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::task::Query;
use crate::coprocessor::{CoprocessorKey, CoprocessorSettings, Payload};

pub use cache::SearchResponseCache;
pub use creator::SearchResponseCreator;

/// Client-chosen identity of a search. Polling with the same key reuses
/// the running search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    /// Create a key.
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything needed to start (or re-poll) a search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Search identity.
    pub key: QueryKey,
    /// The query to run.
    pub query: Query,
    /// Stored fields to extract from each match, in row order.
    pub stored_fields: Vec<String>,
    /// Aggregation configuration, keyed per component.
    pub coprocessor_settings: HashMap<CoprocessorKey, CoprocessorSettings>,
}

impl SearchRequest {
    /// Create a request.
    pub fn new(
        key: QueryKey,
        query: Query,
        stored_fields: Vec<String>,
        coprocessor_settings: HashMap<CoprocessorKey, CoprocessorSettings>,
    ) -> Self {
        Self {
            key,
            query,
            stored_fields,
            coprocessor_settings,
        }
    }
}

/// One poll's view of a search.
///
/// Snapshots are monotonic: each poll reflects at least the merged state of
/// the previous one. `complete` is the only signal that no further results
/// will arrive; an empty result set with `complete` unset just means no
/// node has reported yet.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Merged results per component, trimmed to the configured bound.
    pub results: HashMap<CoprocessorKey, Payload>,
    /// Errors recorded so far, attributed to the node that raised them.
    pub errors: Vec<String>,
    /// Whether the search has finished.
    pub complete: bool,
    /// Literal words for hit highlighting.
    pub highlights: HashSet<String>,
}
