//! # Fathom
//!
//! A cluster search coordination and result-merging engine.
//!
//! ## Features
//!
//! - Boolean expression trees translated to executable index queries
//! - Sharded, parallel search with cooperative cancellation
//! - Mergeable per-node aggregation payloads (tables, event windows)
//! - Periodic result streaming from searching nodes to the coordinator
//! - Poll-driven client access with cached, idle-evicted search stores

pub mod cluster;
pub mod config;
pub mod coprocessor;
pub mod dictionary;
pub mod error;
pub mod expression;
pub mod query;
pub mod result;
pub mod schema;
pub mod shard;
pub mod store;

pub mod prelude {
    //! Convenience re-exports for embedding the engine.

    pub use crate::cluster::{ClusterNode, DataSourceRef, LocalCluster, Query, TerminationToken};
    pub use crate::config::SearchConfig;
    pub use crate::coprocessor::{CoprocessorKey, CoprocessorSettings, Payload};
    pub use crate::dictionary::{DictionaryStore, InMemoryDictionaryStore};
    pub use crate::error::{FathomError, Result};
    pub use crate::expression::{Condition, ExpressionNode, Op};
    pub use crate::schema::{FieldType, FieldValue, IndexField, IndexSchema};
    pub use crate::shard::{IndexShard, ShardDocument};
    pub use crate::store::{
        QueryKey, SearchRequest, SearchResponse, SearchResponseCache, SearchResponseCreator,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
