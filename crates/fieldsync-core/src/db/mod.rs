//! Database layer for fieldsync

mod cache_repository;
mod connection;
mod metadata_repository;
mod migrations;
mod node_repository;

pub use cache_repository::{CacheRepository, CachedResponse, LibSqlCacheRepository};
pub use connection::{Database, Schema};
pub use metadata_repository::{LibSqlMetadataRepository, MetadataRepository};
pub use migrations::LOCAL_STORE_VERSION;
pub use node_repository::{LibSqlNodeRepository, NodeRepository};
