//! Local cache for offline-first reads.
//!
//! This module provides an entity-agnostic caching mechanism that:
//! - Caches entities by id, one SQLite table per entity type
//! - Caches ordered query results (lists) that reference those entities
//! - Emits cached data first, then fresh network data, through a stream
//! - Serves the cache alone when the device is offline
//! - Expires rows per entity type after a configurable age

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, CachedEntity, CachedQueryResult, SqliteStorage, ENTITY_TABLES};
pub use traits::{Cacheable, DataSource, QueryKey};
