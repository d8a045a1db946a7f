//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for entities that can be cached.
///
/// Implementors provide a unique id within their table and, when the entity
/// tracks it, the server-side modification time.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity within its table
  fn cache_key(&self) -> String;

  /// Last modification timestamp reported by the server
  fn updated_at(&self) -> Option<DateTime<Utc>>;

  /// Table the entity is stored in (e.g., "products", "orders")
  fn entity_type() -> &'static str;
}

/// Key for a cached query result (a list of entities in server order).
pub trait QueryKey {
  /// Stable, fixed-length key used as the primary key in storage
  fn cache_hash(&self) -> String;

  /// Human-readable description, stored alongside for debugging
  fn description(&self) -> String;
}

impl QueryKey for str {
  fn cache_hash(&self) -> String {
    self.to_string()
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

/// Indicates where emitted data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Served from the local cache, written at `cached_at`
  Cache { cached_at: DateTime<Utc> },
  /// Fresh data from the network, already written to the cache
  Network,
}

impl DataSource {
  pub fn is_cache(&self) -> bool {
    matches!(self, DataSource::Cache { .. })
  }
}
