//! Cache layer that orchestrates the cache-then-network read path.

use chrono::Duration;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{Cacheable, DataSource, QueryKey};
use crate::clock::{Clock, SystemClock};
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::query::{Emitter, Resource, ResourceStream};

/// Cache layer that combines local storage with network fetches.
///
/// Every read emits `Loading`, then the cached value if there is one, then
/// either the freshly fetched value (after writing it to the cache) or a
/// classified error. A network error never retracts an earlier cached
/// `Success`; reconciling the two is up to the consumer.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  connectivity: Arc<dyn Connectivity>,
  clock: Arc<dyn Clock>,
  /// Per-table maximum age; older rows are purged before being served
  ttls: Arc<HashMap<&'static str, Duration>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>, connectivity: Arc<dyn Connectivity>) -> Self {
    Self {
      storage,
      connectivity,
      clock: Arc::new(SystemClock),
      ttls: Arc::new(HashMap::new()),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Expire cached `T` rows after `ttl`.
  pub fn with_ttl<T: Cacheable>(mut self, ttl: Duration) -> Self {
    Arc::make_mut(&mut self.ttls).insert(T::entity_type(), ttl);
    self
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Read a query result, assembling the entity list into `D`.
  ///
  /// `fetcher` is only invoked when the device is online.
  pub fn watch_query<K, T, D, F, Fut, M>(&self, key: &K, fetcher: F, assemble: M) -> ResourceStream<D>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
    D: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<Vec<T>>> + Send + 'static,
    M: Fn(Vec<T>) -> D + Send + Sync + 'static,
  {
    let layer = self.clone();
    let hash = key.cache_hash();
    let description = key.description();

    ResourceStream::spawn(move |out| async move {
      layer
        .run_query(&hash, &description, fetcher, assemble, out)
        .await
    })
  }

  /// Read a query result, mapping each entity into `D`.
  pub fn watch_list<K, T, D, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
    map: fn(T) -> D,
  ) -> ResourceStream<Vec<D>>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
    D: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<Vec<T>>> + Send + 'static,
  {
    self.watch_query(key, fetcher, move |entities: Vec<T>| {
      entities.into_iter().map(map).collect()
    })
  }

  /// Read a single entity by id.
  pub fn watch_one<T, D, F, Fut>(&self, id: &str, fetcher: F, map: fn(T) -> D) -> ResourceStream<D>
  where
    T: Cacheable,
    D: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<T>> + Send + 'static,
  {
    let layer = self.clone();
    let id = id.to_string();

    ResourceStream::spawn(move |out| async move { layer.run_one(&id, fetcher, map, out).await })
  }

  async fn run_query<T, D, F, Fut, M>(
    &self,
    key: &str,
    description: &str,
    fetcher: F,
    assemble: M,
    out: Emitter<D>,
  ) where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Vec<T>>>,
    M: Fn(Vec<T>) -> D,
  {
    if !out.emit(Resource::Loading).await {
      return;
    }

    self.expire::<T>();
    let cached = match self.storage.get_query_result::<T>(key) {
      Ok(Some(cached)) if !cached.entities.is_empty() => Some(cached),
      Ok(_) => None,
      Err(e) => {
        warn!(key = description, "Cache read failed: {:#}", e);
        None
      }
    };

    let had_cache = cached.is_some();
    if let Some(cached) = cached {
      debug!(key = description, count = cached.entities.len(), "Cache hit");
      let state = Resource::Success {
        data: assemble(cached.entities),
        source: DataSource::Cache {
          cached_at: cached.cached_at,
        },
      };
      if !out.emit(state).await {
        return;
      }
    }

    if !self.connectivity.is_online() {
      debug!(key = description, had_cache, "Offline, skipping network");
      if !had_cache {
        out.emit(Resource::Error(SyncError::offline())).await;
      }
      return;
    }

    match fetcher().await {
      Ok(entities) => {
        if let Err(e) = self
          .storage
          .store_query_result(key, description, &entities)
        {
          warn!(key = description, "Cache write failed: {:#}", e);
        }
        out
          .emit(Resource::Success {
            data: assemble(entities),
            source: DataSource::Network,
          })
          .await;
      }
      Err(e) => {
        debug!(key = description, kind = ?e.kind(), "Network fetch failed: {}", e);
        out.emit(Resource::Error(e)).await;
      }
    }
  }

  async fn run_one<T, D, F, Fut>(&self, id: &str, fetcher: F, map: fn(T) -> D, out: Emitter<D>)
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
  {
    if !out.emit(Resource::Loading).await {
      return;
    }

    self.expire::<T>();
    let cached = match self.storage.get_entity::<T>(id) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(table = T::entity_type(), id, "Cache read failed: {:#}", e);
        None
      }
    };

    let had_cache = cached.is_some();
    if let Some(cached) = cached {
      let state = Resource::Success {
        data: map(cached.entity),
        source: DataSource::Cache {
          cached_at: cached.cached_at,
        },
      };
      if !out.emit(state).await {
        return;
      }
    }

    if !self.connectivity.is_online() {
      if !had_cache {
        out.emit(Resource::Error(SyncError::offline())).await;
      }
      return;
    }

    match fetcher().await {
      Ok(entity) => {
        if let Err(e) = self.storage.store_entity(&entity) {
          warn!(table = T::entity_type(), id, "Cache write failed: {:#}", e);
        }
        out
          .emit(Resource::Success {
            data: map(entity),
            source: DataSource::Network,
          })
          .await;
      }
      Err(e) => {
        out.emit(Resource::Error(e)).await;
      }
    }
  }

  /// Apply the TTL of `T`, if it has one. Failures only cost freshness.
  fn expire<T: Cacheable>(&self) {
    let Some(ttl) = self.ttls.get(T::entity_type()) else {
      return;
    };
    let cutoff = self.clock.now() - *ttl;
    if let Err(e) = self.storage.purge_older_than::<T>(cutoff) {
      warn!(table = T::entity_type(), "Failed to purge stale rows: {:#}", e);
    }
  }

  /// Replace a cached query result after a write.
  pub fn put_query<K: QueryKey + ?Sized, T: Cacheable>(
    &self,
    key: &K,
    entities: &[T],
  ) -> SyncResult<()> {
    self
      .storage
      .store_query_result(&key.cache_hash(), &key.description(), entities)
      .map_err(|e| SyncError::from_storage(&e))
  }

  pub fn put_entity<T: Cacheable>(&self, entity: &T) -> SyncResult<()> {
    self
      .storage
      .store_entity(entity)
      .map_err(|e| SyncError::from_storage(&e))
  }

  pub fn remove_entity<T: Cacheable>(&self, id: &str) -> SyncResult<()> {
    self
      .storage
      .remove_entity::<T>(id)
      .map_err(|e| SyncError::from_storage(&e))
  }

  pub fn clear<T: Cacheable>(&self) -> SyncResult<()> {
    self
      .storage
      .clear::<T>()
      .map_err(|e| SyncError::from_storage(&e))
  }

  pub fn clear_all(&self) -> SyncResult<()> {
    self
      .storage
      .clear_all()
      .map_err(|e| SyncError::from_storage(&e))
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      connectivity: Arc::clone(&self.connectivity),
      clock: Arc::clone(&self.clock),
      ttls: Arc::clone(&self.ttls),
    }
  }
}
