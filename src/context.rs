//! Explicit wiring of the sync layer.
//!
//! A `SyncContext` is built once at process start and handed to whatever
//! drives it. There is no global access path to any of its parts.

use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{ApiClient, HttpTransport};
use crate::auth::{EncryptedFileStore, MemoryStore, SecureStore, TokenRefresher, TokenStore};
use crate::cache::{CacheLayer, SqliteStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::shop::entities::CategoryEntity;
use crate::shop::{
  AuthRefreshEndpoint, AuthService, CartRepository, CategoryRepository, OrderRepository,
  ProductRepository, ShopClient, UserRepository,
};

pub struct SyncContext {
  pub tokens: Arc<TokenStore>,
  pub connectivity: Arc<ConnectivityMonitor>,
  pub cache: CacheLayer<SqliteStorage>,
  pub auth: AuthService,
  pub categories: CategoryRepository,
  pub products: ProductRepository,
  pub orders: OrderRepository,
  pub users: UserRepository,
  pub cart: CartRepository,
}

impl SyncContext {
  /// Build the context with the on-disk secure store and cache database.
  pub fn new(config: &Config) -> Result<Self> {
    let (store_path, key_path) = Config::secure_store_paths()?;
    let secure = open_secure_store(&store_path, &key_path);
    let storage = SqliteStorage::open(&config.cache_path()?)?;
    Self::with_parts(config, secure, storage, Arc::new(SystemClock))
  }

  /// Build the context around a cache database at `cache_path`.
  pub fn with_cache_path(
    config: &Config,
    secure: Arc<dyn SecureStore>,
    cache_path: &Path,
  ) -> Result<Self> {
    let storage = SqliteStorage::open(cache_path)?;
    Self::with_parts(config, secure, storage, Arc::new(SystemClock))
  }

  pub fn with_parts(
    config: &Config,
    secure: Arc<dyn SecureStore>,
    storage: SqliteStorage,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let base_url = config.base_url()?;
    info!(%base_url, "Initializing sync layer");

    let tokens = Arc::new(TokenStore::new(
      secure,
      clock.clone(),
      config.refresh_buffer(),
    ));

    let transport = HttpTransport::new(
      base_url,
      config.retry_policy(),
      config.request_timeout(),
      config.connect_timeout(),
    )?;
    let refresher = Arc::new(TokenRefresher::new(
      tokens.clone(),
      Arc::new(AuthRefreshEndpoint::new(transport.clone())),
    ));
    let client = ShopClient::new(ApiClient::new(transport, refresher));

    // Assume online until a probe or the host says otherwise.
    let connectivity = Arc::new(ConnectivityMonitor::new(true));
    let cache = CacheLayer::new(
      Arc::new(storage.with_clock(clock.clone())),
      connectivity.clone(),
    )
    .with_clock(clock)
    .with_ttl::<CategoryEntity>(config.category_ttl());

    Ok(Self {
      auth: AuthService::new(client.clone(), cache.clone(), tokens.clone()),
      categories: CategoryRepository::new(client.clone(), cache.clone()),
      products: ProductRepository::new(client.clone(), cache.clone()),
      orders: OrderRepository::new(client.clone(), cache.clone()),
      users: UserRepository::new(client.clone(), cache.clone(), tokens.clone()),
      cart: CartRepository::new(client, cache.clone()),
      tokens,
      connectivity,
      cache,
    })
  }
}

/// Open the encrypted store, or fall back to an empty in-memory one so a
/// damaged store leaves the user signed out instead of failing startup.
fn open_secure_store(store_path: &Path, key_path: &Path) -> Arc<dyn SecureStore> {
  match EncryptedFileStore::open(store_path, key_path) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      error!(
        path = %store_path.display(),
        "Secure store unavailable, continuing signed out: {:#}",
        e
      );
      Arc::new(MemoryStore::default())
    }
  }
}
