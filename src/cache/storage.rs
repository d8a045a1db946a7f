//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::traits::Cacheable;
use crate::clock::{Clock, SystemClock};

/// Result of a cached query lookup.
#[derive(Debug, Clone)]
pub struct CachedQueryResult<T> {
  /// The cached entities in order
  pub entities: Vec<T>,
  /// When the query result was cached
  pub cached_at: DateTime<Utc>,
}

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Writes are upserts keyed by entity id: concurrent writers never corrupt a
/// row, the last writer wins.
pub trait CacheStorage: Send + Sync {
  /// Store entities from a query result, replacing the previous result for `key`.
  fn store_query_result<T: Cacheable>(&self, key: &str, description: &str, entities: &[T])
    -> Result<()>;

  /// Get cached entities for a query.
  fn get_query_result<T: Cacheable>(&self, key: &str) -> Result<Option<CachedQueryResult<T>>>;

  /// Get a single entity by id.
  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>>;

  /// Store a single entity.
  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()>;

  /// Delete a single entity.
  fn remove_entity<T: Cacheable>(&self, entity_key: &str) -> Result<()>;

  /// Delete entities and query results of type `T` cached before `cutoff`.
  fn purge_older_than<T: Cacheable>(&self, cutoff: DateTime<Utc>) -> Result<usize>;

  /// Delete every cached entity and query result of type `T`.
  fn clear<T: Cacheable>(&self) -> Result<()>;

  /// Delete everything.
  fn clear_all(&self) -> Result<()>;
}

/// Tables that hold entities. `Cacheable::entity_type` must name one of these.
pub const ENTITY_TABLES: [&str; 5] = ["products", "categories", "orders", "users", "cart_items"];

/// Ordered, additive schema migrations. Index + 1 is the schema version.
/// Never edit or remove an entry, append a new one.
const MIGRATIONS: [&str; 2] = [
  r#"
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cart_items (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    updated_at TEXT,
    cached_at TEXT NOT NULL
);

-- Query result tracking
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_description TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    result_count INTEGER NOT NULL
);

-- Query to entity mapping (preserves order)
CREATE TABLE IF NOT EXISTS query_results (
    query_hash TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (query_hash, entity_key),
    FOREIGN KEY (query_hash) REFERENCES query_cache(query_hash) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_query_results_hash ON query_results(query_hash);
"#,
  r#"
CREATE INDEX IF NOT EXISTS idx_products_cached_at ON products(cached_at);
CREATE INDEX IF NOT EXISTS idx_categories_cached_at ON categories(cached_at);
CREATE INDEX IF NOT EXISTS idx_orders_cached_at ON orders(cached_at);
CREATE INDEX IF NOT EXISTS idx_users_cached_at ON users(cached_at);
CREATE INDEX IF NOT EXISTS idx_cart_items_cached_at ON cart_items(cached_at);
CREATE INDEX IF NOT EXISTS idx_query_cache_type ON query_cache(entity_type, cached_at);
"#,
];

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Private in-memory database, mostly for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(mut conn: Connection) -> Result<Self> {
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;
    run_migrations(&mut conn)?;

    Ok(Self {
      conn: Mutex::new(conn),
      clock: Arc::new(SystemClock),
    })
  }

  /// Use `clock` for `cached_at` timestamps.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn now(&self) -> String {
    format_datetime(self.clock.now())
  }
}

/// Apply pending migrations, refusing databases written by a newer build.
fn run_migrations(conn: &mut Connection) -> Result<()> {
  let version: i64 = conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read cache schema version: {}", e))?;

  let known = MIGRATIONS.len() as i64;
  if version > known {
    return Err(eyre!(
      "Cache schema version {} is newer than this build supports ({}); refusing to open it",
      version,
      known
    ));
  }

  for (index, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
    let target = index as i64 + 1;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin migration {}: {}", target, e))?;
    tx.execute_batch(sql)
      .map_err(|e| eyre!("Failed to apply cache migration {}: {}", target, e))?;
    tx.execute_batch(&format!("PRAGMA user_version = {}", target))
      .map_err(|e| eyre!("Failed to record cache migration {}: {}", target, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit cache migration {}: {}", target, e))?;
    info!(version = target, "Applied cache migration");
  }

  Ok(())
}

fn table<T: Cacheable>() -> Result<&'static str> {
  let name = T::entity_type();
  if ENTITY_TABLES.contains(&name) {
    Ok(name)
  } else {
    Err(eyre!("Unknown cache table: {}", name))
  }
}

impl CacheStorage for SqliteStorage {
  fn store_query_result<T: Cacheable>(
    &self,
    key: &str,
    description: &str,
    entities: &[T],
  ) -> Result<()> {
    let table = table::<T>()?;
    let now = self.now();
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM query_results WHERE query_hash = ?",
      params![key],
    )
    .map_err(|e| eyre!("Failed to delete old query results: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO query_cache (query_hash, query_description, entity_type, cached_at, result_count)
       VALUES (?, ?, ?, ?, ?)",
      params![key, description, table, now, entities.len()],
    )
    .map_err(|e| eyre!("Failed to update query cache: {}", e))?;

    let upsert = format!(
      "INSERT OR REPLACE INTO {} (id, data, updated_at, cached_at) VALUES (?, ?, ?, ?)",
      table
    );

    for (position, entity) in entities.iter().enumerate() {
      let entity_key = entity.cache_key();
      let data =
        serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
      let updated_at = entity.updated_at().map(format_datetime);

      tx.execute(&upsert, params![entity_key, data, updated_at, now])
        .map_err(|e| eyre!("Failed to store entity: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO query_results (query_hash, entity_key, position)
         VALUES (?, ?, ?)",
        params![key, entity_key, position],
      )
      .map_err(|e| eyre!("Failed to store query result: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(table, key, count = entities.len(), "Stored query result");
    Ok(())
  }

  fn get_query_result<T: Cacheable>(&self, key: &str) -> Result<Option<CachedQueryResult<T>>> {
    let table = table::<T>()?;
    let conn = self.lock()?;

    let cached_at_str: Option<String> = conn
      .query_row(
        "SELECT cached_at FROM query_cache WHERE query_hash = ? AND entity_type = ?",
        params![key, table],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read query cache: {}", e))?;

    let Some(cached_at_str) = cached_at_str else {
      return Ok(None);
    };
    let cached_at = parse_datetime(&cached_at_str)?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT e.data FROM {} e
         INNER JOIN query_results qr ON e.id = qr.entity_key
         WHERE qr.query_hash = ?
         ORDER BY qr.position",
        table
      ))
      .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![key], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query entities: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entity row: {}", e))?;

    let entities = rows
      .iter()
      .filter_map(|data| match serde_json::from_slice::<T>(data) {
        Ok(entity) => Some(entity),
        Err(e) => {
          warn!(table, "Skipping undecodable cache row: {}", e);
          None
        }
      })
      .collect();

    Ok(Some(CachedQueryResult {
      entities,
      cached_at,
    }))
  }

  fn get_entity<T: Cacheable>(&self, entity_key: &str) -> Result<Option<CachedEntity<T>>> {
    let table = table::<T>()?;
    let conn = self.lock()?;

    let result: Option<(Vec<u8>, String)> = conn
      .query_row(
        &format!("SELECT data, cached_at FROM {} WHERE id = ?", table),
        params![entity_key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entity: {}", e))?;

    match result {
      Some((data, cached_at_str)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { entity, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    let table = table::<T>()?;
    let now = self.now();
    let conn = self.lock()?;
    let data =
      serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
    let updated_at = entity.updated_at().map(format_datetime);

    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, data, updated_at, cached_at) VALUES (?, ?, ?, ?)",
          table
        ),
        params![entity.cache_key(), data, updated_at, now],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;

    Ok(())
  }

  fn remove_entity<T: Cacheable>(&self, entity_key: &str) -> Result<()> {
    let table = table::<T>()?;
    let conn = self.lock()?;

    conn
      .execute(
        &format!("DELETE FROM {} WHERE id = ?", table),
        params![entity_key],
      )
      .map_err(|e| eyre!("Failed to delete entity: {}", e))?;
    conn
      .execute(
        "DELETE FROM query_results WHERE entity_key = ? AND query_hash IN
           (SELECT query_hash FROM query_cache WHERE entity_type = ?)",
        params![entity_key, table],
      )
      .map_err(|e| eyre!("Failed to delete query result rows: {}", e))?;

    Ok(())
  }

  fn purge_older_than<T: Cacheable>(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let table = table::<T>()?;
    let cutoff = format_datetime(cutoff);
    let conn = self.lock()?;

    let removed = conn
      .execute(
        &format!("DELETE FROM {} WHERE cached_at < ?", table),
        params![cutoff],
      )
      .map_err(|e| eyre!("Failed to purge stale entities: {}", e))?;
    conn
      .execute(
        "DELETE FROM query_cache WHERE entity_type = ? AND cached_at < ?",
        params![table, cutoff],
      )
      .map_err(|e| eyre!("Failed to purge stale query results: {}", e))?;

    if removed > 0 {
      debug!(table, removed, "Purged stale cache rows");
    }
    Ok(removed)
  }

  fn clear<T: Cacheable>(&self) -> Result<()> {
    let table = table::<T>()?;
    let conn = self.lock()?;

    conn
      .execute_batch(&format!(
        "DELETE FROM {table};
         DELETE FROM query_cache WHERE entity_type = '{table}';"
      ))
      .map_err(|e| eyre!("Failed to clear {}: {}", table, e))?;
    Ok(())
  }

  fn clear_all(&self) -> Result<()> {
    let conn = self.lock()?;
    let mut sql = String::from("DELETE FROM query_results; DELETE FROM query_cache;");
    for table in ENTITY_TABLES {
      sql.push_str(&format!(" DELETE FROM {};", table));
    }

    conn
      .execute_batch(&sql)
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    info!("Cleared local cache");
    Ok(())
  }
}

/// Fixed-width UTC timestamps so string comparison matches time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use chrono::{Duration, TimeZone};
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Row {
    id: String,
    name: String,
  }

  impl Cacheable for Row {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
      None
    }

    fn entity_type() -> &'static str {
      "categories"
    }
  }

  #[derive(Debug, Clone, Serialize, Deserialize)]
  struct Rogue;

  impl Cacheable for Rogue {
    fn cache_key(&self) -> String {
      "x".to_string()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
      None
    }

    fn entity_type() -> &'static str {
      "sqlite_master"
    }
  }

  fn row(id: &str, name: &str) -> Row {
    Row {
      id: id.to_string(),
      name: name.to_string(),
    }
  }

  #[test]
  fn test_query_result_preserves_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let rows = vec![row("b", "Rings"), row("a", "Necklaces"), row("c", "Bracelets")];
    storage.store_query_result("all", "all categories", &rows).unwrap();

    let cached = storage.get_query_result::<Row>("all").unwrap().unwrap();
    assert_eq!(cached.entities, rows);
  }

  #[test]
  fn test_missing_query_is_none() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.get_query_result::<Row>("nope").unwrap().is_none());
    assert!(storage.get_entity::<Row>("nope").unwrap().is_none());
  }

  #[test]
  fn test_upsert_replaces_by_id() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store_entity(&row("a", "Old")).unwrap();
    storage.store_entity(&row("a", "New")).unwrap();

    let cached = storage.get_entity::<Row>("a").unwrap().unwrap();
    assert_eq!(cached.entity.name, "New");
  }

  #[test]
  fn test_replacing_query_result_drops_old_membership() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .store_query_result("all", "all", &[row("a", "A"), row("b", "B")])
      .unwrap();
    storage.store_query_result("all", "all", &[row("b", "B2")]).unwrap();

    let cached = storage.get_query_result::<Row>("all").unwrap().unwrap();
    assert_eq!(cached.entities, vec![row("b", "B2")]);
  }

  #[test]
  fn test_purge_older_than() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()));
    let storage = SqliteStorage::open_in_memory()
      .unwrap()
      .with_clock(clock.clone());

    storage.store_query_result("all", "all", &[row("a", "A")]).unwrap();
    clock.advance(Duration::minutes(10));
    storage.store_entity(&row("b", "B")).unwrap();

    let removed = storage
      .purge_older_than::<Row>(clock.now() - Duration::minutes(5))
      .unwrap();
    assert_eq!(removed, 1);
    assert!(storage.get_query_result::<Row>("all").unwrap().is_none());
    assert!(storage.get_entity::<Row>("a").unwrap().is_none());
    assert!(storage.get_entity::<Row>("b").unwrap().is_some());
  }

  #[test]
  fn test_remove_entity_drops_it_from_queries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .store_query_result("all", "all", &[row("a", "A"), row("b", "B")])
      .unwrap();
    storage.remove_entity::<Row>("a").unwrap();

    let cached = storage.get_query_result::<Row>("all").unwrap().unwrap();
    assert_eq!(cached.entities, vec![row("b", "B")]);
  }

  #[test]
  fn test_clear_all() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store_query_result("all", "all", &[row("a", "A")]).unwrap();
    storage.clear_all().unwrap();
    assert!(storage.get_query_result::<Row>("all").unwrap().is_none());
    assert!(storage.get_entity::<Row>("a").unwrap().is_none());
  }

  #[test]
  fn test_unknown_table_is_rejected() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.store_entity(&Rogue).is_err());
  }

  #[test]
  fn test_migrations_are_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.store_entity(&row("a", "A")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert!(storage.get_entity::<Row>("a").unwrap().is_some());

    let conn = storage.lock().unwrap();
    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |r| r.get(0))
      .unwrap();
    assert_eq!(version, MIGRATIONS.len() as i64);
  }

  #[test]
  fn test_newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    {
      let conn = Connection::open(&path).unwrap();
      conn.execute_batch("PRAGMA user_version = 99").unwrap();
    }

    let err = SqliteStorage::open(&path).err().unwrap();
    assert!(err.to_string().contains("newer than this build"));
  }
}
