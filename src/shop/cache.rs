//! Caching implementations for shop entities.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, QueryKey};

use super::entities::{CartItemEntity, CategoryEntity, OrderEntity, ProductEntity, UserEntity};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for CategoryEntity {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    // Categories carry no modification time
    None
  }

  fn entity_type() -> &'static str {
    "categories"
  }
}

impl Cacheable for ProductEntity {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    Some(self.updated_at)
  }

  fn entity_type() -> &'static str {
    "products"
  }
}

impl Cacheable for OrderEntity {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    Some(self.updated_at)
  }

  fn entity_type() -> &'static str {
    "orders"
  }
}

impl Cacheable for UserEntity {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  fn entity_type() -> &'static str {
    "users"
  }
}

impl Cacheable for CartItemEntity {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  fn entity_type() -> &'static str {
    "cart_items"
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Query key types for marketplace reads.
#[derive(Clone, Debug, PartialEq)]
pub enum ShopQueryKey {
  /// All categories
  Categories,
  /// One page of products, optionally within a category
  Products {
    category_id: Option<String>,
    page: u32,
  },
  /// One page of a product search
  Search { query: String, page: u32 },
  /// One page of the signed-in user's orders
  Orders { page: u32 },
  /// The signed-in user's cart
  Cart,
}

impl QueryKey for ShopQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::Categories => "categories".to_string(),
      Self::Products { category_id, page } => format!(
        "products:{}:{}",
        category_id.as_deref().unwrap_or(""),
        page
      ),
      Self::Search { query, page } => format!("search:{}:{}", normalize_query(query), page),
      Self::Orders { page } => format!("orders:{}", page),
      Self::Cart => "cart".to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::Categories => "all categories".to_string(),
      Self::Products { category_id, page } => match category_id {
        Some(c) => format!("products in {} (page {})", c, page),
        None => format!("products (page {})", page),
      },
      Self::Search { query, page } => format!("search '{}' (page {})", query, page),
      Self::Orders { page } => format!("orders (page {})", page),
      Self::Cart => "cart".to_string(),
    }
  }
}

/// Trims and lowercases so equivalent searches share a cache row.
fn normalize_query(query: &str) -> String {
  query.trim().to_lowercase()
}
