//! Per-entity repositories: the offline-first read path plus network-only writes.
//!
//! Reads return a [`ResourceStream`] driven by the cache layer. Invalid input
//! never reaches the cache or the network: the stream emits `Loading` and then
//! a `Validation` error. Writes are plain async calls that go to the network
//! and then replace the affected cache rows.

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::TokenStore;
use crate::cache::{CacheLayer, SqliteStorage};
use crate::error::{SyncError, SyncResult};
use crate::query::ResourceStream;

use super::cache::ShopQueryKey;
use super::client::ShopClient;
use super::entities::{
  cart_from_items, CartItemEntity, CategoryEntity, OrderEntity, ProductEntity, UserEntity,
};
use super::types::{Cart, Category, Order, Product, User};

/// Items per page for paginated reads
pub const PAGE_SIZE: u32 = 20;

/// Cache key for the profile before the user id is known
const PROFILE_FALLBACK_ID: &str = "me";

// ============================================================================
// Input validation
// ============================================================================

pub(crate) fn validate_id(field: &str, id: &str) -> SyncResult<()> {
  if id.trim().is_empty() {
    return Err(SyncError::validation(field, "must not be empty"));
  }
  if id.contains(['/', '?', '#']) || id.chars().any(char::is_whitespace) {
    return Err(SyncError::validation(field, format!("'{}' is not a valid id", id)));
  }
  Ok(())
}

fn validate_page(page: u32) -> SyncResult<()> {
  if page == 0 {
    return Err(SyncError::validation("page", "pages start at 1"));
  }
  Ok(())
}

fn validate_quantity(quantity: u32) -> SyncResult<()> {
  if quantity == 0 {
    return Err(SyncError::validation("quantity", "must be at least 1"));
  }
  Ok(())
}

pub(crate) fn validate_name(field: &str, value: &str) -> SyncResult<()> {
  if value.trim().is_empty() {
    return Err(SyncError::validation(field, "must not be empty"));
  }
  Ok(())
}

fn validate_email(email: &str) -> SyncResult<()> {
  let valid = email
    .split_once('@')
    .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
  if !valid {
    return Err(SyncError::validation("email", format!("'{}' is not an email address", email)));
  }
  Ok(())
}

/// Writes are network-only; fail before the request when offline.
fn require_online(cache: &CacheLayer<SqliteStorage>) -> SyncResult<()> {
  if cache.is_online() {
    Ok(())
  } else {
    Err(SyncError::offline())
  }
}

// ============================================================================
// Categories
// ============================================================================

#[derive(Clone)]
pub struct CategoryRepository {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
}

impl CategoryRepository {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>) -> Self {
    Self { client, cache }
  }

  pub fn watch_categories(&self) -> ResourceStream<Vec<Category>> {
    let client = self.client.clone();
    self.cache.watch_list(
      &ShopQueryKey::Categories,
      move || async move { client.categories().await },
      |e: CategoryEntity| Category::from(e),
    )
  }

  pub fn invalidate(&self) -> SyncResult<()> {
    self.cache.clear::<CategoryEntity>()
  }
}

// ============================================================================
// Products
// ============================================================================

#[derive(Clone)]
pub struct ProductRepository {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
}

impl ProductRepository {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>) -> Self {
    Self { client, cache }
  }

  /// One page of products, optionally within a category
  pub fn watch_products(&self, category_id: Option<&str>, page: u32) -> ResourceStream<Vec<Product>> {
    let checked = validate_page(page).and_then(|_| match category_id {
      Some(c) => validate_id("category", c),
      None => Ok(()),
    });
    if let Err(e) = checked {
      return ResourceStream::failed(e);
    }

    let key = ShopQueryKey::Products {
      category_id: category_id.map(String::from),
      page,
    };
    let client = self.client.clone();
    let category_id = category_id.map(String::from);

    self.cache.watch_list(
      &key,
      move || async move { client.products(category_id.as_deref(), page, PAGE_SIZE).await },
      |e: ProductEntity| Product::from(e),
    )
  }

  pub fn search(&self, query: &str, page: u32) -> ResourceStream<Vec<Product>> {
    if query.trim().is_empty() {
      return ResourceStream::failed(SyncError::validation("query", "must not be empty"));
    }
    if let Err(e) = validate_page(page) {
      return ResourceStream::failed(e);
    }

    let key = ShopQueryKey::Search {
      query: query.to_string(),
      page,
    };
    let client = self.client.clone();
    let query = query.to_string();

    self.cache.watch_list(
      &key,
      move || async move { client.search_products(&query, page, PAGE_SIZE).await },
      |e: ProductEntity| Product::from(e),
    )
  }

  pub fn watch_product(&self, id: &str) -> ResourceStream<Product> {
    if let Err(e) = validate_id("product", id) {
      return ResourceStream::failed(e);
    }

    let client = self.client.clone();
    let product_id = id.to_string();
    self.cache.watch_one(
      id,
      move || async move { client.product(&product_id).await },
      |e: ProductEntity| Product::from(e),
    )
  }

  pub fn invalidate(&self) -> SyncResult<()> {
    self.cache.clear::<ProductEntity>()
  }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Clone)]
pub struct OrderRepository {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
}

impl OrderRepository {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>) -> Self {
    Self { client, cache }
  }

  pub fn watch_orders(&self, page: u32) -> ResourceStream<Vec<Order>> {
    if let Err(e) = validate_page(page) {
      return ResourceStream::failed(e);
    }

    let client = self.client.clone();
    self.cache.watch_list(
      &ShopQueryKey::Orders { page },
      move || async move { client.orders(page, PAGE_SIZE).await },
      |e: OrderEntity| Order::from(e),
    )
  }

  pub fn watch_order(&self, id: &str) -> ResourceStream<Order> {
    if let Err(e) = validate_id("order", id) {
      return ResourceStream::failed(e);
    }

    let client = self.client.clone();
    let order_id = id.to_string();
    self.cache.watch_one(
      id,
      move || async move { client.order(&order_id).await },
      |e: OrderEntity| Order::from(e),
    )
  }

  /// Place an order from the current cart.
  ///
  /// The cart is emptied server-side, so the cached cart is dropped as well.
  pub async fn place_order(&self, address_id: &str, note: Option<&str>) -> SyncResult<Order> {
    validate_id("address", address_id)?;
    require_online(&self.cache)?;

    let note = note.map(str::trim).filter(|n| !n.is_empty());
    let order = self.client.place_order(address_id, note).await?;
    info!(order = %order.id, "Order placed");

    if let Err(e) = self.cache.put_entity(&order) {
      warn!(order = %order.id, "Failed to cache placed order: {}", e);
    }
    if let Err(e) = self.cache.clear::<CartItemEntity>() {
      warn!("Failed to drop cached cart: {}", e);
    }
    Ok(order.into())
  }

  pub fn invalidate(&self) -> SyncResult<()> {
    self.cache.clear::<OrderEntity>()
  }
}

// ============================================================================
// User profile
// ============================================================================

#[derive(Clone)]
pub struct UserRepository {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
  tokens: Arc<TokenStore>,
}

impl UserRepository {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>, tokens: Arc<TokenStore>) -> Self {
    Self {
      client,
      cache,
      tokens,
    }
  }

  /// The signed-in user's profile, cached under their id.
  pub fn watch_profile(&self) -> ResourceStream<User> {
    let id = self
      .tokens
      .user_id()
      .unwrap_or_else(|| PROFILE_FALLBACK_ID.to_string());
    let client = self.client.clone();
    let tokens = self.tokens.clone();

    self.cache.watch_one(
      &id,
      move || async move {
        let user = client.me().await?;
        tokens.set_user_id(&user.id);
        Ok::<_, SyncError>(user)
      },
      |e: UserEntity| User::from(e),
    )
  }

  pub async fn update_profile(
    &self,
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
  ) -> SyncResult<User> {
    validate_name("first_name", first_name)?;
    validate_name("last_name", last_name)?;
    let email = email.map(str::trim).filter(|e| !e.is_empty());
    if let Some(email) = email {
      validate_email(email)?;
    }
    require_online(&self.cache)?;

    let user = self
      .client
      .update_profile(first_name.trim(), last_name.trim(), email)
      .await?;
    if let Err(e) = self.cache.put_entity(&user) {
      warn!("Failed to cache updated profile: {}", e);
    }
    Ok(user.into())
  }
}

// ============================================================================
// Cart
// ============================================================================

#[derive(Clone)]
pub struct CartRepository {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
}

impl CartRepository {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>) -> Self {
    Self { client, cache }
  }

  pub fn watch_cart(&self) -> ResourceStream<Cart> {
    let client = self.client.clone();
    self.cache.watch_query(
      &ShopQueryKey::Cart,
      move || async move { client.cart().await },
      cart_from_items,
    )
  }

  pub async fn add_item(&self, product_id: &str, quantity: u32) -> SyncResult<Cart> {
    validate_id("product", product_id)?;
    validate_quantity(quantity)?;
    require_online(&self.cache)?;

    let items = self.client.add_to_cart(product_id, quantity).await?;
    Ok(self.replace_cached(items))
  }

  pub async fn update_quantity(&self, item_id: &str, quantity: u32) -> SyncResult<Cart> {
    validate_id("cart item", item_id)?;
    validate_quantity(quantity)?;
    require_online(&self.cache)?;

    let items = self.client.update_cart_item(item_id, quantity).await?;
    Ok(self.replace_cached(items))
  }

  pub async fn remove_item(&self, item_id: &str) -> SyncResult<Cart> {
    validate_id("cart item", item_id)?;
    require_online(&self.cache)?;

    let items = self.client.remove_cart_item(item_id).await?;
    Ok(self.replace_cached(items))
  }

  pub async fn clear(&self) -> SyncResult<()> {
    require_online(&self.cache)?;
    self.client.clear_cart().await?;
    self.replace_cached(Vec::new());
    Ok(())
  }

  /// The server's cart is authoritative: drop every cached row, then store it.
  fn replace_cached(&self, items: Vec<CartItemEntity>) -> Cart {
    let result = self
      .cache
      .clear::<CartItemEntity>()
      .and_then(|_| self.cache.put_query(&ShopQueryKey::Cart, &items));
    if let Err(e) = result {
      warn!("Failed to cache cart: {}", e);
    }
    cart_from_items(items)
  }
}
