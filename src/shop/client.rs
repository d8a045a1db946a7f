//! Marketplace REST endpoints.
//!
//! Every method returns cache entities; wire DTOs never leave this module.

use async_trait::async_trait;

use crate::api::{ApiClient, ApiRequest, AuthPolicy, HttpTransport, Page};
use crate::auth::{RefreshBackend, TokenGrant};
use crate::error::SyncResult;

use super::api_types::{
  into_entities, AddToCartRequest, AuthResponseDto, CartDto, CategoryDto, LoginRequest, OrderDto,
  PlaceOrderRequest, ProductDto, RefreshRequest, RegisterRequest, TokenDto, UpdateCartItemRequest,
  UpdateProfileRequest, UserDto,
};
use super::entities::{CartItemEntity, CategoryEntity, OrderEntity, ProductEntity, UserEntity};

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthSession {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_in: i64,
  pub user: UserEntity,
}

impl TryFrom<AuthResponseDto> for AuthSession {
  type Error = crate::error::SyncError;

  fn try_from(dto: AuthResponseDto) -> Result<Self, Self::Error> {
    Ok(AuthSession {
      access_token: dto.access_token,
      refresh_token: dto.refresh_token,
      expires_in: dto.expires_in,
      user: UserEntity::try_from(dto.user)?,
    })
  }
}

/// Marketplace API client
#[derive(Clone)]
pub struct ShopClient {
  api: ApiClient,
}

impl ShopClient {
  pub fn new(api: ApiClient) -> Self {
    Self { api }
  }

  // ==========================================================================
  // Catalog
  // ==========================================================================

  pub async fn categories(&self) -> SyncResult<Vec<CategoryEntity>> {
    let dtos: Vec<CategoryDto> = self.api.fetch(ApiRequest::get("categories")).await?;
    into_entities(dtos)
  }

  /// One page of products, optionally restricted to a category
  pub async fn products(
    &self,
    category_id: Option<&str>,
    page: u32,
    page_size: u32,
  ) -> SyncResult<Vec<ProductEntity>> {
    let mut request = ApiRequest::get("products")
      .query("page", page)
      .query("pageSize", page_size);
    if let Some(category) = category_id {
      request = request.query("categoryId", category);
    }

    let page: Page<ProductDto> = self.api.fetch(request).await?;
    into_entities(page.items)
  }

  pub async fn search_products(
    &self,
    query: &str,
    page: u32,
    page_size: u32,
  ) -> SyncResult<Vec<ProductEntity>> {
    let request = ApiRequest::get("products/search")
      .query("q", query.trim())
      .query("page", page)
      .query("pageSize", page_size);

    let page: Page<ProductDto> = self.api.fetch(request).await?;
    into_entities(page.items)
  }

  pub async fn product(&self, id: &str) -> SyncResult<ProductEntity> {
    let dto: ProductDto = self
      .api
      .fetch(ApiRequest::get(format!("products/{}", id)))
      .await?;
    ProductEntity::try_from(dto)
  }

  // ==========================================================================
  // Cart
  // ==========================================================================

  pub async fn cart(&self) -> SyncResult<Vec<CartItemEntity>> {
    let dto: CartDto = self
      .api
      .fetch(ApiRequest::get("cart").auth(AuthPolicy::Required))
      .await?;
    dto.into_entities()
  }

  /// Add a product; returns the whole updated cart
  pub async fn add_to_cart(&self, product_id: &str, quantity: u32) -> SyncResult<Vec<CartItemEntity>> {
    let request = ApiRequest::post("cart/items")
      .json(&AddToCartRequest {
        product_id,
        quantity,
      })?
      .auth(AuthPolicy::Required);

    let dto: CartDto = self.api.fetch(request).await?;
    dto.into_entities()
  }

  pub async fn update_cart_item(&self, item_id: &str, quantity: u32) -> SyncResult<Vec<CartItemEntity>> {
    let request = ApiRequest::put(format!("cart/items/{}", item_id))
      .json(&UpdateCartItemRequest { quantity })?
      .auth(AuthPolicy::Required);

    let dto: CartDto = self.api.fetch(request).await?;
    dto.into_entities()
  }

  pub async fn remove_cart_item(&self, item_id: &str) -> SyncResult<Vec<CartItemEntity>> {
    let request = ApiRequest::delete(format!("cart/items/{}", item_id)).auth(AuthPolicy::Required);

    let dto: CartDto = self.api.fetch(request).await?;
    dto.into_entities()
  }

  pub async fn clear_cart(&self) -> SyncResult<()> {
    self
      .api
      .send(ApiRequest::delete("cart").auth(AuthPolicy::Required))
      .await
  }

  // ==========================================================================
  // Orders
  // ==========================================================================

  pub async fn orders(&self, page: u32, page_size: u32) -> SyncResult<Vec<OrderEntity>> {
    let request = ApiRequest::get("orders")
      .query("page", page)
      .query("pageSize", page_size)
      .auth(AuthPolicy::Required);

    let page: Page<OrderDto> = self.api.fetch(request).await?;
    into_entities(page.items)
  }

  pub async fn order(&self, id: &str) -> SyncResult<OrderEntity> {
    let dto: OrderDto = self
      .api
      .fetch(ApiRequest::get(format!("orders/{}", id)).auth(AuthPolicy::Required))
      .await?;
    OrderEntity::try_from(dto)
  }

  pub async fn place_order(&self, address_id: &str, note: Option<&str>) -> SyncResult<OrderEntity> {
    let request = ApiRequest::post("orders")
      .json(&PlaceOrderRequest { address_id, note })?
      .auth(AuthPolicy::Required);

    let dto: OrderDto = self.api.fetch(request).await?;
    OrderEntity::try_from(dto)
  }

  // ==========================================================================
  // Users and auth
  // ==========================================================================

  pub async fn me(&self) -> SyncResult<UserEntity> {
    let dto: UserDto = self
      .api
      .fetch(ApiRequest::get("users/me").auth(AuthPolicy::Required))
      .await?;
    UserEntity::try_from(dto)
  }

  pub async fn update_profile(
    &self,
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
  ) -> SyncResult<UserEntity> {
    let request = ApiRequest::put("users/me")
      .json(&UpdateProfileRequest {
        first_name,
        last_name,
        email,
      })?
      .auth(AuthPolicy::Required);

    let dto: UserDto = self.api.fetch(request).await?;
    UserEntity::try_from(dto)
  }

  pub async fn login(&self, phone: &str, password: &str) -> SyncResult<AuthSession> {
    let request = ApiRequest::post("auth/login")
      .json(&LoginRequest { phone, password })?
      .auth(AuthPolicy::Anonymous);

    let dto: AuthResponseDto = self.api.fetch(request).await?;
    AuthSession::try_from(dto)
  }

  pub async fn register(
    &self,
    phone: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
  ) -> SyncResult<AuthSession> {
    let request = ApiRequest::post("auth/register")
      .json(&RegisterRequest {
        phone,
        password,
        first_name,
        last_name,
      })?
      .auth(AuthPolicy::Anonymous);

    let dto: AuthResponseDto = self.api.fetch(request).await?;
    AuthSession::try_from(dto)
  }

  /// Revoke the session server-side
  pub async fn logout(&self) -> SyncResult<()> {
    self.api.send(ApiRequest::post("auth/logout")).await
  }
}

/// Refresh endpoint used by the token refresher. Goes straight to the
/// transport so a refresh can never trigger another refresh.
#[derive(Clone)]
pub struct AuthRefreshEndpoint {
  transport: HttpTransport,
}

impl AuthRefreshEndpoint {
  pub fn new(transport: HttpTransport) -> Self {
    Self { transport }
  }
}

#[async_trait]
impl RefreshBackend for AuthRefreshEndpoint {
  async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
    let request = ApiRequest::post("auth/refresh")
      .json(&RefreshRequest { refresh_token })?
      .auth(AuthPolicy::Anonymous);

    let dto: TokenDto = self.transport.fetch(&request, None).await?;
    Ok(dto.into())
  }
}
