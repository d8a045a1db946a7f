//! Serde-deserializable types matching the marketplace API.
//!
//! These types are separate from entities and domain types to allow clean
//! deserialization while keeping the other layers free of wire concerns.
//! Conversion to entities validates what the cache relies on and fails with
//! `SyncError::Parsing` otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entities::{
  AddressEntity, CartItemEntity, CategoryEntity, OrderEntity, OrderLineEntity, ProductEntity,
  UserEntity,
};
use super::types::OrderStatus;
use crate::auth::TokenGrant;
use crate::error::SyncError;

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDto {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub slug: String,
  pub parent_id: Option<String>,
  pub image_url: Option<String>,
  #[serde(default)]
  pub product_count: u32,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub price: i64,
  pub discount_price: Option<i64>,
  #[serde(default)]
  pub category_id: String,
  #[serde(default)]
  pub images: Vec<String>,
  /// Grams
  #[serde(default)]
  pub weight: f64,
  pub purity: Option<String>,
  #[serde(default)]
  pub stock: i64,
  pub rating: Option<f32>,
  pub updated_at: String,
}

// ============================================================================
// Cart
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemDto {
  pub id: String,
  pub product_id: String,
  #[serde(default)]
  pub product_name: String,
  pub image_url: Option<String>,
  pub unit_price: i64,
  pub quantity: i64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartDto {
  #[serde(default)]
  pub items: Vec<CartItemDto>,
  pub total_price: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest<'a> {
  pub product_id: &'a str,
  pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct UpdateCartItemRequest {
  pub quantity: u32,
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDto {
  pub product_id: String,
  #[serde(default)]
  pub product_name: String,
  pub quantity: i64,
  pub unit_price: i64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
  pub id: String,
  pub status: String,
  #[serde(default)]
  pub items: Vec<OrderItemDto>,
  pub total_amount: i64,
  pub shipping_address: Option<AddressDto>,
  pub note: Option<String>,
  pub created_at: String,
  pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest<'a> {
  pub address_id: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<&'a str>,
}

// ============================================================================
// Users and auth
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressDto {
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub recipient_name: String,
  #[serde(default)]
  pub phone: String,
  #[serde(default)]
  pub province: String,
  #[serde(default)]
  pub city: String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub postal_code: String,
  #[serde(default)]
  pub is_default: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
  pub id: String,
  pub phone: String,
  pub email: Option<String>,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  #[serde(default)]
  pub addresses: Vec<AddressDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest<'a> {
  pub first_name: &'a str,
  pub last_name: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
  pub phone: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest<'a> {
  pub phone: &'a str,
  pub password: &'a str,
  pub first_name: &'a str,
  pub last_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
  pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDto {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_in: i64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponseDto {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_in: i64,
  pub user: UserDto,
}

// ============================================================================
// Conversions to entities
// ============================================================================

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, SyncError> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| SyncError::Parsing(format!("{} '{}': {}", field, value, e)))
}

fn non_negative(field: &str, value: i64) -> Result<i64, SyncError> {
  if value < 0 {
    return Err(SyncError::Parsing(format!("{} is negative: {}", field, value)));
  }
  Ok(value)
}

fn count(field: &str, value: i64) -> Result<u32, SyncError> {
  u32::try_from(non_negative(field, value)?)
    .map_err(|_| SyncError::Parsing(format!("{} out of range: {}", field, value)))
}

fn require_id(kind: &str, id: &str) -> Result<(), SyncError> {
  if id.trim().is_empty() {
    return Err(SyncError::Parsing(format!("{} without id", kind)));
  }
  Ok(())
}

impl TryFrom<CategoryDto> for CategoryEntity {
  type Error = SyncError;

  fn try_from(dto: CategoryDto) -> Result<Self, Self::Error> {
    require_id("category", &dto.id)?;
    Ok(CategoryEntity {
      slug: if dto.slug.is_empty() {
        dto.id.clone()
      } else {
        dto.slug
      },
      id: dto.id,
      name: dto.name,
      parent_id: dto.parent_id,
      image_url: dto.image_url,
      product_count: dto.product_count,
    })
  }
}

impl TryFrom<ProductDto> for ProductEntity {
  type Error = SyncError;

  fn try_from(dto: ProductDto) -> Result<Self, Self::Error> {
    require_id("product", &dto.id)?;
    Ok(ProductEntity {
      price: non_negative("price", dto.price)?,
      discount_price: dto
        .discount_price
        .map(|p| non_negative("discountPrice", p))
        .transpose()?,
      stock: count("stock", dto.stock)?,
      updated_at: parse_timestamp("updatedAt", &dto.updated_at)?,
      id: dto.id,
      name: dto.name,
      description: dto.description,
      category_id: dto.category_id,
      images: dto.images,
      weight_grams: dto.weight,
      purity: dto.purity,
      rating: dto.rating,
    })
  }
}

impl TryFrom<CartItemDto> for CartItemEntity {
  type Error = SyncError;

  fn try_from(dto: CartItemDto) -> Result<Self, Self::Error> {
    require_id("cart item", &dto.id)?;
    Ok(CartItemEntity {
      unit_price: non_negative("unitPrice", dto.unit_price)?,
      quantity: count("quantity", dto.quantity)?,
      id: dto.id,
      product_id: dto.product_id,
      name: dto.product_name,
      image_url: dto.image_url,
    })
  }
}

impl CartDto {
  pub fn into_entities(self) -> Result<Vec<CartItemEntity>, SyncError> {
    self.items.into_iter().map(CartItemEntity::try_from).collect()
  }
}

impl TryFrom<AddressDto> for AddressEntity {
  type Error = SyncError;

  fn try_from(dto: AddressDto) -> Result<Self, Self::Error> {
    require_id("address", &dto.id)?;
    Ok(AddressEntity {
      id: dto.id,
      title: dto.title,
      recipient: dto.recipient_name,
      phone: dto.phone,
      province: dto.province,
      city: dto.city,
      street: dto.address,
      postal_code: dto.postal_code,
      is_default: dto.is_default,
    })
  }
}

impl TryFrom<OrderDto> for OrderEntity {
  type Error = SyncError;

  fn try_from(dto: OrderDto) -> Result<Self, Self::Error> {
    require_id("order", &dto.id)?;
    let status = OrderStatus::from_code(&dto.status)
      .ok_or_else(|| SyncError::Parsing(format!("unknown order status '{}'", dto.status)))?;
    let created_at = parse_timestamp("createdAt", &dto.created_at)?;
    let updated_at = match dto.updated_at.as_deref() {
      Some(raw) => parse_timestamp("updatedAt", raw)?,
      None => created_at,
    };

    let lines = dto
      .items
      .into_iter()
      .map(|item| -> Result<OrderLineEntity, SyncError> {
        Ok(OrderLineEntity {
          quantity: count("quantity", item.quantity)?,
          unit_price: non_negative("unitPrice", item.unit_price)?,
          product_id: item.product_id,
          name: item.product_name,
        })
      })
      .collect::<Result<Vec<_>, SyncError>>()?;

    Ok(OrderEntity {
      id: dto.id,
      status: status.code().to_string(),
      lines,
      total: non_negative("totalAmount", dto.total_amount)?,
      shipping_address: dto
        .shipping_address
        .map(AddressEntity::try_from)
        .transpose()?,
      note: dto.note,
      created_at,
      updated_at,
    })
  }
}

impl TryFrom<UserDto> for UserEntity {
  type Error = SyncError;

  fn try_from(dto: UserDto) -> Result<Self, Self::Error> {
    require_id("user", &dto.id)?;
    Ok(UserEntity {
      id: dto.id,
      phone: dto.phone,
      email: dto.email.filter(|e| !e.is_empty()),
      first_name: dto.first_name,
      last_name: dto.last_name,
      addresses: dto
        .addresses
        .into_iter()
        .map(AddressEntity::try_from)
        .collect::<Result<Vec<_>, SyncError>>()?,
    })
  }
}

impl From<TokenDto> for TokenGrant {
  fn from(dto: TokenDto) -> Self {
    TokenGrant {
      access_token: dto.access_token,
      refresh_token: dto.refresh_token,
      expires_in: dto.expires_in,
    }
  }
}

/// Convert a list of DTOs, failing on the first invalid one.
pub fn into_entities<D, E>(dtos: Vec<D>) -> Result<Vec<E>, SyncError>
where
  E: TryFrom<D, Error = SyncError>,
{
  dtos.into_iter().map(E::try_from).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  fn product_json(updated_at: &str, price: i64) -> String {
    format!(
      r#"{{"id":"p1","name":"Silver ring","price":{},"discountPrice":null,
          "categoryId":"rings","images":["a.jpg"],"weight":4.2,"purity":"925",
          "stock":3,"rating":4.5,"updatedAt":"{}"}}"#,
      price, updated_at
    )
  }

  #[test]
  fn test_product_dto_to_entity() {
    let dto: ProductDto = serde_json::from_str(&product_json("2026-01-02T03:04:05Z", 1_500_000)).unwrap();
    let entity = ProductEntity::try_from(dto).unwrap();

    assert_eq!(entity.price, 1_500_000);
    assert_eq!(entity.weight_grams, 4.2);
    assert_eq!(entity.stock, 3);
    assert_eq!(entity.updated_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
  }

  #[test]
  fn test_bad_timestamp_is_parsing_error() {
    let dto: ProductDto = serde_json::from_str(&product_json("yesterday", 1)).unwrap();
    let err = ProductEntity::try_from(dto).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parsing);
  }

  #[test]
  fn test_negative_price_is_parsing_error() {
    let dto: ProductDto = serde_json::from_str(&product_json("2026-01-02T03:04:05Z", -5)).unwrap();
    assert!(ProductEntity::try_from(dto).is_err());
  }

  #[test]
  fn test_unknown_order_status_is_rejected() {
    let dto: OrderDto = serde_json::from_str(
      r#"{"id":"o1","status":"teleported","items":[],"totalAmount":0,"createdAt":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let err = OrderEntity::try_from(dto).unwrap_err();
    assert!(err.to_string().contains("teleported"));
  }

  #[test]
  fn test_order_without_updated_at_uses_created_at() {
    let dto: OrderDto = serde_json::from_str(
      r#"{"id":"o1","status":"Paid","items":[{"productId":"p1","productName":"Ring","quantity":1,"unitPrice":10}],
          "totalAmount":10,"createdAt":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let entity = OrderEntity::try_from(dto).unwrap();
    assert_eq!(entity.status, "paid");
    assert_eq!(entity.updated_at, entity.created_at);
    assert_eq!(entity.lines.len(), 1);
  }

  #[test]
  fn test_user_empty_email_becomes_none() {
    let dto: UserDto =
      serde_json::from_str(r#"{"id":"u1","phone":"09121234567","email":"","firstName":"Sara"}"#)
        .unwrap();
    let entity = UserEntity::try_from(dto).unwrap();
    assert_eq!(entity.email, None);
    assert!(entity.addresses.is_empty());
  }
}
