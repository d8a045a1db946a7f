//! Cache records, as stored in the per-entity tables.
//!
//! Entities are produced from wire DTOs (see `api_types`) and turned into
//! domain models with the `From` impls below. Both directions are pure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
  Address, Cart, CartItem, Category, Order, OrderLine, OrderStatus, Product, Toman, User,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntity {
  pub id: String,
  pub name: String,
  pub slug: String,
  pub parent_id: Option<String>,
  pub image_url: Option<String>,
  pub product_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEntity {
  pub id: String,
  pub name: String,
  pub description: String,
  pub price: Toman,
  pub discount_price: Option<Toman>,
  pub category_id: String,
  pub images: Vec<String>,
  pub weight_grams: f64,
  pub purity: Option<String>,
  pub stock: u32,
  pub rating: Option<f32>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItemEntity {
  pub id: String,
  pub product_id: String,
  pub name: String,
  pub image_url: Option<String>,
  pub unit_price: Toman,
  pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineEntity {
  pub product_id: String,
  pub name: String,
  pub quantity: u32,
  pub unit_price: Toman,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntity {
  pub id: String,
  /// Validated status code, see `OrderStatus::code`
  pub status: String,
  pub lines: Vec<OrderLineEntity>,
  pub total: Toman,
  pub shipping_address: Option<AddressEntity>,
  pub note: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressEntity {
  pub id: String,
  pub title: String,
  pub recipient: String,
  pub phone: String,
  pub province: String,
  pub city: String,
  pub street: String,
  pub postal_code: String,
  pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntity {
  pub id: String,
  pub phone: String,
  pub email: Option<String>,
  pub first_name: String,
  pub last_name: String,
  pub addresses: Vec<AddressEntity>,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<CategoryEntity> for Category {
  fn from(e: CategoryEntity) -> Self {
    Category {
      id: e.id,
      name: e.name,
      slug: e.slug,
      parent_id: e.parent_id,
      image_url: e.image_url,
      product_count: e.product_count,
    }
  }
}

impl From<ProductEntity> for Product {
  fn from(e: ProductEntity) -> Self {
    Product {
      id: e.id,
      name: e.name,
      description: e.description,
      price: e.price,
      discount_price: e.discount_price,
      category_id: e.category_id,
      images: e.images,
      weight_grams: e.weight_grams,
      purity: e.purity,
      stock: e.stock,
      rating: e.rating,
      updated_at: e.updated_at,
    }
  }
}

impl From<CartItemEntity> for CartItem {
  fn from(e: CartItemEntity) -> Self {
    CartItem {
      id: e.id,
      product_id: e.product_id,
      name: e.name,
      image_url: e.image_url,
      unit_price: e.unit_price,
      quantity: e.quantity,
    }
  }
}

/// Assemble the cart from its cached rows.
pub fn cart_from_items(items: Vec<CartItemEntity>) -> Cart {
  Cart {
    items: items.into_iter().map(CartItem::from).collect(),
  }
}

impl From<AddressEntity> for Address {
  fn from(e: AddressEntity) -> Self {
    Address {
      id: e.id,
      title: e.title,
      recipient: e.recipient,
      phone: e.phone,
      province: e.province,
      city: e.city,
      street: e.street,
      postal_code: e.postal_code,
      is_default: e.is_default,
    }
  }
}

impl From<OrderEntity> for Order {
  fn from(e: OrderEntity) -> Self {
    Order {
      id: e.id,
      // The code was validated when the entity was built from the DTO.
      status: OrderStatus::from_code(&e.status).unwrap_or(OrderStatus::Pending),
      lines: e
        .lines
        .into_iter()
        .map(|l| OrderLine {
          product_id: l.product_id,
          name: l.name,
          quantity: l.quantity,
          unit_price: l.unit_price,
        })
        .collect(),
      total: e.total,
      shipping_address: e.shipping_address.map(Address::from),
      note: e.note,
      created_at: e.created_at,
      updated_at: e.updated_at,
    }
  }
}

impl From<UserEntity> for User {
  fn from(e: UserEntity) -> Self {
    User {
      id: e.id,
      phone: e.phone,
      email: e.email,
      first_name: e.first_name,
      last_name: e.last_name,
      addresses: e.addresses.into_iter().map(Address::from).collect(),
    }
  }
}
