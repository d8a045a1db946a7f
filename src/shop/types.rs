//! Domain models handed to consumers. Immutable values, no storage or wire concerns.

use chrono::{DateTime, Utc};

/// Prices are whole Toman.
pub type Toman = i64;

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
  pub id: String,
  pub name: String,
  pub slug: String,
  pub parent_id: Option<String>,
  pub image_url: Option<String>,
  pub product_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
  pub id: String,
  pub name: String,
  pub description: String,
  pub price: Toman,
  pub discount_price: Option<Toman>,
  pub category_id: String,
  pub images: Vec<String>,
  pub weight_grams: f64,
  /// Silver fineness, e.g. "925"
  pub purity: Option<String>,
  pub stock: u32,
  pub rating: Option<f32>,
  pub updated_at: DateTime<Utc>,
}

impl Product {
  /// Price the customer pays.
  pub fn effective_price(&self) -> Toman {
    match self.discount_price {
      Some(discounted) if discounted < self.price => discounted,
      _ => self.price,
    }
  }

  pub fn in_stock(&self) -> bool {
    self.stock > 0
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
  pub id: String,
  pub product_id: String,
  pub name: String,
  pub image_url: Option<String>,
  pub unit_price: Toman,
  pub quantity: u32,
}

impl CartItem {
  pub fn line_total(&self) -> Toman {
    self.unit_price * self.quantity as Toman
  }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cart {
  pub items: Vec<CartItem>,
}

impl Cart {
  pub fn total(&self) -> Toman {
    self.items.iter().map(CartItem::line_total).sum()
  }

  pub fn item_count(&self) -> u32 {
    self.items.iter().map(|i| i.quantity).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
  Pending,
  Paid,
  Processing,
  Shipped,
  Delivered,
  Cancelled,
}

impl OrderStatus {
  pub fn from_code(code: &str) -> Option<Self> {
    match code.to_ascii_lowercase().as_str() {
      "pending" => Some(Self::Pending),
      "paid" => Some(Self::Paid),
      "processing" => Some(Self::Processing),
      "shipped" => Some(Self::Shipped),
      "delivered" => Some(Self::Delivered),
      "cancelled" | "canceled" => Some(Self::Cancelled),
      _ => None,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Processing => "processing",
      Self::Shipped => "shipped",
      Self::Delivered => "delivered",
      Self::Cancelled => "cancelled",
    }
  }

  /// No further transitions happen from these states.
  pub fn is_final(&self) -> bool {
    matches!(self, Self::Delivered | Self::Cancelled)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
  pub product_id: String,
  pub name: String,
  pub quantity: u32,
  pub unit_price: Toman,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
  pub id: String,
  pub status: OrderStatus,
  pub lines: Vec<OrderLine>,
  pub total: Toman,
  pub shipping_address: Option<Address>,
  pub note: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Address {
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

#[derive(Debug, Clone, PartialEq)]
pub struct User {
  pub id: String,
  pub phone: String,
  pub email: Option<String>,
  pub first_name: String,
  pub last_name: String,
  pub addresses: Vec<Address>,
}

impl User {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
      .trim()
      .to_string()
  }

  pub fn default_address(&self) -> Option<&Address> {
    self
      .addresses
      .iter()
      .find(|a| a.is_default)
      .or_else(|| self.addresses.first())
  }
}
