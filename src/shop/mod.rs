//! The NoghreSod marketplace: wire types, cache records, domain models and
//! the repositories that tie them to the cache layer.

pub mod api_types;
mod cache;
mod client;
pub mod entities;
mod repository;
mod session;
pub mod types;

pub use cache::ShopQueryKey;
pub use client::{AuthRefreshEndpoint, AuthSession, ShopClient};
pub use repository::{
  CartRepository, CategoryRepository, OrderRepository, ProductRepository, UserRepository, PAGE_SIZE,
};
pub use session::AuthService;
pub use types::{Address, Cart, CartItem, Category, Order, OrderLine, OrderStatus, Product, Toman, User};
