//! Credential storage and token lifecycle.

mod refresh;
mod secure_store;
mod token_store;

pub use refresh::{RefreshBackend, TokenGrant, TokenRefresher};
pub use secure_store::{EncryptedFileStore, MemoryStore, SecureStore};
pub use token_store::{TokenRecord, TokenStore};
