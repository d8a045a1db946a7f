//! Access/refresh token persistence.
//!
//! The store is the only owner of credentials. Storage failures never escape
//! it: they are logged and reported as "no token", which callers see as
//! "not authenticated".

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::secure_store::SecureStore;
use crate::clock::Clock;

const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_REFRESH_TOKEN: &str = "refresh_token";
const KEY_TOKEN_EXPIRY: &str = "token_expiry";
const KEY_USER_ID: &str = "user_id";

/// Snapshot of the persisted credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  pub user_id: Option<String>,
}

pub struct TokenStore {
  store: Arc<dyn SecureStore>,
  clock: Arc<dyn Clock>,
  refresh_buffer: Duration,
  auth_state: watch::Sender<bool>,
}

impl TokenStore {
  pub fn new(store: Arc<dyn SecureStore>, clock: Arc<dyn Clock>, refresh_buffer: Duration) -> Self {
    let (auth_state, _rx) = watch::channel(false);
    let token_store = Self {
      store,
      clock,
      refresh_buffer,
      auth_state,
    };
    let authenticated = token_store.is_authenticated();
    token_store.auth_state.send_replace(authenticated);
    token_store
  }

  /// Persist a fresh token pair. `expires_in_secs` is relative to now.
  pub fn save_tokens(&self, access: &str, refresh: &str, expires_in_secs: i64) {
    let expires_at = self.clock.now() + Duration::seconds(expires_in_secs);
    let expiry = expires_at.timestamp_millis().to_string();

    let result = self.store.put(&[
      (KEY_ACCESS_TOKEN, access),
      (KEY_REFRESH_TOKEN, refresh),
      (KEY_TOKEN_EXPIRY, &expiry),
    ]);

    match result {
      Ok(()) => {
        debug!(%expires_at, "Saved tokens");
        self.auth_state.send_replace(true);
      }
      Err(e) => error!("Failed to persist tokens: {:#}", e),
    }
  }

  /// The access token, or `None` if missing or within the refresh buffer of expiry.
  pub fn get_access_token(&self) -> Option<String> {
    let token = self.read(KEY_ACCESS_TOKEN).filter(|t| !t.is_empty())?;
    let expires_at = self.expires_at()?;

    if self.clock.now() >= expires_at - self.refresh_buffer {
      debug!(%expires_at, "Access token is inside the refresh buffer");
      return None;
    }

    Some(token)
  }

  pub fn get_refresh_token(&self) -> Option<String> {
    self.read(KEY_REFRESH_TOKEN).filter(|t| !t.is_empty())
  }

  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    let millis = self.read(KEY_TOKEN_EXPIRY)?.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
  }

  pub fn user_id(&self) -> Option<String> {
    self.read(KEY_USER_ID)
  }

  pub fn set_user_id(&self, user_id: &str) {
    if let Err(e) = self.store.put(&[(KEY_USER_ID, user_id)]) {
      error!("Failed to persist user id: {:#}", e);
    }
  }

  /// Everything that is stored, regardless of expiry.
  pub fn record(&self) -> Option<TokenRecord> {
    Some(TokenRecord {
      access_token: self.read(KEY_ACCESS_TOKEN)?,
      refresh_token: self.read(KEY_REFRESH_TOKEN).unwrap_or_default(),
      expires_at: self.expires_at()?,
      user_id: self.user_id(),
    })
  }

  pub fn clear_tokens(&self) {
    let result = self.store.remove(&[
      KEY_ACCESS_TOKEN,
      KEY_REFRESH_TOKEN,
      KEY_TOKEN_EXPIRY,
      KEY_USER_ID,
    ]);
    if let Err(e) = result {
      error!("Failed to clear tokens: {:#}", e);
    }
    info!("Cleared stored credentials");
    self.auth_state.send_replace(false);
  }

  pub fn is_authenticated(&self) -> bool {
    self.get_access_token().is_some()
  }

  /// Observe login/logout transitions.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.auth_state.subscribe()
  }

  fn read(&self, key: &str) -> Option<String> {
    match self.store.get(key) {
      Ok(value) => value,
      Err(e) => {
        error!(key, "Failed to read secure store: {:#}", e);
        None
      }
    }
  }
}
