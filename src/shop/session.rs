//! Sign-in, registration and sign-out.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::TokenStore;
use crate::cache::{CacheLayer, SqliteStorage};
use crate::error::{SyncError, SyncResult};

use super::client::{AuthSession, ShopClient};
use super::repository::validate_name;
use super::types::User;

const MIN_PASSWORD_LEN: usize = 6;

/// Iranian mobile numbers: `09` followed by nine digits.
fn validate_phone(phone: &str) -> SyncResult<()> {
  let valid = phone.len() == 11 && phone.starts_with("09") && phone.bytes().all(|b| b.is_ascii_digit());
  if !valid {
    return Err(SyncError::validation(
      "phone",
      "must be 11 digits starting with 09",
    ));
  }
  Ok(())
}

fn validate_password(password: &str) -> SyncResult<()> {
  if password.chars().count() < MIN_PASSWORD_LEN {
    return Err(SyncError::validation(
      "password",
      format!("must be at least {} characters", MIN_PASSWORD_LEN),
    ));
  }
  Ok(())
}

/// Owns the transitions into and out of the signed-in state.
#[derive(Clone)]
pub struct AuthService {
  client: ShopClient,
  cache: CacheLayer<SqliteStorage>,
  tokens: Arc<TokenStore>,
}

impl AuthService {
  pub fn new(client: ShopClient, cache: CacheLayer<SqliteStorage>, tokens: Arc<TokenStore>) -> Self {
    Self {
      client,
      cache,
      tokens,
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.tokens.is_authenticated()
  }

  /// Observe sign-in state changes
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tokens.subscribe()
  }

  pub async fn login(&self, phone: &str, password: &str) -> SyncResult<User> {
    let phone = phone.trim();
    validate_phone(phone)?;
    validate_password(password)?;
    self.require_online()?;

    let session = self.client.login(phone, password).await?;
    Ok(self.start_session(session))
  }

  pub async fn register(
    &self,
    phone: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
  ) -> SyncResult<User> {
    let phone = phone.trim();
    validate_phone(phone)?;
    validate_password(password)?;
    validate_name("first_name", first_name)?;
    validate_name("last_name", last_name)?;
    self.require_online()?;

    let session = self
      .client
      .register(phone, password, first_name.trim(), last_name.trim())
      .await?;
    Ok(self.start_session(session))
  }

  /// Sign out locally, telling the server when possible.
  ///
  /// Local state is always cleared, even if the server call fails.
  pub async fn logout(&self) -> SyncResult<()> {
    if self.tokens.record().is_some() && self.cache.is_online() {
      if let Err(e) = self.client.logout().await {
        warn!("Server-side logout failed: {}", e);
      }
    }

    self.tokens.clear_tokens();
    self.cache.clear_all()?;
    info!("Signed out");
    Ok(())
  }

  fn start_session(&self, session: AuthSession) -> User {
    self.tokens.save_tokens(
      &session.access_token,
      &session.refresh_token,
      session.expires_in,
    );
    self.tokens.set_user_id(&session.user.id);
    if let Err(e) = self.cache.put_entity(&session.user) {
      warn!("Failed to cache profile: {}", e);
    }
    info!(user = %session.user.id, "Signed in");
    session.user.into()
  }

  fn require_online(&self) -> SyncResult<()> {
    if self.cache.is_online() {
      Ok(())
    } else {
      Err(SyncError::offline())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheStorage;
  use crate::error::ErrorKind;
  use crate::shop::cache::ShopQueryKey;
  use crate::shop::entities::CategoryEntity;
  use crate::shop::repository::tests::harness;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn auth_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
      "success": true,
      "data": {
        "accessToken": "abc",
        "refreshToken": "xyz",
        "expiresIn": 3600,
        "user": {"id": "u1", "phone": "09121234567", "firstName": "Sara", "lastName": "Ahmadi"}
      }
    }))
  }

  #[test]
  fn test_phone_validation() {
    assert!(validate_phone("09121234567").is_ok());
    assert!(validate_phone("9121234567").is_err());
    assert!(validate_phone("0912123456a").is_err());
    assert!(validate_phone("+989121234567").is_err());
  }

  #[tokio::test]
  async fn test_login_saves_tokens_and_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/auth/login"))
      .and(body_json(json!({"phone": "09121234567", "password": "secret1"})))
      .respond_with(auth_response())
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server);
    let auth = AuthService::new(h.client, h.cache.clone(), h.tokens.clone());

    let user = auth.login(" 09121234567 ", "secret1").await.unwrap();
    assert_eq!(user.full_name(), "Sara Ahmadi");
    assert_eq!(h.tokens.get_access_token().as_deref(), Some("abc"));
    assert_eq!(h.tokens.user_id().as_deref(), Some("u1"));
    assert!(auth.is_authenticated());
    assert!(h
      .cache
      .storage()
      .get_entity::<crate::shop::entities::UserEntity>("u1")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_login_rejects_bad_input_without_calling_server() {
    let server = MockServer::start().await;
    let h = harness(&server);
    let auth = AuthService::new(h.client, h.cache, h.tokens);

    let err = auth.login("12345", "secret1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = auth.login("09121234567", "123").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_register_requires_names() {
    let server = MockServer::start().await;
    let h = harness(&server);
    let auth = AuthService::new(h.client, h.cache, h.tokens);

    let err = auth
      .register("09121234567", "secret1", " ", "Ahmadi")
      .await
      .unwrap_err();
    assert_eq!(err, SyncError::validation("first_name", "must not be empty"));
  }

  #[tokio::test]
  async fn test_wrong_password_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/auth/login"))
      .respond_with(
        ResponseTemplate::new(401)
          .set_body_json(json!({"success": false, "message": "wrong phone or password"})),
      )
      .mount(&server)
      .await;

    let h = harness(&server);
    let auth = AuthService::new(h.client, h.cache, h.tokens.clone());

    let err = auth.login("09121234567", "secret1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!h.tokens.is_authenticated());
  }

  #[tokio::test]
  async fn test_logout_clears_tokens_and_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/auth/logout"))
      .and(header("Authorization", "Bearer abc"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server);
    h.tokens.save_tokens("abc", "xyz", 3600);
    let category = CategoryEntity {
      id: "rings".to_string(),
      name: "Rings".to_string(),
      slug: "rings".to_string(),
      parent_id: None,
      image_url: None,
      product_count: 4,
    };
    h.cache.put_query(&ShopQueryKey::Categories, &[category]).unwrap();
    let auth = AuthService::new(h.client, h.cache.clone(), h.tokens.clone());
    let mut state = auth.subscribe();

    auth.logout().await.unwrap();

    assert!(!h.tokens.is_authenticated());
    assert_eq!(h.tokens.record(), None);
    assert!(!*state.borrow_and_update());
    assert!(h
      .cache
      .storage()
      .get_entity::<CategoryEntity>("rings")
      .unwrap()
      .is_none());
  }
}
