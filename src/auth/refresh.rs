//! Single-flight access token refresh.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::token_store::TokenStore;
use crate::error::{SyncError, SyncResult};

/// New credentials returned by the auth server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
  pub access_token: String,
  /// `None` when the server does not rotate refresh tokens
  pub refresh_token: Option<String>,
  pub expires_in: i64,
}

/// Exchanges a refresh token for a new grant.
#[async_trait]
pub trait RefreshBackend: Send + Sync {
  async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant>;
}

/// Serializes refreshes so that concurrent callers holding the same stale
/// token cause one backend call, and all of them receive its result.
pub struct TokenRefresher {
  tokens: Arc<TokenStore>,
  backend: Arc<dyn RefreshBackend>,
  gate: Mutex<()>,
}

impl TokenRefresher {
  pub fn new(tokens: Arc<TokenStore>, backend: Arc<dyn RefreshBackend>) -> Self {
    Self {
      tokens,
      backend,
      gate: Mutex::new(()),
    }
  }

  pub fn tokens(&self) -> &Arc<TokenStore> {
    &self.tokens
  }

  /// Obtain a usable access token.
  ///
  /// `stale` is the token the caller already tried (or `None` if it had no
  /// valid token). If another caller replaced it while this one waited for the
  /// gate, the replacement is returned without a new backend call.
  ///
  /// Any failure clears the stored credentials and is reported as
  /// `Authentication`, which flips the auth-state observable to signed out.
  pub async fn refresh(&self, stale: Option<&str>) -> SyncResult<String> {
    let _guard = self.gate.lock().await;

    if let Some(current) = self.tokens.get_access_token() {
      if stale != Some(current.as_str()) {
        return Ok(current);
      }
    }

    let Some(refresh_token) = self.tokens.get_refresh_token() else {
      self.tokens.clear_tokens();
      return Err(SyncError::Authentication(
        "no refresh token available".to_string(),
      ));
    };

    info!("Refreshing access token");
    match self.backend.refresh(&refresh_token).await {
      Ok(grant) => {
        let next_refresh = grant.refresh_token.as_deref().unwrap_or(&refresh_token);
        self
          .tokens
          .save_tokens(&grant.access_token, next_refresh, grant.expires_in);
        Ok(grant.access_token)
      }
      Err(e) => {
        warn!("Token refresh failed, signing out: {}", e);
        self.tokens.clear_tokens();
        Err(SyncError::Authentication(format!(
          "token refresh failed: {}",
          e
        )))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::secure_store::MemoryStore;
  use crate::clock::ManualClock;
  use chrono::{Duration, TimeZone, Utc};
  use std::sync::atomic::{AtomicU32, Ordering};

  struct CountingBackend {
    calls: AtomicU32,
    result: SyncResult<TokenGrant>,
  }

  impl CountingBackend {
    fn granting(token: &str) -> Self {
      Self {
        calls: AtomicU32::new(0),
        result: Ok(TokenGrant {
          access_token: token.to_string(),
          refresh_token: Some("rotated".to_string()),
          expires_in: 3600,
        }),
      }
    }

    fn failing(err: SyncError) -> Self {
      Self {
        calls: AtomicU32::new(0),
        result: Err(err),
      }
    }
  }

  #[async_trait]
  impl RefreshBackend for CountingBackend {
    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
      assert_eq!(refresh_token, "xyz");
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      self.result.clone()
    }
  }

  fn expired_tokens() -> (Arc<TokenStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()));
    let tokens = Arc::new(TokenStore::new(
      Arc::new(MemoryStore::default()),
      clock.clone(),
      Duration::minutes(5),
    ));
    tokens.save_tokens("old", "xyz", 3600);
    clock.advance(Duration::hours(2));
    (tokens, clock)
  }

  #[tokio::test]
  async fn test_concurrent_refresh_calls_backend_once() {
    let (tokens, _clock) = expired_tokens();
    assert_eq!(tokens.get_access_token(), None);

    let backend = Arc::new(CountingBackend::granting("new"));
    let refresher = Arc::new(TokenRefresher::new(tokens.clone(), backend.clone()));

    let handles: Vec<_> = (0..5)
      .map(|_| {
        let refresher = refresher.clone();
        tokio::spawn(async move { refresher.refresh(None).await })
      })
      .collect();

    for handle in handles {
      assert_eq!(handle.await.unwrap().unwrap(), "new");
    }
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.get_refresh_token().as_deref(), Some("rotated"));
  }

  #[tokio::test]
  async fn test_stale_token_after_401_triggers_refresh() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let tokens = Arc::new(TokenStore::new(
      Arc::new(MemoryStore::default()),
      clock,
      Duration::minutes(5),
    ));
    tokens.save_tokens("revoked", "xyz", 3600);

    let backend = Arc::new(CountingBackend::granting("new"));
    let refresher = TokenRefresher::new(tokens, backend.clone());

    // The token still looks valid locally, but the server rejected it.
    assert_eq!(refresher.refresh(Some("revoked")).await.unwrap(), "new");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

    // A caller that saw the old token gets the replacement without a new call.
    assert_eq!(refresher.refresh(Some("revoked")).await.unwrap(), "new");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_rejected_refresh_clears_tokens() {
    let (tokens, _clock) = expired_tokens();
    let backend = Arc::new(CountingBackend::failing(SyncError::Http {
      status: 400,
      message: "invalid refresh token".to_string(),
    }));
    let refresher = TokenRefresher::new(tokens.clone(), backend);

    let err = refresher.refresh(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(tokens.get_refresh_token(), None);
    assert!(!*tokens.subscribe().borrow());
  }

  #[tokio::test]
  async fn test_unreachable_refresh_signs_out() {
    let (tokens, _clock) = expired_tokens();
    let backend = Arc::new(CountingBackend::failing(SyncError::Network(
      "connection refused".to_string(),
    )));
    let refresher = TokenRefresher::new(tokens.clone(), backend);

    let err = refresher.refresh(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(tokens.get_refresh_token(), None);
    assert!(!*tokens.subscribe().borrow());
  }

  #[tokio::test]
  async fn test_missing_refresh_token_is_authentication_error() {
    let tokens = Arc::new(TokenStore::new(
      Arc::new(MemoryStore::default()),
      Arc::new(crate::clock::SystemClock),
      Duration::minutes(5),
    ));
    let backend = Arc::new(CountingBackend::granting("new"));
    let refresher = TokenRefresher::new(tokens, backend.clone());

    let err = refresher.refresh(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
  }
}
