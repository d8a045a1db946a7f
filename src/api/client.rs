//! HTTP client stack: transport with retries, then token attach and refresh.

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::envelope;
use super::retry::RetryPolicy;
use crate::auth::TokenRefresher;
use crate::error::{SyncError, SyncResult};

/// Whether an endpoint needs a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
  /// Never send a token (login, registration, refresh)
  Anonymous,
  /// Send a token when one can be obtained, otherwise go unauthenticated
  Optional,
  /// Fail fast with `Authentication` when no token can be obtained
  Required,
}

/// A request description that can be rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  method: Method,
  path: String,
  query: Vec<(String, String)>,
  body: Option<serde_json::Value>,
  auth: AuthPolicy,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      auth: AuthPolicy::Optional,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::PUT, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn query(mut self, key: &str, value: impl ToString) -> Self {
    self.query.push((key.to_string(), value.to_string()));
    self
  }

  pub fn json<B: Serialize>(mut self, body: &B) -> SyncResult<Self> {
    let value = serde_json::to_value(body)
      .map_err(|e| SyncError::Unknown(format!("failed to serialize request body: {}", e)))?;
    self.body = Some(value);
    Ok(self)
  }

  pub fn auth(mut self, auth: AuthPolicy) -> Self {
    self.auth = auth;
    self
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

/// Plain HTTP execution with the retry policy applied. Knows nothing about tokens.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: url::Url,
  retry: RetryPolicy,
}

impl HttpTransport {
  pub fn new(
    base_url: url::Url,
    retry: RetryPolicy,
    timeout: Duration,
    connect_timeout: Duration,
  ) -> SyncResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .connect_timeout(connect_timeout)
      .user_agent(concat!("noghre/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| SyncError::Unknown(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      retry,
    })
  }

  pub fn base_url(&self) -> &url::Url {
    &self.base_url
  }

  /// Send `request`, retrying per policy. Non-2xx responses are returned, not errors.
  pub async fn send(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> SyncResult<reqwest::Response> {
    let url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| SyncError::validation("path", format!("{}: {}", request.path, e)))?;

    let response = self
      .retry
      .execute(|attempt| {
        debug!(method = %request.method, %url, attempt, "Sending request");
        let mut builder = self
          .client
          .request(request.method.clone(), url.clone())
          .query(&request.query);
        if let Some(token) = bearer {
          builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
          builder = builder.json(body);
        }
        builder.send()
      })
      .await
      .map_err(|e| SyncError::from_transport(&e))?;

    debug!(status = response.status().as_u16(), %url, "Response received");
    Ok(response)
  }

  /// Send and decode the envelope's `data`.
  pub async fn fetch<T: DeserializeOwned>(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> SyncResult<T> {
    let response = self.send(request, bearer).await?;
    let (status, body) = read_body(response).await?;
    envelope::decode(status, &body)
  }
}

/// Authenticated client: attaches the bearer token, refreshes on 401 and
/// replays the request once.
#[derive(Clone)]
pub struct ApiClient {
  transport: HttpTransport,
  refresher: Arc<TokenRefresher>,
}

impl ApiClient {
  pub fn new(transport: HttpTransport, refresher: Arc<TokenRefresher>) -> Self {
    Self {
      transport,
      refresher,
    }
  }

  pub fn transport(&self) -> &HttpTransport {
    &self.transport
  }

  pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> SyncResult<T> {
    let response = self.execute(&request).await?;
    let (status, body) = read_body(response).await?;
    envelope::decode(status, &body)
  }

  /// For endpoints whose response data is not needed.
  pub async fn send(&self, request: ApiRequest) -> SyncResult<()> {
    let response = self.execute(&request).await?;
    let (status, body) = read_body(response).await?;
    envelope::decode_empty(status, &body)
  }

  /// Run one request through the attach, send, refresh-on-401, replay sequence.
  pub async fn execute(&self, request: &ApiRequest) -> SyncResult<reqwest::Response> {
    let token = self.attach_token(request.auth).await?;

    let response = self.transport.send(request, token.as_deref()).await?;
    if response.status() != reqwest::StatusCode::UNAUTHORIZED {
      return Ok(response);
    }

    let Some(stale) = token else {
      // Nothing to refresh; the 401 is classified when the body is decoded.
      return Ok(response);
    };

    debug!(path = request.path(), "Got 401, refreshing token");
    let fresh = self.refresher.refresh(Some(&stale)).await?;

    let replay = self.transport.send(request, Some(&fresh)).await?;
    if replay.status() == reqwest::StatusCode::UNAUTHORIZED {
      warn!(path = request.path(), "Still unauthorized after refresh, signing out");
      self.refresher.tokens().clear_tokens();
      return Err(SyncError::Authentication(
        "request rejected after token refresh".to_string(),
      ));
    }
    Ok(replay)
  }

  async fn attach_token(&self, policy: AuthPolicy) -> SyncResult<Option<String>> {
    if policy == AuthPolicy::Anonymous {
      return Ok(None);
    }

    let tokens = self.refresher.tokens();
    if let Some(token) = tokens.get_access_token() {
      return Ok(Some(token));
    }

    if tokens.get_refresh_token().is_some() {
      match self.refresher.refresh(None).await {
        Ok(token) => return Ok(Some(token)),
        Err(e) if policy == AuthPolicy::Required => return Err(e),
        Err(e) => {
          warn!("Continuing without credentials: {}", e);
          return Ok(None);
        }
      }
    }

    // An expired session with nothing to refresh it is over.
    if tokens.record().is_some() {
      warn!("Access token expired and no refresh token is stored, signing out");
      tokens.clear_tokens();
    }

    match policy {
      AuthPolicy::Required => Err(SyncError::Authentication("not signed in".to_string())),
      _ => Ok(None),
    }
  }
}

async fn read_body(response: reqwest::Response) -> SyncResult<(u16, String)> {
  let status = response.status().as_u16();
  let body = response
    .text()
    .await
    .map_err(|e| SyncError::from_transport(&e))?;
  Ok((status, body))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::{MemoryStore, RefreshBackend, TokenGrant, TokenStore};
  use crate::clock::SystemClock;
  use crate::error::ErrorKind;
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  struct StubBackend {
    calls: AtomicU32,
    grant: SyncResult<TokenGrant>,
  }

  #[async_trait]
  impl RefreshBackend for StubBackend {
    async fn refresh(&self, _refresh_token: &str) -> SyncResult<TokenGrant> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.grant.clone()
    }
  }

  fn fast_retry() -> RetryPolicy {
    RetryPolicy {
      max_retries: 3,
      initial_delay: Duration::from_millis(5),
      backoff_multiplier: 2.0,
      max_delay: Duration::from_millis(50),
      max_jitter: Duration::ZERO,
    }
  }

  fn client_for(
    server: &MockServer,
    grant: SyncResult<TokenGrant>,
  ) -> (ApiClient, Arc<TokenStore>, Arc<StubBackend>) {
    let tokens = Arc::new(TokenStore::new(
      Arc::new(MemoryStore::default()),
      Arc::new(SystemClock),
      chrono::Duration::minutes(5),
    ));
    let backend = Arc::new(StubBackend {
      calls: AtomicU32::new(0),
      grant,
    });
    let refresher = Arc::new(TokenRefresher::new(tokens.clone(), backend.clone()));
    let base = url::Url::parse(&format!("{}/v1/", server.uri())).unwrap();
    let transport = HttpTransport::new(
      base,
      fast_retry(),
      Duration::from_secs(5),
      Duration::from_secs(5),
    )
    .unwrap();
    (ApiClient::new(transport, refresher), tokens, backend)
  }

  fn new_grant() -> SyncResult<TokenGrant> {
    Ok(TokenGrant {
      access_token: "new".to_string(),
      refresh_token: None,
      expires_in: 3600,
    })
  }

  #[tokio::test]
  async fn test_bearer_token_is_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/users/me"))
      .and(header("Authorization", "Bearer abc"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": 7})))
      .expect(1)
      .mount(&server)
      .await;

    let (client, tokens, _) = client_for(&server, new_grant());
    tokens.save_tokens("abc", "xyz", 3600);

    let value: u32 = client.fetch(ApiRequest::get("users/me")).await.unwrap();
    assert_eq!(value, 7);
  }

  #[tokio::test]
  async fn test_401_refreshes_and_replays_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/orders"))
      .and(header("Authorization", "Bearer revoked"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/v1/orders"))
      .and(header("Authorization", "Bearer new"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})))
      .expect(1)
      .mount(&server)
      .await;

    let (client, tokens, backend) = client_for(&server, new_grant());
    tokens.save_tokens("revoked", "xyz", 3600);

    let orders: Vec<u32> = client
      .fetch(ApiRequest::get("orders").auth(AuthPolicy::Required))
      .await
      .unwrap();
    assert!(orders.is_empty());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(tokens.get_access_token().as_deref(), Some("new"));
  }

  #[tokio::test]
  async fn test_second_401_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/orders"))
      .respond_with(ResponseTemplate::new(401))
      .expect(2)
      .mount(&server)
      .await;

    let (client, tokens, backend) = client_for(&server, new_grant());
    tokens.save_tokens("revoked", "xyz", 3600);

    let err = client
      .fetch::<Vec<u32>>(ApiRequest::get("orders").auth(AuthPolicy::Required))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert!(!tokens.is_authenticated());
    assert_eq!(tokens.get_refresh_token(), None);
  }

  #[tokio::test]
  async fn test_failed_refresh_surfaces_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/orders"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;

    let rejected = Err(SyncError::Http {
      status: 400,
      message: "refresh token revoked".to_string(),
    });
    let (client, tokens, _) = client_for(&server, rejected);
    tokens.save_tokens("revoked", "xyz", 3600);

    let err = client
      .fetch::<Vec<u32>>(ApiRequest::get("orders").auth(AuthPolicy::Required))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!*tokens.subscribe().borrow());
  }

  #[tokio::test]
  async fn test_required_without_credentials_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let (client, _tokens, backend) = client_for(&server, new_grant());
    let err = client
      .fetch::<u32>(ApiRequest::get("orders").auth(AuthPolicy::Required))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_expired_token_without_refresh_token_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let (client, tokens, backend) = client_for(&server, new_grant());
    // Already inside the refresh buffer, and the refresh token is empty.
    tokens.save_tokens("old", "", 60);
    assert!(*tokens.subscribe().borrow());

    let err = client
      .fetch::<u32>(ApiRequest::get("orders").auth(AuthPolicy::Required))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(tokens.record().is_none());
    assert!(!*tokens.subscribe().borrow());
  }

  #[tokio::test]
  async fn test_optional_without_credentials_goes_anonymous() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/categories"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": 3})))
      .expect(1)
      .mount(&server)
      .await;

    let (client, _tokens, _) = client_for(&server, new_grant());
    let value: u32 = client.fetch(ApiRequest::get("categories")).await.unwrap();
    assert_eq!(value, 3);

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
  }

  #[tokio::test]
  async fn test_expired_token_is_refreshed_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/cart"))
      .and(header("Authorization", "Bearer new"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": 1})))
      .expect(1)
      .mount(&server)
      .await;

    let (client, tokens, backend) = client_for(&server, new_grant());
    // Expires inside the 5 minute buffer, so it counts as expired already.
    tokens.save_tokens("old", "xyz", 60);

    let value: u32 = client.fetch(ApiRequest::get("cart")).await.unwrap();
    assert_eq!(value, 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/categories"))
      .respond_with(ResponseTemplate::new(503))
      .up_to_n_times(2)
      .with_priority(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/v1/categories"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": 9})))
      .with_priority(2)
      .mount(&server)
      .await;

    let (client, _tokens, _) = client_for(&server, new_grant());
    let value: u32 = client.fetch(ApiRequest::get("categories")).await.unwrap();
    assert_eq!(value, 9);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_not_found_is_http_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/products/missing"))
      .respond_with(
        ResponseTemplate::new(404).set_body_json(json!({"success": false, "message": "not found"})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let (client, _tokens, _) = client_for(&server, new_grant());
    let err = client
      .fetch::<u32>(ApiRequest::get("products/missing"))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      SyncError::Http {
        status: 404,
        message: "not found".to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_unreachable_server_is_network_error() {
    let base = url::Url::parse("http://127.0.0.1:9/v1/").unwrap();
    let transport = HttpTransport::new(
      base,
      fast_retry(),
      Duration::from_secs(1),
      Duration::from_millis(200),
    )
    .unwrap();

    let err = transport
      .fetch::<u32>(&ApiRequest::get("categories"), None)
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
  }
}
