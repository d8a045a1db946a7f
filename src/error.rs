//! Error taxonomy for the sync layer.
//!
//! Every I/O boundary (HTTP transport, HTTP status, response decoding, local
//! storage) converts its failures exactly once through one of the
//! `SyncError::from_*` constructors. Callers above that boundary match on
//! [`SyncError::kind`] instead of inspecting library error types.

use color_eyre::eyre;
use thiserror::Error;

/// Result alias used across the public API.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// No connectivity, DNS failure, timeout, connection reset
  Network,
  /// Non-2xx response that is not an authentication failure
  Http,
  /// 401 that a refresh could not resolve, or the refresh itself failed
  Authentication,
  /// Local input rejected before any call was made
  Validation,
  /// Response body did not match the expected schema
  Parsing,
  /// Anything else (storage, crypto, unexpected library errors)
  Unknown,
}

/// Classified error surfaced by repositories and the API client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
  #[error("Network unavailable: {0}")]
  Network(String),

  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("Authentication required: {0}")]
  Authentication(String),

  #[error("Invalid {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("Failed to parse response: {0}")]
  Parsing(String),

  #[error("Unexpected error: {0}")]
  Unknown(String),
}

impl SyncError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Network(_) => ErrorKind::Network,
      Self::Http { .. } => ErrorKind::Http,
      Self::Authentication(_) => ErrorKind::Authentication,
      Self::Validation { .. } => ErrorKind::Validation,
      Self::Parsing(_) => ErrorKind::Parsing,
      Self::Unknown(_) => ErrorKind::Unknown,
    }
  }

  pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Validation {
      field: field.into(),
      reason: reason.into(),
    }
  }

  /// Error emitted by the read path when the device is offline and nothing is cached.
  pub fn offline() -> Self {
    Self::Network("device is offline and no cached data is available".to_string())
  }

  /// Classify a transport-level failure from the HTTP client.
  pub fn from_transport(err: &reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Network(format!("request timed out: {}", err))
    } else if err.is_connect() || err.is_request() || err.is_body() {
      Self::Network(err.to_string())
    } else if err.is_decode() {
      Self::Parsing(err.to_string())
    } else if let Some(status) = err.status() {
      Self::from_status(status.as_u16(), &err.to_string())
    } else {
      Self::Unknown(err.to_string())
    }
  }

  /// Classify a non-success HTTP status. `body` is used as the message when
  /// it carries one in the standard envelope, otherwise it is used verbatim.
  pub fn from_status(status: u16, body: &str) -> Self {
    let message = serde_json::from_str::<serde_json::Value>(body)
      .ok()
      .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
      .unwrap_or_else(|| body.trim().to_string());

    match status {
      401 => Self::Authentication(if message.is_empty() {
        "unauthorized".to_string()
      } else {
        message
      }),
      _ => Self::Http { status, message },
    }
  }

  /// Classify a JSON decoding failure of a response body.
  pub fn from_decode(err: &serde_json::Error) -> Self {
    Self::Parsing(err.to_string())
  }

  /// Classify a local storage failure. Storage never crashes the read path,
  /// it is reported as `Unknown`.
  pub fn from_storage(report: &eyre::Report) -> Self {
    Self::Unknown(format!("local storage: {:#}", report))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_401_is_authentication() {
    let err = SyncError::from_status(401, r#"{"success":false,"message":"token expired"}"#);
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err, SyncError::Authentication("token expired".to_string()));
  }

  #[test]
  fn test_status_message_falls_back_to_body() {
    let err = SyncError::from_status(503, "Service Unavailable\n");
    assert_eq!(
      err,
      SyncError::Http {
        status: 503,
        message: "Service Unavailable".to_string()
      }
    );
  }

  #[test]
  fn test_decode_error_is_parsing() {
    let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
    assert_eq!(SyncError::from_decode(&err).kind(), ErrorKind::Parsing);
  }

  #[test]
  fn test_storage_error_is_unknown() {
    let report = eyre::eyre!("disk full");
    let err = SyncError::from_storage(&report);
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.to_string().contains("disk full"));
  }
}
