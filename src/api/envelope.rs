//! Standard response envelope shared by every endpoint.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// `{ "success": bool, "message": string?, "data": T? }`
#[derive(Debug, Deserialize, Serialize)]
pub struct ApiEnvelope<T> {
  pub success: bool,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default = "Option::default")]
  pub data: Option<T>,
}

/// Payload of paginated endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
  #[serde(default)]
  pub page: u32,
  #[serde(default)]
  pub page_size: u32,
  #[serde(default)]
  pub total: u64,
}

impl<T> Page<T> {
  pub fn has_more(&self) -> bool {
    (self.page as u64) * (self.page_size as u64) < self.total
  }
}

/// Turn a raw response into the envelope's `data`.
pub fn decode<T: DeserializeOwned>(status: u16, body: &str) -> SyncResult<T> {
  let envelope = open::<T>(status, body)?;
  envelope
    .data
    .ok_or_else(|| SyncError::Parsing("response envelope has no data".to_string()))
}

/// Like [`decode`] for endpoints whose `data` is absent or irrelevant.
pub fn decode_empty(status: u16, body: &str) -> SyncResult<()> {
  open::<serde_json::Value>(status, body).map(|_| ())
}

fn open<T: DeserializeOwned>(status: u16, body: &str) -> SyncResult<ApiEnvelope<T>> {
  if !(200..300).contains(&status) {
    return Err(SyncError::from_status(status, body));
  }

  if body.trim().is_empty() {
    return Ok(ApiEnvelope {
      success: true,
      message: None,
      data: None,
    });
  }

  let envelope: ApiEnvelope<T> =
    serde_json::from_str(body).map_err(|e| SyncError::from_decode(&e))?;

  if !envelope.success {
    return Err(SyncError::Http {
      status,
      message: envelope
        .message
        .unwrap_or_else(|| "request was not successful".to_string()),
    });
  }

  Ok(envelope)
}
