//! Network client: retry, token refresh and the standard response envelope.

mod client;
mod envelope;
mod retry;

pub use client::{ApiClient, ApiRequest, AuthPolicy, HttpTransport};
pub use envelope::{decode, ApiEnvelope, Page};
pub use retry::{HasStatus, RetryPolicy, Transient, NON_RETRYABLE_STATUSES};
