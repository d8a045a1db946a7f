//! Bounded retries with exponential backoff and jitter.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Client errors that will not change on retry.
pub const NON_RETRYABLE_STATUSES: [u16; 10] = [400, 401, 403, 404, 405, 406, 409, 410, 422, 451];

/// A response with an HTTP status.
pub trait HasStatus {
  fn status_code(&self) -> u16;
}

impl HasStatus for reqwest::Response {
  fn status_code(&self) -> u16 {
    self.status().as_u16()
  }
}

/// An error that may be worth retrying.
pub trait Transient {
  fn is_transient(&self) -> bool;
}

impl Transient for reqwest::Error {
  fn is_transient(&self) -> bool {
    !self.is_builder() && (self.is_timeout() || self.is_connect() || self.is_request() || self.is_body())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total number of attempts, including the first one
  pub max_retries: u32,
  pub initial_delay: Duration,
  pub backoff_multiplier: f64,
  pub max_delay: Duration,
  /// Jitter is drawn uniformly from `[0, max_jitter)`
  pub max_jitter: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_delay: Duration::from_millis(1000),
      backoff_multiplier: 2.0,
      max_delay: Duration::from_millis(30_000),
      max_jitter: Duration::from_millis(1000),
    }
  }
}

/// Per-request bookkeeping, dropped when the request resolves.
#[derive(Debug, Clone, Copy, Default)]
struct RetryState {
  attempt: u32,
  last_delay: Duration,
}

impl RetryPolicy {
  /// Single attempt, no waiting.
  pub fn none() -> Self {
    Self {
      max_retries: 1,
      ..Self::default()
    }
  }

  /// `min(initial * multiplier^(attempt-1) + jitter, max_delay)`
  pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
    let total_ms = base_ms + jitter.as_millis() as f64;
    let capped_ms = total_ms.min(self.max_delay.as_millis() as f64);
    Duration::from_millis(capped_ms as u64)
  }

  fn jitter(&self) -> Duration {
    let max_ms = self.max_jitter.as_millis() as u64;
    if max_ms == 0 {
      return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
  }

  fn should_retry_status(status: u16) -> bool {
    status >= 500 && !NON_RETRYABLE_STATUSES.contains(&status)
  }

  /// Run `op` until it yields a final outcome.
  ///
  /// `op` receives the 1-based attempt number. Non-retryable statuses and
  /// non-transient errors return immediately. Once attempts are exhausted the
  /// last response is returned if any attempt produced one, otherwise the last
  /// transient error.
  pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
  where
    T: HasStatus,
    E: Transient + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let attempts = self.max_retries.max(1);
    let mut state = RetryState::default();
    let mut last_response: Option<T> = None;

    loop {
      state.attempt += 1;

      match op(state.attempt).await {
        Ok(response) => {
          let status = response.status_code();
          if !Self::should_retry_status(status) || state.attempt >= attempts {
            return Ok(response);
          }
          state.last_delay = self.backoff(state.attempt, self.jitter());
          warn!(
            status,
            attempt = state.attempt,
            max_attempts = attempts,
            delay_ms = state.last_delay.as_millis() as u64,
            "Server error, retrying"
          );
          last_response = Some(response);
        }
        Err(e) if e.is_transient() && state.attempt < attempts => {
          state.last_delay = self.backoff(state.attempt, self.jitter());
          warn!(
            attempt = state.attempt,
            max_attempts = attempts,
            delay_ms = state.last_delay.as_millis() as u64,
            "Transport error, retrying: {}",
            e
          );
        }
        Err(e) if e.is_transient() => {
          debug!(attempt = state.attempt, "Giving up: {}", e);
          return match last_response {
            Some(response) => Ok(response),
            None => Err(e),
          };
        }
        Err(e) => {
          debug!(attempt = state.attempt, "Giving up: {}", e);
          return Err(e);
        }
      }

      tokio::time::sleep(state.last_delay).await;
    }
  }
}
