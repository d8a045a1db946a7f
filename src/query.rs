//! Emission sequence of a repository read and the consumer-side query state.
//!
//! A read produces `Loading`, then optionally `Success` from the cache, then a
//! network `Success` or `Error`. Those states are pushed through a bounded
//! channel by a spawned task; the receiving half is a [`ResourceStream`].
//! Dropping or cancelling the stream aborts the task, including any in-flight
//! request and pending backoff sleep.
//!
//! [`Query`] sits on the consumer side, TanStack-Query style: it drains a
//! stream and keeps the last good value visible when a later error arrives.
//!
//! # Example
//!
//! ```ignore
//! let products = ctx.products.clone();
//! let mut query = Query::new(move || products.watch_products(None, 1));
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::DataSource;
use crate::error::SyncError;

/// One state of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource<T> {
  Loading,
  Success { data: T, source: DataSource },
  Error(SyncError),
}

impl<T> Resource<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, Resource::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Resource::Success { .. })
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Resource::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Resource::Success { data, .. } => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&SyncError> {
    match self {
      Resource::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Sending half handed to the producer task.
pub struct Emitter<T> {
  tx: mpsc::Sender<Resource<T>>,
}

impl<T> Emitter<T> {
  /// Push a state. Returns `false` once nobody is listening.
  pub async fn emit(&self, state: Resource<T>) -> bool {
    self.tx.send(state).await.is_ok()
  }
}

/// Receiving half of a read. Implements [`Stream`].
pub struct ResourceStream<T> {
  rx: mpsc::Receiver<Resource<T>>,
  cancel: CancellationToken,
}

impl<T: Send + 'static> ResourceStream<T> {
  /// Run `producer` on its own task, wired to a new stream.
  pub fn spawn<F, Fut>(producer: F) -> Self
  where
    F: FnOnce(Emitter<T>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher = tx.clone();
    let work = producer(Emitter { tx });

    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => debug!("Read cancelled"),
        _ = watcher.closed() => debug!("Read abandoned by consumer"),
        _ = work => {}
      }
    });

    Self { rx, cancel }
  }

  /// A read that never reaches storage or network: `Loading`, then `error`.
  pub fn failed(error: SyncError) -> Self {
    Self::spawn(move |out| async move {
      if out.emit(Resource::Loading).await {
        out.emit(Resource::Error(error)).await;
      }
    })
  }
}

impl<T> ResourceStream<T> {
  /// Next state, or `None` once the read has finished or was cancelled.
  pub async fn next_state(&mut self) -> Option<Resource<T>> {
    self.rx.recv().await
  }

  /// Non-blocking receive, for tick-driven consumers.
  pub fn try_next(&mut self) -> Result<Resource<T>, mpsc::error::TryRecvError> {
    self.rx.try_recv()
  }

  /// Abort the read. Already-buffered states can still be received.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Drain the stream and return every state in order.
  pub async fn collect_states(mut self) -> Vec<Resource<T>> {
    let mut states = Vec::new();
    while let Some(state) = self.rx.recv().await {
      states.push(state);
    }
    states
  }
}

impl<T> Stream for ResourceStream<T> {
  type Item = Resource<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}

impl<T> Drop for ResourceStream<T> {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// A factory producing a fresh read each time it is called
type StreamFactory<T> = Box<dyn Fn() -> ResourceStream<T> + Send + Sync>;

/// Consumer-side view of a read.
///
/// Unlike the raw stream, a `Query` never forgets data: a later `Loading` or
/// `Error` is shown next to the last good value instead of replacing it.
pub struct Query<T> {
  data: Option<T>,
  source: Option<DataSource>,
  error: Option<SyncError>,
  loading: bool,
  factory: StreamFactory<T>,
  stream: Option<ResourceStream<T>>,
  fetched_at: Option<Instant>,
  stale_time: Duration,
}

impl<T: Send + 'static> Query<T> {
  pub fn new<F>(factory: F) -> Self
  where
    F: Fn() -> ResourceStream<T> + Send + Sync + 'static,
  {
    Self {
      data: None,
      source: None,
      error: None,
      loading: false,
      factory: Box::new(factory),
      stream: None,
      fetched_at: None,
      stale_time: Duration::from_secs(60),
    }
  }

  /// Set the stale time for this query.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn source(&self) -> Option<DataSource> {
    self.source
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  /// Check if network data is older than stale_time (cached-only data is always stale).
  pub fn is_stale(&self) -> bool {
    match (&self.data, self.fetched_at) {
      (Some(_), Some(at)) => at.elapsed() > self.stale_time,
      (Some(_), None) => true,
      _ => false,
    }
  }

  /// Start a read unless one is in progress.
  pub fn fetch(&mut self) {
    if self.loading {
      return;
    }
    self.start();
  }

  /// Start a new read, cancelling any in-flight one.
  pub fn refetch(&mut self) {
    self.stream = None;
    self.start();
  }

  /// Apply every state that has arrived. Returns `true` if anything changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    loop {
      let next = match self.stream.as_mut() {
        Some(stream) => stream.try_next(),
        None => break,
      };
      match next {
        Ok(state) => {
          changed = true;
          self.apply(state);
        }
        Err(mpsc::error::TryRecvError::Empty) => break,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.stream = None;
          if self.loading {
            self.loading = false;
            changed = true;
          }
          break;
        }
      }
    }
    changed
  }

  fn start(&mut self) {
    self.loading = true;
    self.stream = Some((self.factory)());
  }

  fn apply(&mut self, state: Resource<T>) {
    match state {
      Resource::Loading => {
        self.loading = true;
      }
      Resource::Success { data, source } => {
        if source == DataSource::Network {
          self.fetched_at = Some(Instant::now());
          self.error = None;
          self.loading = false;
        }
        self.data = Some(data);
        self.source = Some(source);
      }
      Resource::Error(e) => {
        self.error = Some(e);
        self.loading = false;
      }
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("data", &self.data)
      .field("error", &self.error)
      .field("loading", &self.loading)
      .field("fetched_at", &self.fetched_at)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Arc;

  fn cached_then<T: Clone + Send + 'static>(
    cached: T,
    last: Resource<T>,
  ) -> impl Fn() -> ResourceStream<T> + Send + Sync + 'static
  where
    T: Sync,
  {
    move || {
      let cached = cached.clone();
      let last = last.clone();
      ResourceStream::spawn(move |out| async move {
        out.emit(Resource::Loading).await;
        out
          .emit(Resource::Success {
            data: cached,
            source: DataSource::Cache {
              cached_at: Utc::now(),
            },
          })
          .await;
        out.emit(last).await;
      })
    }
  }

  async fn settle<T: Send + 'static>(query: &mut Query<T>) {
    for _ in 0..50 {
      tokio::time::sleep(Duration::from_millis(5)).await;
      query.poll();
      if !query.is_loading() {
        return;
      }
    }
  }

  #[tokio::test]
  async fn test_stream_yields_states_in_order() {
    let stream = ResourceStream::spawn(|out| async move {
      out.emit(Resource::Loading).await;
      out
        .emit(Resource::Success {
          data: 1,
          source: DataSource::Network,
        })
        .await;
    });

    let states = stream.collect_states().await;
    assert_eq!(
      states,
      vec![
        Resource::Loading,
        Resource::Success {
          data: 1,
          source: DataSource::Network
        }
      ]
    );
  }

  #[tokio::test]
  async fn test_dropping_stream_aborts_producer() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();

    let mut stream = ResourceStream::spawn(move |out| async move {
      out.emit(Resource::<u32>::Loading).await;
      tokio::time::sleep(Duration::from_millis(200)).await;
      flag.store(true, Ordering::SeqCst);
    });

    assert_eq!(stream.next_state().await, Some(Resource::Loading));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!finished.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_cancel_ends_stream() {
    let mut stream = ResourceStream::spawn(|out| async move {
      out.emit(Resource::<u32>::Loading).await;
      tokio::time::sleep(Duration::from_secs(30)).await;
      out.emit(Resource::Error(SyncError::offline())).await;
    });

    assert_eq!(stream.next_state().await, Some(Resource::Loading));
    stream.cancel();
    assert_eq!(stream.next_state().await, None);
  }

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(cached_then(
      vec![1],
      Resource::Success {
        data: vec![1, 2, 3],
        source: DataSource::Network,
      },
    ));

    query.fetch();
    assert!(query.is_loading());
    settle(&mut query).await;

    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert_eq!(query.source(), Some(DataSource::Network));
    assert!(query.error().is_none());
  }

  #[tokio::test]
  async fn test_poll_drains_then_releases_stream() {
    let mut query = Query::new(cached_then(
      vec![1],
      Resource::Success {
        data: vec![1, 2],
        source: DataSource::Network,
      },
    ));
    assert!(!query.poll());

    query.fetch();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(query.poll());
    assert_eq!(query.data(), Some(&vec![1, 2]));
    assert!(!query.is_loading());

    // The finished stream is dropped, so later polls report nothing new.
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_error_keeps_cached_data() {
    let mut query = Query::new(cached_then(
      42,
      Resource::Error(SyncError::Network("timeout".to_string())),
    ));

    query.fetch();
    settle(&mut query).await;

    assert_eq!(query.data(), Some(&42));
    assert!(query.source().unwrap().is_cache());
    assert_eq!(
      query.error(),
      Some(&SyncError::Network("timeout".to_string()))
    );
  }

  #[tokio::test]
  async fn test_query_stale() {
    let mut query = Query::new(|| {
      ResourceStream::spawn(|out| async move {
        out
          .emit(Resource::Success {
            data: 42,
            source: DataSource::Network,
          })
          .await;
      })
    })
    .with_stale_time(Duration::ZERO);

    query.fetch();
    settle(&mut query).await;

    // With zero stale time, should immediately be stale
    std::thread::sleep(Duration::from_millis(1));
    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let n = counter_clone.fetch_add(1, Ordering::SeqCst);
      ResourceStream::spawn(move |out| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        out
          .emit(Resource::Success {
            data: n,
            source: DataSource::Network,
          })
          .await;
      })
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Refetch should cancel the first and start a new one
    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch should have completed and been received
    assert_eq!(query.data(), Some(&1));
  }
}
