//! Connectivity signal consumed by the repository read path.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// Anything that can answer "are we online right now".
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Observable connectivity state.
///
/// The current value is updated either by the host (`set_online`) or by
/// probing the API host (`probe`). Consumers can `subscribe` to changes.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx }
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      debug!(online, "Connectivity changed");
      *current = online;
      true
    });
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Try a TCP connection to the host of `base_url` and record the outcome.
  pub async fn probe(&self, base_url: &url::Url, timeout: Duration) -> bool {
    let online = match (base_url.host_str(), base_url.port_or_known_default()) {
      (Some(host), Some(port)) => {
        matches!(
          tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
          Ok(Ok(_))
        )
      }
      _ => false,
    };
    self.set_online(online);
    online
  }
}

impl Connectivity for ConnectivityMonitor {
  fn is_online(&self) -> bool {
    *self.tx.borrow()
  }
}
