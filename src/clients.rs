//! Broadcast channel to every connected client page.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Message posted to clients, e.g. `{type: "cache-updated", data: {url, timestamp}, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMessage {
  #[serde(rename = "type")]
  pub kind: String,
  pub data: Value,
  /// Milliseconds since the epoch
  pub timestamp: i64,
}

/// Message kinds understood by client pages.
pub mod kind {
  pub const CACHE_UPDATED: &str = "cache-updated";
  pub const NOTIFICATION: &str = "notification";
  pub const OPEN_WINDOW: &str = "open-window";
}

/// Fan-out of client messages.
///
/// Messages sent while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct ClientHub {
  tx: broadcast::Sender<ClientMessage>,
}

impl ClientHub {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.tx.subscribe()
  }

  /// Post a message to all clients. Returns how many received it.
  pub fn notify(&self, kind: &str, data: Value) -> usize {
    let message = ClientMessage {
      kind: kind.to_string(),
      data,
      timestamp: Utc::now().timestamp_millis(),
    };

    match self.tx.send(message) {
      Ok(receivers) => receivers,
      Err(_) => {
        tracing::trace!(kind, "No clients connected, message dropped");
        0
      }
    }
  }
}

impl Default for ClientHub {
  fn default() -> Self {
    Self::new(64)
  }
}
