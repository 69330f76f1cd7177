//! Push messages turned into notifications for client pages.

use serde::Serialize;
use serde_json::{json, Value};

use crate::clients::{kind, ClientHub};
use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub renotify: bool,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
  /// The push payload, when one was sent
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

/// Builds notifications from push payloads and routes notification clicks.
#[derive(Clone)]
pub struct PushHandler {
  defaults: NotificationConfig,
  tag: String,
  clients: ClientHub,
}

impl PushHandler {
  pub fn new(defaults: NotificationConfig, product: &str, clients: ClientHub) -> Self {
    Self {
      defaults,
      tag: format!("{}-update", product),
      clients,
    }
  }

  /// Build the notification for a push.
  ///
  /// A JSON payload's `message` replaces the default body and the whole
  /// payload is attached as `data`. Payloads that are not JSON are ignored.
  pub fn notification(&self, payload: Option<&[u8]>) -> Notification {
    let mut notification = Notification {
      title: self.defaults.title.clone(),
      body: self.defaults.body.clone(),
      icon: self.defaults.icon.clone(),
      badge: self.defaults.badge.clone(),
      tag: self.tag.clone(),
      renotify: true,
      require_interaction: false,
      actions: vec![
        NotificationAction {
          action: "view".to_string(),
          title: "View now".to_string(),
        },
        NotificationAction {
          action: "dismiss".to_string(),
          title: "Dismiss".to_string(),
        },
      ],
      data: None,
    };

    let Some(payload) = payload.filter(|p| !p.is_empty()) else {
      return notification;
    };

    match serde_json::from_slice::<Value>(payload) {
      Ok(data) => {
        if let Some(message) = data.get("message").and_then(Value::as_str) {
          notification.body = message.to_string();
        }
        notification.data = Some(data);
      }
      Err(e) => tracing::warn!(error = %e, "Push payload is not JSON, using defaults"),
    }

    notification
  }

  /// Handle a push: show the notification on every client.
  pub fn push(&self, payload: Option<&[u8]>) -> Notification {
    let notification = self.notification(payload);
    let data = serde_json::to_value(&notification).unwrap_or(Value::Null);
    let delivered = self.clients.notify(kind::NOTIFICATION, data);
    tracing::info!(delivered, body = %notification.body, "Push notification shown");
    notification
  }

  /// Handle a notification click. Only `view` does anything: it asks
  /// clients to open or focus the site root. Returns whether it did.
  pub fn click(&self, action: &str) -> bool {
    if action != "view" {
      tracing::debug!(action, "Notification closed");
      return false;
    }

    self.clients.notify(kind::OPEN_WINDOW, json!({ "url": "/" }));
    true
  }
}
