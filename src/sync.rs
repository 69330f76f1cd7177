//! Background sync: durable queues flushed to the origin when a sync tag fires.
//!
//! Delivery is at-least-once. A queue is cleared only after the origin
//! accepted the batch, so a failure leaves everything for the next sync.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use crate::db::Database;
use crate::network::Fetcher;

/// Tags dispatched by the background sync facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
  AnalyticsSync,
  PreferencesSync,
}

impl FromStr for SyncTag {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "analytics-sync" => Ok(Self::AnalyticsSync),
      "preferences-sync" => Ok(Self::PreferencesSync),
      other => Err(eyre!("Unknown sync tag: {}", other)),
    }
  }
}

/// What a sync run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "items", rename_all = "kebab-case")]
pub enum SyncReport {
  /// Nothing was queued
  Empty,
  /// This many items were delivered and removed from the queue
  Delivered(usize),
  /// Delivery failed; the queue is untouched
  Retained(usize),
}

/// Durable store of items waiting for a sync.
#[derive(Clone)]
pub struct SyncQueue {
  db: Arc<Database>,
}

impl SyncQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Append an analytics event.
  pub fn push_analytics(&self, event: &Value) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO pending_analytics (event) VALUES (?)",
        params![event.to_string()],
      )
      .map_err(|e| eyre!("Failed to queue analytics event: {}", e))?;
    Ok(())
  }

  /// Pending analytics events in arrival order, with the highest id seen.
  pub fn pending_analytics(&self) -> Result<(Vec<Value>, Option<i64>)> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, event FROM pending_analytics ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
      .map_err(|e| eyre!("Failed to read analytics queue: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read analytics event: {}", e))?;

    let last_id = rows.last().map(|(id, _)| *id);
    let events = rows
      .into_iter()
      .filter_map(|(id, event)| match serde_json::from_str(&event) {
        Ok(value) => Some(value),
        Err(e) => {
          tracing::warn!(id, error = %e, "Dropping unreadable analytics event");
          None
        }
      })
      .collect();

    Ok((events, last_id))
  }

  /// Remove delivered events. Events queued after `up_to` stay.
  pub fn clear_analytics(&self, up_to: i64) -> Result<usize> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute("DELETE FROM pending_analytics WHERE id <= ?", params![up_to])
      .map_err(|e| eyre!("Failed to clear analytics queue: {}", e))?;
    Ok(removed)
  }

  /// Replace the pending preferences blob.
  pub fn set_preferences(&self, preferences: &Value) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO pending_preferences (id, preferences, queued_at)
         VALUES (1, ?, datetime('now'))",
        params![preferences.to_string()],
      )
      .map_err(|e| eyre!("Failed to queue preferences: {}", e))?;
    Ok(())
  }

  pub fn pending_preferences(&self) -> Result<Option<Value>> {
    let conn = self.db.conn()?;
    let stored: Option<String> = conn
      .query_row(
        "SELECT preferences FROM pending_preferences WHERE id = 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read preferences: {}", e))?;

    stored
      .map(|s| serde_json::from_str(&s).map_err(|e| eyre!("Failed to parse preferences: {}", e)))
      .transpose()
  }

  /// Remove the pending preferences if they are still the ones delivered.
  pub fn clear_preferences(&self, delivered: &Value) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM pending_preferences WHERE id = 1 AND preferences = ?",
        params![delivered.to_string()],
      )
      .map_err(|e| eyre!("Failed to clear preferences: {}", e))?;
    Ok(())
  }
}

/// Handles sync tags by flushing the matching queue to the origin.
pub struct BackgroundSync {
  queue: SyncQueue,
  fetcher: Arc<dyn Fetcher>,
  analytics_endpoint: Url,
  preferences_endpoint: Url,
}

impl BackgroundSync {
  pub fn new(
    queue: SyncQueue,
    fetcher: Arc<dyn Fetcher>,
    analytics_endpoint: Url,
    preferences_endpoint: Url,
  ) -> Self {
    Self {
      queue,
      fetcher,
      analytics_endpoint,
      preferences_endpoint,
    }
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.queue
  }

  pub async fn run(&self, tag: SyncTag) -> Result<SyncReport> {
    tracing::info!(?tag, "Background sync");
    match tag {
      SyncTag::AnalyticsSync => self.sync_analytics().await,
      SyncTag::PreferencesSync => self.sync_preferences().await,
    }
  }

  async fn sync_analytics(&self) -> Result<SyncReport> {
    let (events, last_id) = self.queue.pending_analytics()?;
    let Some(last_id) = last_id else {
      return Ok(SyncReport::Empty);
    };
    let count = events.len();

    match self
      .fetcher
      .post_json(&self.analytics_endpoint, &Value::Array(events))
      .await
    {
      Ok(response) if response.is_ok() => {
        self.queue.clear_analytics(last_id)?;
        tracing::info!(events = count, "Analytics synced");
        Ok(SyncReport::Delivered(count))
      }
      Ok(response) => {
        tracing::warn!(status = response.status, "Analytics sync rejected, keeping queue");
        Ok(SyncReport::Retained(count))
      }
      Err(e) => {
        tracing::warn!(error = %e, "Analytics sync failed, keeping queue");
        Ok(SyncReport::Retained(count))
      }
    }
  }

  async fn sync_preferences(&self) -> Result<SyncReport> {
    let Some(preferences) = self.queue.pending_preferences()? else {
      return Ok(SyncReport::Empty);
    };

    match self
      .fetcher
      .post_json(&self.preferences_endpoint, &preferences)
      .await
    {
      Ok(response) if response.is_ok() => {
        self.queue.clear_preferences(&preferences)?;
        tracing::info!("Preferences synced");
        Ok(SyncReport::Delivered(1))
      }
      Ok(response) => {
        tracing::warn!(status = response.status, "Preferences sync rejected, keeping queue");
        Ok(SyncReport::Retained(1))
      }
      Err(e) => {
        tracing::warn!(error = %e, "Preferences sync failed, keeping queue");
        Ok(SyncReport::Retained(1))
      }
    }
  }
}
