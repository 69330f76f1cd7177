//! SQLite implementation of cache storage.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use super::traits::{CacheStorage, Entry};
use crate::db::Database;
use crate::http::Response;

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Storage backed by a private in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Ok(Self::new(Arc::new(Database::open_in_memory()?)))
  }

  fn insert_entry(conn: &Connection, partition: &str, entry: &Entry) -> Result<()> {
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (partition_name, request_key, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          partition,
          entry.key,
          entry.url,
          entry.response.status,
          headers,
          &entry.response.body[..]
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.url, e))?;

    Ok(())
  }

  fn ensure_partition(conn: &Connection, name: &str) -> Result<()> {
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
    Ok(())
  }
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.conn()?;
    Self::ensure_partition(&conn, name)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    // Entries go explicitly as well, in case foreign keys are disabled
    conn
      .execute(
        "DELETE FROM cache_entries WHERE partition_name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let deleted = conn
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    Ok(deleted > 0)
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<Response>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM cache_entries
         WHERE partition_name = ? AND request_key = ?",
        params![partition, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    match row {
      Some((status, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(Response {
          status,
          headers,
          body: body.into(),
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, entry: &Entry) -> Result<()> {
    let conn = self.db.conn()?;
    Self::ensure_partition(&conn, partition)?;
    Self::insert_entry(&conn, partition, entry)
  }

  fn put_all(&self, partition: &str, entries: &[Entry]) -> Result<()> {
    let mut conn = self.db.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    Self::ensure_partition(&tx, partition)?;
    for entry in entries {
      Self::insert_entry(&tx, partition, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.db.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition_name = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }
}
