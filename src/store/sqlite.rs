//! SQLite backend for the durable record store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::records::Collection;
use super::RecordBackend;

/// Schema for the record collections.
///
/// Each collection is its own table keyed by the record id. Re-running the
/// batch on a version bump creates any missing collection without touching
/// existing data.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS field_records (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pending_uploads (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS api_mirror (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Durable backend over a single shared sqlite connection.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open (or create) the database at the given path and run migrations.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync").join("store.db"))
  }
}

impl RecordBackend for SqliteBackend {
  fn put(&self, collection: Collection, id: &str, data: &[u8]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, data) VALUES (?, ?)",
          collection.table()
        ),
        params![id, data],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", id, e))?;

    Ok(())
  }

  fn get_all(&self, collection: Collection) -> Result<Vec<Vec<u8>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(&format!("SELECT data FROM {}", collection.table()))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records: Vec<Vec<u8>> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(records)
  }

  fn remove(&self, collection: Collection, id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Removing a record that is already gone is a no-op.
    conn
      .execute(
        &format!("DELETE FROM {} WHERE id = ?", collection.table()),
        params![id],
      )
      .map_err(|e| eyre!("Failed to remove record {}: {}", id, e))?;

    Ok(())
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(&format!("DELETE FROM {}", collection.table()), [])
      .map_err(|e| eyre!("Failed to clear {}: {}", collection.table(), e))?;

    Ok(())
  }

  fn bump_retry(&self, collection: Collection, id: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Read-increment-write must happen inside one transaction so two
    // concurrent bumps cannot lose an update.
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let existing: Option<Vec<u8>> = tx
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", collection.table()),
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", id, e))?;

    let Some(data) = existing else {
      debug!(
        "bump_retry: no record {} in {}, nothing to do",
        id,
        collection.table()
      );
      return Ok(());
    };

    let mut value: serde_json::Value =
      serde_json::from_slice(&data).map_err(|e| eyre!("Failed to parse record {}: {}", id, e))?;
    let object = value
      .as_object_mut()
      .ok_or_else(|| eyre!("Record {} is not an object", id))?;

    let count = object
      .get("retry_count")
      .and_then(serde_json::Value::as_u64)
      .unwrap_or(0);
    object.insert("retry_count".to_string(), serde_json::Value::from(count + 1));

    let updated =
      serde_json::to_vec(&value).map_err(|e| eyre!("Failed to serialize record {}: {}", id, e))?;

    tx.execute(
      &format!("UPDATE {} SET data = ? WHERE id = ?", collection.table()),
      params![updated, id],
    )
    .map_err(|e| eyre!("Failed to update record {}: {}", id, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit retry bump: {}", e))?;

    Ok(())
  }
}
