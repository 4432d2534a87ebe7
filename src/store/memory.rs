//! Ephemeral fallback backend used when the embedded database cannot open.
//!
//! Every collection is mirrored under one flat key-value namespace, each
//! collection serialized as a single JSON blob. Same signatures as the
//! sqlite backend, degraded durability.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::records::Collection;
use super::RecordBackend;

pub struct MemoryBackend {
  namespace: String,
  blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
  pub fn new(namespace: &str) -> Self {
    Self {
      namespace: namespace.to_string(),
      blobs: Mutex::new(HashMap::new()),
    }
  }

  /// Stable key-per-collection convention for the flat namespace.
  fn slot_key(&self, collection: Collection) -> String {
    format!("{}::{}", self.namespace, collection.table())
  }

  fn read_slot(blobs: &HashMap<String, Vec<u8>>, key: &str) -> Vec<Value> {
    blobs
      .get(key)
      .and_then(|blob| serde_json::from_slice(blob).ok())
      .unwrap_or_default()
  }

  fn write_slot(blobs: &mut HashMap<String, Vec<u8>>, key: &str, records: &[Value]) -> Result<()> {
    let blob =
      serde_json::to_vec(records).map_err(|e| eyre!("Failed to serialize collection: {}", e))?;
    blobs.insert(key.to_string(), blob);
    Ok(())
  }

  fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
  }
}

impl RecordBackend for MemoryBackend {
  fn put(&self, collection: Collection, id: &str, data: &[u8]) -> Result<()> {
    let record: Value =
      serde_json::from_slice(data).map_err(|e| eyre!("Failed to parse record {}: {}", id, e))?;

    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = self.slot_key(collection);
    let mut records = Self::read_slot(&blobs, &key);

    match records
      .iter_mut()
      .find(|r| Self::record_id(r) == Some(id))
    {
      Some(existing) => *existing = record,
      None => records.push(record),
    }

    Self::write_slot(&mut blobs, &key, &records)
  }

  fn get_all(&self, collection: Collection) -> Result<Vec<Vec<u8>>> {
    let blobs = self
      .blobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let records = Self::read_slot(&blobs, &self.slot_key(collection));

    records
      .iter()
      .map(|r| serde_json::to_vec(r).map_err(|e| eyre!("Failed to serialize record: {}", e)))
      .collect()
  }

  fn remove(&self, collection: Collection, id: &str) -> Result<()> {
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = self.slot_key(collection);
    let mut records = Self::read_slot(&blobs, &key);

    records.retain(|r| Self::record_id(r) != Some(id));
    Self::write_slot(&mut blobs, &key, &records)
  }

  fn clear(&self, collection: Collection) -> Result<()> {
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    blobs.remove(&self.slot_key(collection));
    Ok(())
  }

  fn bump_retry(&self, collection: Collection, id: &str) -> Result<()> {
    // The whole read-increment-write happens under the one lock.
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = self.slot_key(collection);
    let mut records = Self::read_slot(&blobs, &key);

    let Some(record) = records
      .iter_mut()
      .find(|r| Self::record_id(r) == Some(id))
    else {
      return Ok(());
    };

    let object = record
      .as_object_mut()
      .ok_or_else(|| eyre!("Record {} is not an object", id))?;
    let count = object
      .get("retry_count")
      .and_then(Value::as_u64)
      .unwrap_or(0);
    object.insert("retry_count".to_string(), Value::from(count + 1));

    Self::write_slot(&mut blobs, &key, &records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_overwrites_by_id() {
    let backend = MemoryBackend::new("fieldsync");
    backend
      .put(Collection::FieldRecords, "a", br#"{"id":"a","v":1}"#)
      .unwrap();
    backend
      .put(Collection::FieldRecords, "a", br#"{"id":"a","v":2}"#)
      .unwrap();

    let all = backend.get_all(Collection::FieldRecords).unwrap();
    assert_eq!(all.len(), 1);
    let record: Value = serde_json::from_slice(&all[0]).unwrap();
    assert_eq!(record["v"], 2);
  }

  #[test]
  fn test_collections_share_one_flat_namespace() {
    let backend = MemoryBackend::new("fieldsync");
    backend
      .put(Collection::FieldRecords, "a", br#"{"id":"a"}"#)
      .unwrap();
    backend
      .put(Collection::PendingUploads, "a", br#"{"id":"a"}"#)
      .unwrap();

    let blobs = backend.blobs.lock().unwrap();
    assert!(blobs.contains_key("fieldsync::field_records"));
    assert!(blobs.contains_key("fieldsync::pending_uploads"));
  }

  #[test]
  fn test_remove_missing_id_is_noop() {
    let backend = MemoryBackend::new("fieldsync");
    backend.remove(Collection::FieldRecords, "ghost").unwrap();
    assert!(backend.get_all(Collection::FieldRecords).unwrap().is_empty());
  }

  #[test]
  fn test_bump_retry_increments() {
    let backend = MemoryBackend::new("fieldsync");
    backend
      .put(Collection::PendingUploads, "u1", br#"{"id":"u1","retry_count":0}"#)
      .unwrap();
    backend.bump_retry(Collection::PendingUploads, "u1").unwrap();
    backend.bump_retry(Collection::PendingUploads, "u1").unwrap();

    let all = backend.get_all(Collection::PendingUploads).unwrap();
    let record: Value = serde_json::from_slice(&all[0]).unwrap();
    assert_eq!(record["retry_count"], 2);
  }
}
