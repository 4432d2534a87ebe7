//! Durable local record store backing the offline queue.
//!
//! Holds the queued field records, pending binary uploads and the API
//! response mirror. Backed by an embedded sqlite database; if that cannot be
//! opened the store silently degrades to an in-memory key-value fallback
//! with the same signatures.

mod memory;
mod records;
mod sqlite;

pub use records::{
  generate_record_id, Collection, MirroredResponse, QueuedFieldRecord, QueuedUpload, StoredRecord,
};

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

use memory::MemoryBackend;
use sqlite::SqliteBackend;

/// Storage backend contract shared by the sqlite and fallback stores.
///
/// Operates on serialized records; the typed layer above handles serde.
pub trait RecordBackend: Send + Sync {
  /// Insert or overwrite a record by id, atomically.
  fn put(&self, collection: Collection, id: &str, data: &[u8]) -> Result<()>;

  /// Every record in the collection. Set semantics; no ordering guarantee.
  fn get_all(&self, collection: Collection) -> Result<Vec<Vec<u8>>>;

  /// Remove by id. Removing a missing id is a no-op.
  fn remove(&self, collection: Collection, id: &str) -> Result<()>;

  /// Remove every record in the collection.
  fn clear(&self, collection: Collection) -> Result<()>;

  /// Increment the record's retry_count in one transaction.
  fn bump_retry(&self, collection: Collection, id: &str) -> Result<()>;
}

/// The durable store: one shared handle, opened lazily on first access and
/// reused for the process lifetime.
pub struct DurableRecordStore {
  namespace: String,
  path: Option<PathBuf>,
  backend: OnceLock<Box<dyn RecordBackend>>,
}

impl DurableRecordStore {
  /// Create a store handle. Nothing is opened until first use.
  ///
  /// `path` overrides the default database location; `None` uses the
  /// platform data directory.
  pub fn new(namespace: &str, path: Option<PathBuf>) -> Self {
    Self {
      namespace: namespace.to_string(),
      path,
      backend: OnceLock::new(),
    }
  }

  /// Open the underlying database. Idempotent; safe to call any number of
  /// times. A failed open switches the store into fallback mode for the
  /// rest of the session, invisibly to callers.
  pub fn open(&self) {
    let _ = self.backend();
  }

  fn backend(&self) -> &dyn RecordBackend {
    self
      .backend
      .get_or_init(|| {
        let opened = match &self.path {
          Some(path) => SqliteBackend::open_at(path),
          None => SqliteBackend::default_path().and_then(|p| SqliteBackend::open_at(&p)),
        };

        match opened {
          Ok(backend) => Box::new(backend) as Box<dyn RecordBackend>,
          Err(err) => {
            warn!(
              "embedded database unavailable, falling back to ephemeral storage: {}",
              err
            );
            Box::new(MemoryBackend::new(&self.namespace))
          }
        }
      })
      .as_ref()
  }

  /// Insert or overwrite a record.
  pub fn put<T: StoredRecord>(&self, record: &T) -> Result<()> {
    let data = serde_json::to_vec(record)
      .map_err(|e| eyre!("Failed to serialize record {}: {}", record.id(), e))?;
    self.backend().put(T::collection(), record.id(), &data)
  }

  /// Every record in the type's collection.
  pub fn get_all<T: StoredRecord>(&self) -> Result<Vec<T>> {
    let raw = self.backend().get_all(T::collection())?;

    Ok(
      raw
        .iter()
        .filter_map(|data| match serde_json::from_slice(data) {
          Ok(record) => Some(record),
          Err(err) => {
            warn!(
              "skipping unreadable record in {}: {}",
              T::collection().table(),
              err
            );
            None
          }
        })
        .collect(),
    )
  }

  /// Remove a record by id. Idempotent.
  pub fn remove(&self, collection: Collection, id: &str) -> Result<()> {
    self.backend().remove(collection, id)
  }

  /// Remove every record in a collection.
  pub fn clear(&self, collection: Collection) -> Result<()> {
    self.backend().clear(collection)
  }

  /// Bump a queued record's retry count. Missing ids are a no-op (the
  /// record may have been removed by a concurrent successful replay).
  pub fn bump_retry(&self, collection: Collection, id: &str) -> Result<()> {
    self.backend().bump_retry(collection, id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  fn temp_db_path(label: &str) -> PathBuf {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    std::env::temp_dir().join(format!("fieldsync-test-{}-{}.db", label, nanos))
  }

  fn open_store(label: &str) -> DurableRecordStore {
    DurableRecordStore::new("fieldsync", Some(temp_db_path(label)))
  }

  #[test]
  fn test_put_get_all_round_trip() {
    let store = open_store("roundtrip");
    let record = QueuedFieldRecord::new("Joe's Garage", "3");

    store.put(&record).unwrap();

    let all: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert_eq!(all, vec![record]);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let store = open_store("remove");
    let record = QueuedFieldRecord::new("Acme", "7");
    store.put(&record).unwrap();

    store.remove(Collection::FieldRecords, &record.id).unwrap();
    let all: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert!(all.is_empty());

    // Second remove of the same id is a no-op, not an error.
    store.remove(Collection::FieldRecords, &record.id).unwrap();
  }

  #[test]
  fn test_put_overwrites_by_id() {
    let store = open_store("overwrite");
    let mut record = QueuedFieldRecord::new("Before", "1");
    store.put(&record).unwrap();

    record.business_name = "After".to_string();
    store.put(&record).unwrap();

    let all: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].business_name, "After");
  }

  #[test]
  fn test_clear_empties_collection() {
    let store = open_store("clear");
    store.put(&QueuedFieldRecord::new("One", "1")).unwrap();
    store.put(&QueuedFieldRecord::new("Two", "2")).unwrap();

    store.clear(Collection::FieldRecords).unwrap();

    let all: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert!(all.is_empty());
  }

  #[test]
  fn test_bump_retry_is_monotonic() {
    let store = open_store("retry");
    let upload = QueuedUpload::new("corr-1", vec![0u8; 16], "audio/webm");
    store.put(&upload).unwrap();

    for expected in 1..=3u64 {
      store
        .bump_retry(Collection::PendingUploads, &upload.id)
        .unwrap();
      let all: Vec<QueuedUpload> = store.get_all().unwrap();
      assert_eq!(all[0].retry_count, expected);
    }
  }

  #[test]
  fn test_concurrent_bumps_lose_no_updates() {
    let store = Arc::new(open_store("concurrent"));
    let upload = QueuedUpload::new("corr-2", vec![0u8; 4], "audio/webm");
    store.put(&upload).unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
      let store = Arc::clone(&store);
      let id = upload.id.clone();
      handles.push(std::thread::spawn(move || {
        for _ in 0..5 {
          store.bump_retry(Collection::PendingUploads, &id).unwrap();
        }
      }));
    }
    for handle in handles {
      handle.join().unwrap();
    }

    let all: Vec<QueuedUpload> = store.get_all().unwrap();
    assert_eq!(all[0].retry_count, 10);
  }

  #[test]
  fn test_bump_retry_on_missing_id_is_noop() {
    let store = open_store("retry-missing");
    store
      .bump_retry(Collection::PendingUploads, "ghost")
      .unwrap();
  }

  #[test]
  fn test_open_failure_falls_back_invisibly() {
    // A directory is not a valid database file, so the sqlite open fails
    // and the store must route everything to the fallback instead.
    let dir = std::env::temp_dir().join(format!(
      "fieldsync-fallback-{}",
      chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    ));
    std::fs::create_dir_all(&dir).unwrap();

    let store = DurableRecordStore::new("fieldsync", Some(dir));
    store.open();

    let record = QueuedFieldRecord::new("Fallback Foods", "5");
    store.put(&record).unwrap();
    let all: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert_eq!(all, vec![record]);
  }

  #[test]
  fn test_open_is_idempotent() {
    let store = open_store("idempotent");
    store.open();
    store.open();
    store.put(&QueuedFieldRecord::new("Still fine", "2")).unwrap();
  }

  #[test]
  fn test_offline_drop_scenario() {
    let store = open_store("scenario");
    let record = QueuedFieldRecord {
      id: "offline-1700000000-abc123def456".to_string(),
      business_name: "Joe's Garage".to_string(),
      contact_name: None,
      notes: None,
      follow_up_days: "3".to_string(),
      created_at: chrono::Utc::now(),
    };

    store.put(&record).unwrap();
    let queued: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, "offline-1700000000-abc123def456");

    // Server replay succeeded; the record is removed.
    store
      .remove(Collection::FieldRecords, "offline-1700000000-abc123def456")
      .unwrap();
    let queued: Vec<QueuedFieldRecord> = store.get_all().unwrap();
    assert!(queued.is_empty());
  }
}
