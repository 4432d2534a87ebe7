//! Record types held in the durable store, and the trait that binds them
//! to their collections.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// The fixed set of named collections in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  /// Field records (e.g. brochure drops) created while offline.
  FieldRecords,
  /// Binary uploads (e.g. meeting recordings) awaiting delivery.
  PendingUploads,
  /// Mirror of cached API responses, surviving process restarts.
  ApiMirror,
}

impl Collection {
  pub const ALL: [Collection; 3] = [
    Collection::FieldRecords,
    Collection::PendingUploads,
    Collection::ApiMirror,
  ];

  /// Stable collection name, used as the sqlite table name and as the
  /// fallback-store key suffix.
  pub fn table(&self) -> &'static str {
    match self {
      Collection::FieldRecords => "field_records",
      Collection::PendingUploads => "pending_uploads",
      Collection::ApiMirror => "api_mirror",
    }
  }
}

/// Trait for records the durable store can hold.
pub trait StoredRecord: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Primary key within the record's collection.
  fn id(&self) -> &str;

  /// The collection this record type lives in.
  fn collection() -> Collection;
}

/// A field record (e.g. an offline brochure drop) queued for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedFieldRecord {
  pub id: String,
  pub business_name: String,
  #[serde(default)]
  pub contact_name: Option<String>,
  #[serde(default)]
  pub notes: Option<String>,
  pub follow_up_days: String,
  pub created_at: DateTime<Utc>,
}

impl QueuedFieldRecord {
  pub fn new(business_name: &str, follow_up_days: &str) -> Self {
    Self {
      id: generate_record_id(),
      business_name: business_name.to_string(),
      contact_name: None,
      notes: None,
      follow_up_days: follow_up_days.to_string(),
      created_at: Utc::now(),
    }
  }
}

impl StoredRecord for QueuedFieldRecord {
  fn id(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::FieldRecords
  }
}

/// A binary upload queued while offline.
///
/// `correlation_key` points to the server-side placeholder resource created
/// earlier over the network; the payload is attached to it on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedUpload {
  pub id: String,
  pub correlation_key: String,
  pub binary_payload: Vec<u8>,
  pub mime_type: String,
  pub created_at: DateTime<Utc>,
  /// Failed replay attempts so far. Only ever goes up.
  #[serde(default)]
  pub retry_count: u64,
}

impl QueuedUpload {
  pub fn new(correlation_key: &str, binary_payload: Vec<u8>, mime_type: &str) -> Self {
    Self {
      id: generate_record_id(),
      correlation_key: correlation_key.to_string(),
      binary_payload,
      mime_type: mime_type.to_string(),
      created_at: Utc::now(),
      retry_count: 0,
    }
  }
}

impl StoredRecord for QueuedUpload {
  fn id(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::PendingUploads
  }
}

/// A cached API response mirrored into the store, keyed by request key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredResponse {
  /// The request key ("METHOD url") the response was cached under.
  pub id: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl StoredRecord for MirroredResponse {
  fn id(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::ApiMirror
  }
}

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a collision-resistant local record id.
///
/// Ids exist before any server confirmation does, so they must never collide
/// and are never reused even after the record is deleted. The suffix hashes
/// a nanosecond timestamp with a per-process sequence number; 12 hex chars
/// keeps same-second collisions out of reach even for bulk enqueues.
pub fn generate_record_id() -> String {
  let now = Utc::now();
  let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(now.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
  hasher.update(sequence.to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!("offline-{}-{}", now.timestamp(), &digest[..12])
}
