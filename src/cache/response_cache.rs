//! Named, versioned cache buckets of response snapshots.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::fetch::{Request, Response};

/// A single cached response, keyed by the request's method + URL.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub method: String,
  pub url: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

type Bucket = HashMap<String, CachedEntry>;

/// Process-shared store of named buckets.
///
/// Overlapping writes to the same key are last-write-wins; each operation
/// holds the lock for its own duration only.
pub struct ResponseCache {
  namespace: String,
  buckets: Mutex<HashMap<String, Bucket>>,
}

impl ResponseCache {
  pub fn new(namespace: &str) -> Self {
    Self {
      namespace: namespace.to_string(),
      buckets: Mutex::new(HashMap::new()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Bucket>>> {
    self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Ensure a bucket exists (empty if new).
  pub fn open_bucket(&self, name: &str) -> Result<()> {
    self.lock()?.entry(name.to_string()).or_default();
    Ok(())
  }

  /// Store a response snapshot under the request's key.
  ///
  /// Only GET requests are ever cached; anything else is refused with a
  /// warning rather than stored.
  pub fn put(&self, bucket: &str, request: &Request, response: Response) -> Result<()> {
    if !request.method.is_get() {
      warn!(
        "refusing to cache {} {} (only GET responses are cacheable)",
        request.method.as_str(),
        request.url
      );
      return Ok(());
    }

    let entry = CachedEntry {
      method: request.method.as_str().to_string(),
      url: request.url.to_string(),
      response,
      cached_at: Utc::now(),
    };

    self
      .lock()?
      .entry(bucket.to_string())
      .or_default()
      .insert(request.key(), entry);

    Ok(())
  }

  /// Look up a cached response for the request.
  pub fn lookup(&self, bucket: &str, request: &Request) -> Option<CachedEntry> {
    let buckets = match self.lock() {
      Ok(guard) => guard,
      Err(err) => {
        warn!("cache lookup failed: {}", err);
        return None;
      }
    };

    buckets.get(bucket).and_then(|b| b.get(&request.key())).cloned()
  }

  /// Delete a bucket and everything in it. Returns whether it existed.
  pub fn delete_bucket(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  /// Names of every bucket currently open.
  pub fn bucket_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  /// Delete every bucket belonging to this namespace. Returns the count
  /// removed. Used by the manual cache-clear protocol.
  pub fn wipe_namespace(&self) -> Result<usize> {
    let prefix = format!("{}-", self.namespace);
    let mut buckets = self.lock()?;
    let before = buckets.len();
    buckets.retain(|name, _| !name.starts_with(&prefix));
    Ok(before - buckets.len())
  }

  /// Whether any bucket holds an entry for the given request key.
  #[cfg(test)]
  pub fn key_exists_anywhere(&self, key: &str) -> bool {
    self
      .buckets
      .lock()
      .map(|buckets| buckets.values().any(|b| b.contains_key(key)))
      .unwrap_or(false)
  }
}
