//! Replay of queued records once connectivity returns.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::message::ClientBroadcast;
use crate::store::{Collection, DurableRecordStore, QueuedFieldRecord, QueuedUpload};

/// The server endpoints queued records replay against.
///
/// Endpoints are assumed idempotent per logical record; at-least-once
/// delivery is acceptable, silent loss is not.
pub trait ServerCollaborator: Send + Sync {
  fn deliver_record<'a>(&'a self, record: &QueuedFieldRecord) -> BoxFuture<'a, Result<()>>;
  fn deliver_upload<'a>(&'a self, upload: &QueuedUpload) -> BoxFuture<'a, Result<()>>;
}

/// Live collaborator posting to the configured server.
pub struct HttpCollaborator {
  http: reqwest::Client,
  base_url: Url,
}

impl HttpCollaborator {
  pub fn new(mut base_url: Url) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    // Url::join treats a non-slash-terminated last segment as a file and
    // replaces it, so `https://host/v1` would lose its `/v1` prefix.
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self { http, base_url })
  }
}

impl ServerCollaborator for HttpCollaborator {
  fn deliver_record<'a>(&'a self, record: &QueuedFieldRecord) -> BoxFuture<'a, Result<()>> {
    let http = self.http.clone();
    let url = self.base_url.join("api/drops");
    let body = serde_json::to_vec(record);
    let id = record.id.clone();

    Box::pin(async move {
      let url = url.map_err(|e| eyre!("Invalid drops endpoint: {}", e))?;
      let body = body.map_err(|e| eyre!("Failed to serialize record {}: {}", id, e))?;

      let response = http
        .post(url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| eyre!("Replay of {} failed: {}", id, e))?;

      if response.status().is_success() {
        Ok(())
      } else {
        Err(eyre!("Server rejected record {}: {}", id, response.status()))
      }
    })
  }

  fn deliver_upload<'a>(&'a self, upload: &QueuedUpload) -> BoxFuture<'a, Result<()>> {
    let http = self.http.clone();
    let url = self
      .base_url
      .join(&format!("api/recordings/{}/media", upload.correlation_key));
    let body = upload.binary_payload.clone();
    let mime_type = upload.mime_type.clone();
    let id = upload.id.clone();

    Box::pin(async move {
      let url = url.map_err(|e| eyre!("Invalid upload endpoint: {}", e))?;

      let response = http
        .post(url)
        .header("content-type", mime_type)
        .body(body)
        .send()
        .await
        .map_err(|e| eyre!("Replay of upload {} failed: {}", id, e))?;

      if response.status().is_success() {
        Ok(())
      } else {
        Err(eyre!("Server rejected upload {}: {}", id, response.status()))
      }
    })
  }
}

/// Drains the durable queue when a sync trigger fires.
///
/// Records are removed only after the collaborator confirms success; a
/// failed replay bumps the retry count and leaves the record queued for the
/// next trigger, indefinitely. An in-flight set keyed by record id keeps two
/// overlapping triggers from double-submitting the same record; replays of
/// different records run in parallel.
pub struct SyncCoordinator {
  store: Arc<DurableRecordStore>,
  server: Arc<dyn ServerCollaborator>,
  broadcast: broadcast::Sender<ClientBroadcast>,
  sync_tag: String,
  in_flight: Mutex<HashSet<String>>,
}

impl SyncCoordinator {
  pub fn new(
    store: Arc<DurableRecordStore>,
    server: Arc<dyn ServerCollaborator>,
    broadcast: broadcast::Sender<ClientBroadcast>,
    sync_tag: &str,
  ) -> Self {
    Self {
      store,
      server,
      broadcast,
      sync_tag: sync_tag.to_string(),
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  /// Platform background-sync event. Unknown tags are ignored.
  pub async fn on_sync_event(&self, tag: &str) -> Result<()> {
    if tag != self.sync_tag {
      debug!("ignoring unknown sync tag {}", tag);
      return Ok(());
    }
    self.drain(tag).await
  }

  /// Explicit application-level "back online" signal.
  pub async fn on_online(&self) -> Result<()> {
    let tag = self.sync_tag.clone();
    self.drain(&tag).await
  }

  async fn drain(&self, tag: &str) -> Result<()> {
    // Clients with their own queued work replay it themselves.
    let _ = self.broadcast.send(ClientBroadcast::TriggerSync {
      tag: tag.to_string(),
    });

    let records: Vec<QueuedFieldRecord> = self.store.get_all()?;
    let uploads: Vec<QueuedUpload> = self.store.get_all()?;

    if records.is_empty() && uploads.is_empty() {
      return Ok(());
    }
    info!(
      "replaying {} field records and {} uploads",
      records.len(),
      uploads.len()
    );

    let record_futures = records.into_iter().map(|r| self.replay_record(r));
    let upload_futures = uploads.into_iter().map(|u| self.replay_upload(u));

    futures::future::join(
      futures::future::join_all(record_futures),
      futures::future::join_all(upload_futures),
    )
    .await;

    Ok(())
  }

  /// Claim an id for replay. Returns false if another drain already has it.
  fn begin(&self, id: &str) -> bool {
    match self.in_flight.lock() {
      Ok(mut set) => set.insert(id.to_string()),
      Err(err) => {
        warn!("in-flight set unavailable: {}", err);
        false
      }
    }
  }

  fn finish(&self, id: &str) {
    if let Ok(mut set) = self.in_flight.lock() {
      set.remove(id);
    }
  }

  async fn replay_record(&self, record: QueuedFieldRecord) {
    if !self.begin(&record.id) {
      debug!("record {} already replaying, skipping", record.id);
      return;
    }

    match self.server.deliver_record(&record).await {
      Ok(()) => {
        if let Err(err) = self.store.remove(Collection::FieldRecords, &record.id) {
          warn!("replayed record {} could not be removed: {}", record.id, err);
        }
      }
      Err(err) => {
        debug!("replay of record {} failed: {}", record.id, err);
        if let Err(err) = self.store.bump_retry(Collection::FieldRecords, &record.id) {
          warn!("retry bump for {} failed: {}", record.id, err);
        }
      }
    }

    self.finish(&record.id);
  }

  async fn replay_upload(&self, upload: QueuedUpload) {
    if !self.begin(&upload.id) {
      debug!("upload {} already replaying, skipping", upload.id);
      return;
    }

    match self.server.deliver_upload(&upload).await {
      Ok(()) => {
        if let Err(err) = self.store.remove(Collection::PendingUploads, &upload.id) {
          warn!("replayed upload {} could not be removed: {}", upload.id, err);
        }
      }
      Err(err) => {
        debug!("replay of upload {} failed: {}", upload.id, err);
        if let Err(err) = self.store.bump_retry(Collection::PendingUploads, &upload.id) {
          warn!("retry bump for {} failed: {}", upload.id, err);
        }
      }
    }

    self.finish(&upload.id);
  }
}
