//! Install/activate orchestration and the manual cache-clear protocol.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::cache::{version_bucket_names, BucketClass, ResponseCache};
use crate::config::Config;
use crate::fetch::{NetworkClient, Request};
use crate::message::{ClearCacheAck, ClientBroadcast};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Active,
}

pub struct LifecycleManager {
  cache: Arc<ResponseCache>,
  network: Arc<dyn NetworkClient>,
  broadcast: broadcast::Sender<ClientBroadcast>,
  origin: Url,
  namespace: String,
  version_tag: String,
  precache_manifest: Vec<String>,
  state: WorkerState,
}

impl LifecycleManager {
  pub fn new(
    config: &Config,
    cache: Arc<ResponseCache>,
    network: Arc<dyn NetworkClient>,
    broadcast: broadcast::Sender<ClientBroadcast>,
  ) -> Result<Self> {
    Ok(Self {
      cache,
      network,
      broadcast,
      origin: config.origin_url()?,
      namespace: config.app_namespace.clone(),
      version_tag: config.version_tag.clone(),
      precache_manifest: config.precache_manifest.clone(),
      state: WorkerState::Installing,
    })
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  fn current_bucket_names(&self) -> Vec<String> {
    version_bucket_names(&self.namespace, &self.version_tag)
  }

  /// Open the current static bucket and best-effort precache the manifest.
  /// A failing asset never aborts the install.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;

    let static_bucket =
      crate::cache::bucket_name(&self.namespace, BucketClass::Static, &self.version_tag);
    self.cache.open_bucket(&static_bucket)?;

    for path in &self.precache_manifest {
      let url = match self.origin.join(path) {
        Ok(url) => url,
        Err(err) => {
          warn!("precache path {} is not a valid URL: {}", path, err);
          continue;
        }
      };

      let request = Request::get(url);
      match self.network.fetch(request.clone()).await {
        Ok(response) if response.status == 200 => {
          if let Err(err) = self.cache.put(&static_bucket, &request, response) {
            warn!("failed to precache {}: {}", path, err);
          }
        }
        Ok(response) => warn!("precache {} returned status {}", path, response.status),
        Err(err) => warn!("precache {} failed: {}", path, err),
      }
    }

    self.state = WorkerState::Installed;
    info!("version {} installed", self.version_tag);
    Ok(())
  }

  /// Evict every stale-version bucket, take over, and tell the clients.
  pub async fn activate(&mut self) -> Result<()> {
    self.state = WorkerState::Activating;

    let keep = self.current_bucket_names();
    let prefix = format!("{}-", self.namespace);

    for name in self.cache.bucket_names()? {
      if name.starts_with(&prefix) && !keep.contains(&name) {
        self.cache.delete_bucket(&name)?;
        info!("evicted stale cache bucket {}", name);
      }
    }
    for name in &keep {
      self.cache.open_bucket(name)?;
    }

    self.state = WorkerState::Active;
    info!("version {} active", self.version_tag);

    // No subscribed clients is fine; replay logic must work without a UI.
    let _ = self.broadcast.send(ClientBroadcast::Activated {
      version_tag: self.version_tag.clone(),
    });

    Ok(())
  }

  /// Force immediate activation of an installed-but-waiting version.
  pub async fn skip_waiting(&mut self) -> Result<()> {
    if self.state == WorkerState::Installed {
      self.activate().await
    } else {
      Ok(())
    }
  }

  /// Wipe all managed buckets and report the outcome.
  pub fn clear_cache(&self) -> ClearCacheAck {
    match self.cache.wipe_namespace() {
      Ok(count) => {
        info!("cleared {} cache buckets", count);
        ClearCacheAck { success: true }
      }
      Err(err) => {
        warn!("cache clear failed: {}", err);
        ClearCacheAck { success: false }
      }
    }
  }
}
