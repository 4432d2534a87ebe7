//! The background worker's event loop.
//!
//! Single-threaded and event-driven: commands, sync triggers and push
//! payloads arrive over one unbounded channel and are dispatched to the
//! lifecycle manager, sync coordinator and notification gateway. Intercepted
//! fetches go straight to the interceptor handle, not through the channel,
//! so their responses are registered in the same turn.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use url::Url;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::fetch::{NetworkClient, ReqwestClient, RequestInterceptor};
use crate::lifecycle::LifecycleManager;
use crate::message::{ClientBroadcast, WorkerCommand, WorkerEvent};
use crate::notify::{LogSink, NotificationGateway, NotificationSink};
use crate::store::DurableRecordStore;
use crate::sync::{HttpCollaborator, ServerCollaborator, SyncCoordinator};

pub struct Worker {
  lifecycle: LifecycleManager,
  sync: Arc<SyncCoordinator>,
  gateway: NotificationGateway,
  interceptor: Arc<RequestInterceptor>,
  broadcast: broadcast::Sender<ClientBroadcast>,
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl Worker {
  /// Build a worker with live network and server collaborators.
  pub fn new(config: Config) -> Result<(Self, mpsc::UnboundedSender<WorkerEvent>)> {
    let network: Arc<dyn NetworkClient> = Arc::new(ReqwestClient::new()?);
    let server: Arc<dyn ServerCollaborator> = Arc::new(HttpCollaborator::new(config.server_url()?)?);
    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);

    Self::with_parts(config, network, server, sink)
  }

  /// Build a worker with injected collaborators (the seam tests use).
  pub fn with_parts(
    config: Config,
    network: Arc<dyn NetworkClient>,
    server: Arc<dyn ServerCollaborator>,
    sink: Arc<dyn NotificationSink>,
  ) -> Result<(Self, mpsc::UnboundedSender<WorkerEvent>)> {
    let cache = Arc::new(ResponseCache::new(&config.app_namespace));
    let store = Arc::new(DurableRecordStore::new(
      &config.app_namespace,
      config.database_path.clone(),
    ));
    let (broadcast_tx, _) = broadcast::channel(16);
    let (tx, rx) = mpsc::unbounded_channel();

    let lifecycle = LifecycleManager::new(
      &config,
      Arc::clone(&cache),
      Arc::clone(&network),
      broadcast_tx.clone(),
    )?;
    let sync = Arc::new(SyncCoordinator::new(
      Arc::clone(&store),
      server,
      broadcast_tx.clone(),
      &config.sync_tag,
    ));
    let gateway = NotificationGateway::new(sink);
    let interceptor = Arc::new(RequestInterceptor::new(&config, cache, store, network)?);

    Ok((
      Self {
        lifecycle,
        sync,
        gateway,
        interceptor,
        broadcast: broadcast_tx,
        rx,
      },
      tx,
    ))
  }

  /// Handle to the request dispatch layer.
  pub fn interceptor(&self) -> Arc<RequestInterceptor> {
    Arc::clone(&self.interceptor)
  }

  /// Subscribe as an open client to worker broadcasts.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientBroadcast> {
    self.broadcast.subscribe()
  }

  /// Install, activate, then serve events until the channel closes.
  pub async fn run(&mut self) -> Result<()> {
    self.lifecycle.install().await?;
    self.lifecycle.activate().await?;

    while let Some(event) = self.rx.recv().await {
      self.handle_event(event).await;
    }

    Ok(())
  }

  async fn handle_event(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Command(WorkerCommand::SkipWaiting) => {
        if let Err(err) = self.lifecycle.skip_waiting().await {
          warn!("skip-waiting failed: {}", err);
        }
      }
      WorkerEvent::Command(WorkerCommand::ClearCache { reply }) => {
        let ack = self.lifecycle.clear_cache();
        // The requesting page may already be gone.
        let _ = reply.send(ack);
      }
      WorkerEvent::Command(WorkerCommand::OnlineAgain) => {
        if let Err(err) = self.sync.on_online().await {
          warn!("replay after reconnect failed: {}", err);
        }
      }
      WorkerEvent::SyncFired { tag } => {
        if let Err(err) = self.sync.on_sync_event(&tag).await {
          warn!("background sync for tag {} failed: {}", tag, err);
        }
      }
      WorkerEvent::Push { payload } => self.gateway.on_push(&payload),
    }
  }
}

/// Poll the server until connectivity transitions from lost to regained,
/// then nudge the worker to replay. Stands in for a platform background-sync
/// trigger when no page is open.
pub fn spawn_connectivity_probe(
  tx: mpsc::UnboundedSender<WorkerEvent>,
  probe_url: Url,
  period: Duration,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let client = match reqwest::Client::builder().build() {
      Ok(client) => client,
      Err(err) => {
        warn!("connectivity probe disabled: {}", err);
        return;
      }
    };

    let mut online = true;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      let reachable = client.head(probe_url.clone()).send().await.is_ok();

      if reachable && !online {
        info!("connectivity regained");
        if tx
          .send(WorkerEvent::Command(WorkerCommand::OnlineAgain))
          .is_err()
        {
          break;
        }
      }
      online = reachable;
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::ScriptedNetwork;
  use crate::message::ClearCacheAck;
  use crate::notify::Notification;
  use crate::store::QueuedFieldRecord;
  use crate::sync::ServerCollaborator;
  use color_eyre::eyre::eyre;
  use futures::future::BoxFuture;
  use std::sync::Mutex;
  use tokio::sync::oneshot;

  struct NullCollaborator;

  impl ServerCollaborator for NullCollaborator {
    fn deliver_record<'a>(&'a self, _: &QueuedFieldRecord) -> BoxFuture<'a, Result<()>> {
      Box::pin(async { Err(eyre!("offline")) })
    }

    fn deliver_upload<'a>(&'a self, _: &crate::store::QueuedUpload) -> BoxFuture<'a, Result<()>> {
      Box::pin(async { Err(eyre!("offline")) })
    }
  }

  struct NullSink;

  impl NotificationSink for NullSink {
    fn show(&self, _: Notification) {}
    fn close(&self, _: &str) {}
    fn focus_or_open(&self, _: &str) {}
  }

  struct CountingSink {
    shown: Mutex<usize>,
  }

  impl NotificationSink for CountingSink {
    fn show(&self, _: Notification) {
      *self.shown.lock().unwrap() += 1;
    }
    fn close(&self, _: &str) {}
    fn focus_or_open(&self, _: &str) {}
  }

  fn test_config() -> Config {
    let mut config = Config::for_tests();
    config.database_path = Some(std::env::temp_dir().join(format!(
      "fieldsync-worker-{}.db",
      chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    )));
    config
  }

  #[tokio::test]
  async fn test_worker_activates_and_acks_clear_cache() {
    let (mut worker, tx) = Worker::with_parts(
      test_config(),
      Arc::new(ScriptedNetwork::new()),
      Arc::new(NullCollaborator),
      Arc::new(NullSink),
    )
    .unwrap();
    let mut broadcasts = worker.subscribe();

    let handle = tokio::spawn(async move { worker.run().await });

    assert_eq!(
      broadcasts.recv().await.unwrap(),
      ClientBroadcast::Activated {
        version_tag: "vtest".to_string()
      }
    );

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(WorkerEvent::Command(WorkerCommand::ClearCache { reply: reply_tx }))
      .unwrap();

    assert_eq!(reply_rx.await.unwrap(), ClearCacheAck { success: true });

    drop(tx);
    handle.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_sync_event_broadcasts_trigger_with_zero_clients() {
    let (mut worker, tx) = Worker::with_parts(
      test_config(),
      Arc::new(ScriptedNetwork::new()),
      Arc::new(NullCollaborator),
      Arc::new(NullSink),
    )
    .unwrap();

    // No subscribers at all; the worker must not care.
    let handle = tokio::spawn(async move { worker.run().await });

    tx.send(WorkerEvent::SyncFired {
      tag: "fieldsync-replay".to_string(),
    })
    .unwrap();

    drop(tx);
    handle.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_push_event_reaches_the_gateway() {
    let sink = Arc::new(CountingSink {
      shown: Mutex::new(0),
    });
    let (mut worker, tx) = Worker::with_parts(
      test_config(),
      Arc::new(ScriptedNetwork::new()),
      Arc::new(NullCollaborator),
      Arc::clone(&sink) as Arc<dyn NotificationSink>,
    )
    .unwrap();

    let handle = tokio::spawn(async move { worker.run().await });

    tx.send(WorkerEvent::Push {
      payload: br#"{"title":"Search done"}"#.to_vec(),
    })
    .unwrap();

    drop(tx);
    handle.await.unwrap().unwrap();

    assert_eq!(*sink.shown.lock().unwrap(), 1);
  }
}
