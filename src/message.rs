//! Page↔worker message protocol.
//!
//! Commands flow page→worker over the event channel; broadcasts flow
//! worker→page over a broadcast channel that every open client subscribes
//! to. `CLEAR_CACHE` carries its own reply channel.

use tokio::sync::oneshot;

/// Acknowledgement for a cache-clear command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearCacheAck {
  pub success: bool,
}

/// Commands a page sends to the worker.
#[derive(Debug)]
pub enum WorkerCommand {
  /// Force immediate activation of a newly-installed version.
  SkipWaiting,
  /// Wipe all managed cache buckets; the ack travels back over `reply`.
  ClearCache { reply: oneshot::Sender<ClearCacheAck> },
  /// Application-level signal that connectivity has returned.
  OnlineAgain,
}

/// Broadcasts the worker sends to every open client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientBroadcast {
  /// A new version finished activating.
  Activated { version_tag: String },
  /// A background-sync trigger fired; clients should replay queued work.
  TriggerSync { tag: String },
}

/// Everything that can wake the worker's event loop.
#[derive(Debug)]
pub enum WorkerEvent {
  Command(WorkerCommand),
  /// Platform background-sync event.
  SyncFired { tag: String },
  /// Raw push payload bytes.
  Push { payload: Vec<u8> },
}
