//! Push-driven notifications and click routing.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Push payload schema. Unknown fields are ignored; everything is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub badge: Option<String>,
  #[serde(default)]
  pub data: PushData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub url: Option<String>,
  pub job_id: Option<String>,
}

/// A rendered OS notification.
#[derive(Debug, Clone, Default)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  /// Stable tag so a second push for the same job replaces, not stacks.
  pub tag: Option<String>,
  /// Whether dismissal requires explicit user interaction.
  pub require_interaction: bool,
  pub data: PushData,
}

/// Platform capability the gateway renders through.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: Notification);
  fn close(&self, tag: &str);
  /// Focus an open app window and navigate it, or open a new one.
  fn focus_or_open(&self, path: &str);
}

/// Sink for headless runs: notifications go to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn show(&self, notification: Notification) {
    info!(
      "notification: {} ({})",
      notification.title,
      notification.tag.as_deref().unwrap_or("untagged")
    );
  }

  fn close(&self, tag: &str) {
    debug!("closing notification {}", tag);
  }

  fn focus_or_open(&self, path: &str) {
    info!("navigating client to {}", path);
  }
}

/// Long-running background job kinds whose notifications must stay up until
/// the user acts on them.
const JOB_KINDS: &[&str] = &["prospect_search_complete", "recording_transcribed"];

const DEFAULT_TITLE: &str = "FieldSync";
const DEFAULT_BODY: &str = "Something new is ready for you.";

pub struct NotificationGateway {
  sink: Arc<dyn NotificationSink>,
}

impl NotificationGateway {
  pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
    Self { sink }
  }

  /// Render a notification for raw push payload bytes.
  ///
  /// A malformed payload gets a generic notification instead of being
  /// dropped.
  pub fn on_push(&self, payload: &[u8]) {
    let payload: PushPayload = match serde_json::from_slice(payload) {
      Ok(parsed) => parsed,
      Err(err) => {
        debug!("malformed push payload, using generic notification: {}", err);
        PushPayload::default()
      }
    };

    self.sink.show(build_notification(payload));
  }

  /// Route a click on a notification (or one of its actions).
  pub fn on_click(&self, notification: &Notification, action: Option<&str>) {
    if action == Some("dismiss") {
      if let Some(tag) = &notification.tag {
        self.sink.close(tag);
      }
      return;
    }

    self.sink.focus_or_open(&destination(&notification.data));
  }
}

fn is_background_job(data: &PushData) -> bool {
  if data.job_id.is_some() {
    return true;
  }
  data
    .kind
    .as_deref()
    .map(|kind| JOB_KINDS.contains(&kind))
    .unwrap_or(false)
}

fn build_notification(payload: PushPayload) -> Notification {
  let job = is_background_job(&payload.data);

  // Job pushes replace each other per job; key by the job id when present,
  // by the kind otherwise.
  let tag = if job {
    payload
      .data
      .job_id
      .as_ref()
      .map(|id| format!("job-{}", id))
      .or_else(|| payload.data.kind.as_ref().map(|kind| format!("job-{}", kind)))
  } else {
    None
  };

  Notification {
    title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
    body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
    icon: payload.icon,
    badge: payload.badge,
    tag,
    require_interaction: job,
    data: payload.data,
  }
}

/// Click destination, in priority order: explicit URL, known type mapping,
/// the root path.
fn destination(data: &PushData) -> String {
  if let Some(url) = &data.url {
    return url.clone();
  }

  match data.kind.as_deref() {
    Some("prospect_search_complete") => "/prospect-finder".to_string(),
    Some("recording_transcribed") => "/recordings".to_string(),
    _ => "/".to_string(),
  }
}
