//! Network client seam: the interceptor talks to the network only through
//! this trait, so tests can script responses without any I/O.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;

use super::types::{Request, Response};

pub trait NetworkClient: Send + Sync {
  /// Perform the request against the live network.
  ///
  /// Cancellation is the caller's: dropping the returned future abandons
  /// the fetch.
  fn fetch<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Response>>;
}

/// Live client backed by reqwest.
pub struct ReqwestClient {
  http: reqwest::Client,
}

impl ReqwestClient {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { http })
  }
}

impl NetworkClient for ReqwestClient {
  fn fetch<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Response>> {
    let http = self.http.clone();

    Box::pin(async move {
      let mut builder = http.request(request.method.to_reqwest(), request.url.clone());
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    })
  }
}

/// Scripted network double for tests. Each URL carries a queue of outcomes
/// consumed in order; unscripted URLs behave as if the device is offline.
#[cfg(test)]
pub struct ScriptedNetwork {
  scripts: std::sync::Mutex<ScriptBook>,
  fetched: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
type ScriptedOutcome = std::result::Result<Response, String>;

#[cfg(test)]
type ScriptBook = std::collections::HashMap<String, std::collections::VecDeque<ScriptedOutcome>>;

#[cfg(test)]
impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      scripts: std::sync::Mutex::new(std::collections::HashMap::new()),
      fetched: std::sync::Mutex::new(Vec::new()),
    }
  }

  pub fn script(&self, url: &str, outcome: std::result::Result<Response, &str>) {
    self
      .scripts
      .lock()
      .unwrap()
      .entry(url.to_string())
      .or_default()
      .push_back(outcome.map_err(String::from));
  }

  pub fn fetched_urls(&self) -> Vec<String> {
    self.fetched.lock().unwrap().clone()
  }

  pub fn fetch_count(&self, url: &str) -> usize {
    self.fetched.lock().unwrap().iter().filter(|u| *u == url).count()
  }
}

#[cfg(test)]
impl NetworkClient for ScriptedNetwork {
  fn fetch<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Response>> {
    let url = request.url.to_string();
    self.fetched.lock().unwrap().push(url.clone());

    let outcome = self
      .scripts
      .lock()
      .unwrap()
      .get_mut(&url)
      .and_then(|queue| queue.pop_front());

    Box::pin(async move {
      match outcome {
        Some(Ok(response)) => Ok(response),
        Some(Err(message)) => Err(eyre!(message)),
        None => Err(eyre!("network unreachable: {}", url)),
      }
    })
  }
}
