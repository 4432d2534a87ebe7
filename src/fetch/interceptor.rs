//! Request dispatch: one of three caching strategies per request class.
//!
//! API GETs are network-first with cache fallback, static assets are
//! cache-first with background revalidation, navigations are network-first
//! with an offline document fallback chain. Non-GET and cross-origin
//! requests pass straight through to the network untouched.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{bucket_name, BucketClass, ResponseCache};
use crate::config::Config;
use crate::store::{DurableRecordStore, MirroredResponse};

use super::client::NetworkClient;
use super::fallback::{self, CACHE_MARKER_HEADER};
use super::types::{Destination, Request, Response};

const STATIC_EXTENSIONS: &[&str] = &[
  "css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf",
  "otf", "map",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestClass {
  /// Not intercepted: non-GET or cross-origin.
  PassThrough,
  Api,
  StaticAsset,
  Navigation,
}

pub struct RequestInterceptor {
  cache: Arc<ResponseCache>,
  store: Arc<DurableRecordStore>,
  network: Arc<dyn NetworkClient>,
  origin: Url,
  api_prefixes: Vec<String>,
  namespace: String,
  version_tag: String,
}

impl RequestInterceptor {
  pub fn new(
    config: &Config,
    cache: Arc<ResponseCache>,
    store: Arc<DurableRecordStore>,
    network: Arc<dyn NetworkClient>,
  ) -> Result<Self> {
    Ok(Self {
      cache,
      store,
      network,
      origin: config.origin_url()?,
      api_prefixes: config.api_prefixes.clone(),
      namespace: config.app_namespace.clone(),
      version_tag: config.version_tag.clone(),
    })
  }

  /// Dispatch one request.
  ///
  /// Intercepted classes always resolve to a response, absorbing network
  /// failures through their fallback chains; only pass-through traffic can
  /// surface a network error.
  pub async fn handle(&self, request: Request) -> Result<Response> {
    match self.classify(&request) {
      RequestClass::PassThrough => self.network.fetch(request).await,
      RequestClass::Api => Ok(self.handle_api(request).await),
      RequestClass::StaticAsset => Ok(self.handle_static(request).await),
      RequestClass::Navigation => Ok(self.handle_navigation(request).await),
    }
  }

  fn classify(&self, request: &Request) -> RequestClass {
    if !request.method.is_get() {
      return RequestClass::PassThrough;
    }
    if request.url.origin() != self.origin.origin() {
      return RequestClass::PassThrough;
    }

    let path = request.url.path();
    if self.api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
      return RequestClass::Api;
    }

    if is_static_asset(request) {
      return RequestClass::StaticAsset;
    }

    RequestClass::Navigation
  }

  fn bucket(&self, class: BucketClass) -> String {
    bucket_name(&self.namespace, class, &self.version_tag)
  }

  /// Network-first with cache fallback.
  async fn handle_api(&self, request: Request) -> Response {
    let bucket = self.bucket(BucketClass::Api);

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.status == 200 {
          if let Err(err) = self.cache.put(&bucket, &request, response.clone()) {
            warn!("failed to cache api response for {}: {}", request.url, err);
          }
          self.mirror_response(&request, &response);
        }
        response
      }
      Err(err) => {
        debug!("network unavailable for {}: {}", request.url, err);

        if let Some(entry) = self.cache.lookup(&bucket, &request) {
          return entry.response.with_header(CACHE_MARKER_HEADER, "hit");
        }
        if let Some(mirrored) = self.mirror_lookup(&request) {
          return mirrored.with_header(CACHE_MARKER_HEADER, "hit");
        }
        fallback::offline_api_response()
      }
    }
  }

  /// Cache-first with background revalidation.
  async fn handle_static(&self, request: Request) -> Response {
    let bucket = self.bucket(BucketClass::Dynamic);

    if let Some(entry) = self.cache.lookup(&bucket, &request) {
      // Refresh the bucket without making the caller wait.
      self.revalidate_later(bucket, request);
      return entry.response;
    }

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.status == 200 {
          if let Err(err) = self.cache.put(&bucket, &request, response.clone()) {
            warn!("failed to cache asset {}: {}", request.url, err);
          }
        }
        response
      }
      Err(err) => {
        debug!("asset fetch failed for {}: {}", request.url, err);
        if is_image(&request) {
          fallback::offline_image_response()
        } else {
          fallback::offline_text_response()
        }
      }
    }
  }

  /// Network-first with offline document fallback.
  async fn handle_navigation(&self, request: Request) -> Response {
    let bucket = self.bucket(BucketClass::Dynamic);

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.is_success() && response.is_html() {
          if let Err(err) = self.cache.put(&bucket, &request, response.clone()) {
            warn!("failed to cache document {}: {}", request.url, err);
          }
        }
        response
      }
      Err(err) => {
        debug!("navigation fetch failed for {}: {}", request.url, err);

        if let Some(entry) = self.cache.lookup(&bucket, &request) {
          return entry.response;
        }
        if let Some(root) = self.cached_root_document(&bucket) {
          return root;
        }
        fallback::offline_page_response()
      }
    }
  }

  fn cached_root_document(&self, bucket: &str) -> Option<Response> {
    let root_url = self.origin.join("/").ok()?;
    let root_request = Request::get(root_url);
    self
      .cache
      .lookup(bucket, &root_request)
      .map(|entry| entry.response)
  }

  fn revalidate_later(&self, bucket: String, request: Request) {
    let cache = Arc::clone(&self.cache);
    let network = Arc::clone(&self.network);

    tokio::spawn(async move {
      match network.fetch(request.clone()).await {
        Ok(response) if response.status == 200 => {
          if let Err(err) = cache.put(&bucket, &request, response) {
            debug!("background refresh for {} not stored: {}", request.url, err);
          }
        }
        Ok(_) => {}
        Err(err) => debug!("background refresh for {} failed: {}", request.url, err),
      }
    });
  }

  /// Best-effort copy of a successful API response into the durable mirror,
  /// so offline fallback survives a process restart.
  fn mirror_response(&self, request: &Request, response: &Response) {
    let mirror = MirroredResponse {
      id: request.key(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: chrono::Utc::now(),
    };

    if let Err(err) = self.store.put(&mirror) {
      debug!("api mirror write for {} failed: {}", request.url, err);
    }
  }

  fn mirror_lookup(&self, request: &Request) -> Option<Response> {
    let key = request.key();
    let mirrored: Vec<MirroredResponse> = match self.store.get_all() {
      Ok(records) => records,
      Err(err) => {
        debug!("api mirror lookup failed: {}", err);
        return None;
      }
    };

    mirrored.into_iter().find(|m| m.id == key).map(|m| Response {
      status: m.status,
      headers: m.headers,
      body: m.body,
    })
  }
}

fn extension(request: &Request) -> Option<String> {
  let path = request.url.path();
  let name = path.rsplit('/').next()?;
  let (_, ext) = name.rsplit_once('.')?;
  Some(ext.to_ascii_lowercase())
}

fn is_static_asset(request: &Request) -> bool {
  if matches!(
    request.destination,
    Some(Destination::Style | Destination::Script | Destination::Image | Destination::Font)
  ) {
    return true;
  }

  extension(request)
    .map(|ext| STATIC_EXTENSIONS.contains(&ext.as_str()))
    .unwrap_or(false)
}

fn is_image(request: &Request) -> bool {
  if matches!(request.destination, Some(Destination::Image)) {
    return true;
  }

  extension(request)
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::client::ScriptedNetwork;
  use crate::fetch::Method;
  use std::path::PathBuf;

  const ORIGIN: &str = "https://app.fieldsync.test";

  fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!(
      "fieldsync-interceptor-{}.db",
      chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    ))
  }

  fn interceptor_with(network: Arc<ScriptedNetwork>) -> (RequestInterceptor, Arc<ResponseCache>) {
    let config = Config::for_tests();
    let cache = Arc::new(ResponseCache::new(&config.app_namespace));
    let store = Arc::new(DurableRecordStore::new(
      &config.app_namespace,
      Some(temp_db_path()),
    ));
    let interceptor =
      RequestInterceptor::new(&config, Arc::clone(&cache), store, network).unwrap();
    (interceptor, cache)
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn json_ok(body: &str) -> Response {
    Response::new(200, "application/json", body.as_bytes().to_vec())
  }

  fn html_ok(body: &str) -> Response {
    Response::new(200, "text/html; charset=utf-8", body.as_bytes().to_vec())
  }

  #[tokio::test]
  async fn test_api_get_is_network_first_and_cached() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/api/drops", ORIGIN);
    network.script(&url, Ok(json_ok(r#"{"items":[1]}"#)));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor.handle(get(&url)).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(cache.lookup("fieldsync-api-vtest", &get(&url)).is_some());
  }

  #[tokio::test]
  async fn test_api_offline_fallback_serves_cache_with_marker() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/api/drops", ORIGIN);
    // First call succeeds and caches; second call hits a dead network.
    network.script(&url, Ok(json_ok(r#"{"items":[1,2]}"#)));
    network.script(&url, Err("connection reset"));
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    interceptor.handle(get(&url)).await.unwrap();
    let fallback = interceptor.handle(get(&url)).await.unwrap();

    assert_eq!(fallback.status, 200);
    assert_eq!(fallback.body, br#"{"items":[1,2]}"#.to_vec());
    assert_eq!(fallback.header(CACHE_MARKER_HEADER), Some("hit"));
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_is_synthetic_503() {
    let network = Arc::new(ScriptedNetwork::new());
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor
      .handle(get(&format!("{}/api/prospects", ORIGIN)))
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "offline");
  }

  #[tokio::test]
  async fn test_non_200_api_response_is_returned_uncached() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/api/drops", ORIGIN);
    network.script(&url, Ok(Response::new(404, "application/json", Vec::new())));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor.handle(get(&url)).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(cache.lookup("fieldsync-api-vtest", &get(&url)).is_none());
  }

  #[tokio::test]
  async fn test_post_passes_through_and_is_never_cached() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/api/drops", ORIGIN);
    network.script(&url, Ok(json_ok(r#"{"created":true}"#)));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    let mut request = get(&url);
    request.method = Method::Post;
    let response = interceptor.handle(request.clone()).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(!cache.key_exists_anywhere(&request.key()));
    // Nor under the GET key.
    assert!(!cache.key_exists_anywhere(&get(&url).key()));
  }

  #[tokio::test]
  async fn test_cross_origin_requests_are_not_intercepted() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = "https://cdn.elsewhere.test/widget.js";
    network.script(url, Ok(Response::new(200, "text/javascript", b"x".to_vec())));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor.handle(get(url)).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(!cache.key_exists_anywhere(&get(url).key()));
  }

  #[tokio::test]
  async fn test_static_asset_cache_first_with_background_refresh() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/assets/app.js", ORIGIN);
    network.script(&url, Ok(Response::new(200, "text/javascript", b"v1".to_vec())));
    network.script(&url, Ok(Response::new(200, "text/javascript", b"v2".to_vec())));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    // Miss: fetched and stored.
    let first = interceptor.handle(get(&url)).await.unwrap();
    assert_eq!(first.body, b"v1");

    // Hit: served from cache, refresh happens in the background.
    let second = interceptor.handle(get(&url)).await.unwrap();
    assert_eq!(second.body, b"v1");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(network.fetch_count(&url), 2);
    let entry = cache.lookup("fieldsync-dynamic-vtest", &get(&url)).unwrap();
    assert_eq!(entry.response.body, b"v2");
  }

  #[tokio::test]
  async fn test_failed_image_request_gets_svg_placeholder() {
    let network = Arc::new(ScriptedNetwork::new());
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor
      .handle(get(&format!("{}/photos/storefront.jpg", ORIGIN)))
      .await
      .unwrap();

    assert_eq!(response.content_type(), Some("image/svg+xml"));
  }

  #[tokio::test]
  async fn test_failed_script_request_gets_plain_offline_body() {
    let network = Arc::new(ScriptedNetwork::new());
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    let response = interceptor
      .handle(get(&format!("{}/assets/vendor.js", ORIGIN)))
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"Offline");
  }

  #[tokio::test]
  async fn test_destination_hint_classifies_extensionless_asset() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/fonts/inter", ORIGIN);
    network.script(&url, Ok(Response::new(200, "font/woff2", b"f".to_vec())));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    let request = get(&url).with_destination(Destination::Font);
    interceptor.handle(request.clone()).await.unwrap();

    assert!(cache.lookup("fieldsync-dynamic-vtest", &request).is_some());
  }

  #[tokio::test]
  async fn test_navigation_success_caches_html_only() {
    let network = Arc::new(ScriptedNetwork::new());
    let page_url = format!("{}/routes", ORIGIN);
    let feed_url = format!("{}/feed", ORIGIN);
    network.script(&page_url, Ok(html_ok("<html>routes</html>")));
    network.script(&feed_url, Ok(Response::new(200, "application/xml", b"<rss/>".to_vec())));
    let (interceptor, cache) = interceptor_with(Arc::clone(&network));

    interceptor.handle(get(&page_url)).await.unwrap();
    interceptor.handle(get(&feed_url)).await.unwrap();

    assert!(cache.lookup("fieldsync-dynamic-vtest", &get(&page_url)).is_some());
    assert!(cache.lookup("fieldsync-dynamic-vtest", &get(&feed_url)).is_none());
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_exact_page() {
    let network = Arc::new(ScriptedNetwork::new());
    let url = format!("{}/routes", ORIGIN);
    network.script(&url, Ok(html_ok("<html>routes</html>")));
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    interceptor.handle(get(&url)).await.unwrap();
    let offline = interceptor.handle(get(&url)).await.unwrap();

    assert_eq!(offline.body, b"<html>routes</html>");
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_root_document() {
    let network = Arc::new(ScriptedNetwork::new());
    let root_url = format!("{}/", ORIGIN);
    network.script(&root_url, Ok(html_ok("<html>shell</html>")));
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    interceptor.handle(get(&root_url)).await.unwrap();
    let offline = interceptor
      .handle(get(&format!("{}/never-visited", ORIGIN)))
      .await
      .unwrap();

    assert_eq!(offline.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_navigation_with_nothing_cached_gets_inline_page() {
    let network = Arc::new(ScriptedNetwork::new());
    let (interceptor, _cache) = interceptor_with(Arc::clone(&network));

    let offline = interceptor
      .handle(get(&format!("{}/anywhere", ORIGIN)))
      .await
      .unwrap();

    assert_eq!(offline.status, 503);
    assert!(offline.is_html());
  }
}
