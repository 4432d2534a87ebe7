//! Fixed offline payloads returned when both network and cache come up empty.

use super::types::Response;

/// Header added to responses served from cache instead of the network.
pub const CACHE_MARKER_HEADER: &str = "x-fieldsync-cache";

/// Placeholder shown in place of images that cannot be fetched offline.
const OFFLINE_PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150"><rect width="200" height="150" fill="#e5e7eb"/><text x="100" y="80" font-family="sans-serif" font-size="14" fill="#6b7280" text-anchor="middle">Offline</text></svg>"##;

/// Minimal page shown for navigations with no cached document at all.
const OFFLINE_PAGE_HTML: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1"><title>Offline</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 3rem 1rem;">
<h1>You're offline</h1>
<p>FieldSync couldn't reach the network. Your queued work is safe and will sync when you're back online.</p>
</body>
</html>"#;

/// 503 JSON body for API requests with no cached copy.
pub fn offline_api_response() -> Response {
  Response::new(
    503,
    "application/json",
    br#"{"error":"offline","message":"This data is unavailable while offline."}"#.to_vec(),
  )
}

/// Inline SVG placeholder for image requests that failed outright.
pub fn offline_image_response() -> Response {
  Response::new(200, "image/svg+xml", OFFLINE_PLACEHOLDER_SVG.as_bytes().to_vec())
}

/// Plain-text fallback for non-image static assets.
pub fn offline_text_response() -> Response {
  Response::new(503, "text/plain", b"Offline".to_vec())
}

/// Inline offline page for navigations with no cached document.
pub fn offline_page_response() -> Response {
  Response::new(503, "text/html", OFFLINE_PAGE_HTML.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_api_response_is_json_503() {
    let response = offline_api_response();
    assert_eq!(response.status, 503);
    assert_eq!(response.content_type(), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "offline");
  }

  #[test]
  fn test_offline_image_is_svg() {
    let response = offline_image_response();
    assert_eq!(response.content_type(), Some("image/svg+xml"));
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.starts_with("<svg"));
    assert!(body.ends_with("</svg>"));
    // The hex fill colors must survive into the served bytes.
    assert!(body.contains(r##"fill="#e5e7eb""##));
    assert!(body.contains(r##"fill="#6b7280""##));
  }

  #[test]
  fn test_offline_page_is_html() {
    let response = offline_page_response();
    assert!(response.is_html());
    assert_eq!(response.status, 503);
  }
}
