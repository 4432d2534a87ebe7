//! Request and response types shared by the interception layer.

use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  pub fn is_get(&self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn to_reqwest(self) -> reqwest::Method {
    match self {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
      Method::Options => reqwest::Method::OPTIONS,
    }
  }
}

/// What kind of resource the requester expects, when known.
///
/// Mirrors the destination hint a fetch carries alongside the URL; used to
/// classify requests whose URL alone is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Style,
  Script,
  Image,
  Font,
  Document,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Option<Destination>,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: None,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = Some(destination);
    self
  }

  /// Cache key for this request: method plus full URL.
  pub fn key(&self) -> String {
    format!("{} {}", self.method.as_str(), self.url)
  }
}

/// A response snapshot: status, headers and the full body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn is_html(&self) -> bool {
    self
      .content_type()
      .map(|ct| ct.starts_with("text/html"))
      .unwrap_or(false)
  }

  /// Return a copy with the given header set, replacing any existing value.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    if let Some(existing) = self
      .headers
      .iter_mut()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
    {
      existing.1 = value.to_string();
    } else {
      self.headers.push((name.to_string(), value.to_string()));
    }
    self
  }
}
