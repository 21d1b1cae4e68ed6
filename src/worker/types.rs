//! Request and response types seen by the worker.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  Other,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Other,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn post_json<B: Serialize>(url: Url, body: &B) -> Result<Self> {
    let body = serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize body: {}", e))?;
    Ok(Self {
      method: Method::POST,
      url,
      mode: RequestMode::Other,
      headers: vec![("content-type".into(), "application/json".into())],
      body: Some(body),
    })
  }

  /// Stable, fixed-length key for response buckets.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Whether the response body is readable by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin, fully readable
  Basic,
  /// Cross-origin, status and body hidden from the page
  Opaque,
}

impl ResponseKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "opaque" => Self::Opaque,
      _ => Self::Basic,
    }
  }
}

/// A fully buffered response, as stored in a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl CachedResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
    }
  }

  pub fn json<B: Serialize>(status: u16, body: &B) -> Result<Self> {
    let body = serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize body: {}", e))?;
    Ok(Self::new(status, body).with_header("content-type", "application/json"))
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  /// First value of header `name`, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain same-origin 200s go into the static bucket.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_depends_on_method_and_url() {
    let url = Url::parse("http://localhost:5000/api/verify/ABC123").unwrap();
    let get = Request::get(url.clone());
    let post = Request::post_json(url.clone(), &serde_json::json!({})).unwrap();

    assert_eq!(get.cache_key(), Request::navigate(url).cache_key());
    assert_ne!(get.cache_key(), post.cache_key());
    assert_eq!(get.cache_key().len(), 64);
  }

  #[test]
  fn test_cacheable_responses() {
    assert!(CachedResponse::new(200, "ok").is_cacheable());
    assert!(!CachedResponse::new(404, "").is_cacheable());
    assert!(!CachedResponse::new(200, "")
      .with_kind(ResponseKind::Opaque)
      .is_cacheable());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = CachedResponse::json(200, &serde_json::json!({ "ok": true })).unwrap();
    assert_eq!(response.header("Content-Type"), Some("application/json"));
  }
}
