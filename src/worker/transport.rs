//! Network side of the worker.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use url::{Origin, Url};

use super::types::{CachedResponse, Request, ResponseKind};

/// Anything that can perform a request. An `Err` means the network was
/// unreachable; HTTP error statuses are still `Ok`.
pub trait Transport: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<CachedResponse>>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
  origin: Origin,
}

impl ReqwestTransport {
  /// `app_url` decides which responses are same-origin.
  pub fn new(app_url: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: app_url.origin(),
    })
  }

  async fn send(&self, request: &Request) -> Result<CachedResponse> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    // After redirects, the final URL decides whether the body is readable.
    let kind = response_kind(&self.origin, response.url());
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
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(CachedResponse {
      status,
      headers,
      body,
      kind,
    })
  }
}

fn response_kind(app_origin: &Origin, final_url: &Url) -> ResponseKind {
  if final_url.origin() == *app_origin {
    ResponseKind::Basic
  } else {
    ResponseKind::Opaque
  }
}

impl Transport for ReqwestTransport {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<CachedResponse>> {
    Box::pin(self.send(request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Answer one HTTP request on `listener` with `response`.
  async fn serve_once(listener: TcpListener, response: String) {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      request.extend_from_slice(&buf[..n]);
    }
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
  }

  fn ok(body: &str) -> String {
    format!(
      "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
      body.len(),
      body
    )
  }

  async fn listener() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    (listener, url)
  }

  #[test]
  fn test_response_kind_compares_origins() {
    let app = Url::parse("http://localhost:5000").unwrap().origin();
    let same = Url::parse("http://localhost:5000/index.html").unwrap();
    let other = Url::parse("https://cdn.example.com/app.js").unwrap();

    assert_eq!(response_kind(&app, &same), ResponseKind::Basic);
    assert_eq!(response_kind(&app, &other), ResponseKind::Opaque);
  }

  #[tokio::test]
  async fn test_same_origin_response_is_basic() {
    let (app, app_url) = listener().await;
    let server = tokio::spawn(serve_once(app, ok("home")));

    let transport = ReqwestTransport::new(&app_url).unwrap();
    let response = transport
      .fetch(&Request::get(app_url.join("/index.html").unwrap()))
      .await
      .unwrap();
    server.await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "home");
    assert_eq!(response.kind, ResponseKind::Basic);
  }

  #[tokio::test]
  async fn test_redirect_to_other_origin_is_opaque() {
    let (app, app_url) = listener().await;
    let (cdn, cdn_url) = listener().await;
    let target = cdn_url.join("/logo.png").unwrap();
    let redirect = format!(
      "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
      target
    );
    let app_server = tokio::spawn(serve_once(app, redirect));
    let cdn_server = tokio::spawn(serve_once(cdn, ok("png")));

    let transport = ReqwestTransport::new(&app_url).unwrap();
    let response = transport
      .fetch(&Request::get(app_url.join("/logo.png").unwrap()))
      .await
      .unwrap();
    app_server.await.unwrap();
    cdn_server.await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.kind, ResponseKind::Opaque);
  }
}
