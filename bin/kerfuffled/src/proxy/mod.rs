//! Host-keyed HTTP reverse proxy. A single listener dispatches every
//! incoming request by its `Host` header to either a live upstream, a
//! static directory, a maintenance page, or an index-page fallback.

mod pages;

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use axum::{
  Router,
  body::Body,
  extract::{Request, State},
  http::{HeaderName, HeaderValue, StatusCode, Uri},
  response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use url::Url;

use crate::error::KerfuffleError;

const VERSION_HEADER: &str = "X-Kerfuffle-Version";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
enum RouteTarget {
  Upstream(Url),
  Static(PathBuf),
}

struct Route {
  target: RouteTarget,
  hold: AtomicBool,
}

/// Owns the host → route table. Cheap to clone (wraps an `Arc`), so both the
/// Manager and the listening server share the same table.
#[derive(Clone)]
pub struct ProxyRouter {
  routes: Arc<DashMap<String, Route>>,
  client: reqwest::Client,
}

impl Default for ProxyRouter {
  fn default() -> Self {
    Self::new()
  }
}

impl ProxyRouter {
  pub fn new() -> Self {
    Self {
      routes: Arc::new(DashMap::new()),
      client: reqwest::Client::new(),
    }
  }

  pub fn install_route(
    &self,
    origin_host: &str,
    target_url: &str,
  ) -> Result<(), KerfuffleError> {
    let host = normalize_host(origin_host)?;
    if self.routes.contains_key(&host) {
      return Err(KerfuffleError::RouteConflict(format!(
        "host '{host}' is already registered"
      )));
    }
    let target = Url::parse(target_url).map_err(|e| {
      KerfuffleError::InvalidArgument(format!("invalid target url '{target_url}': {e}"))
    })?;
    if target.host_str().map(str::is_empty).unwrap_or(true) {
      return Err(KerfuffleError::InvalidArgument(
        "target host cannot be empty".to_string(),
      ));
    }
    self.routes.insert(
      host,
      Route {
        target: RouteTarget::Upstream(target),
        hold: AtomicBool::new(false),
      },
    );
    Ok(())
  }

  pub fn install_static(
    &self,
    origin_host: &str,
    dir: impl Into<PathBuf>,
  ) -> Result<(), KerfuffleError> {
    let host = normalize_host(origin_host)?;
    if self.routes.contains_key(&host) {
      return Err(KerfuffleError::RouteConflict(format!(
        "host '{host}' is already registered"
      )));
    }
    self.routes.insert(
      host,
      Route {
        target: RouteTarget::Static(dir.into()),
        hold: AtomicBool::new(false),
      },
    );
    Ok(())
  }

  pub fn uninstall_route(&self, origin_host: &str) -> Result<(), KerfuffleError> {
    let host = normalize_host(origin_host)?;
    self
      .routes
      .remove(&host)
      .map(|_| ())
      .ok_or_else(|| KerfuffleError::NotFound(format!("route for host '{host}'")))
  }

  pub fn set_hold(&self, origin_host: &str, value: bool) -> Result<(), KerfuffleError> {
    let host = normalize_host(origin_host)?;
    let route = self
      .routes
      .get(&host)
      .ok_or_else(|| KerfuffleError::NotFound(format!("route for host '{host}'")))?;
    route.hold.store(value, Ordering::SeqCst);
    Ok(())
  }

  pub fn is_installed(&self, origin_host: &str) -> bool {
    normalize_host(origin_host)
      .map(|host| self.routes.contains_key(&host))
      .unwrap_or(false)
  }

  /// Builds the axum app that dispatches on `Host`. Kept separate from
  /// `launch` so tests can drive it in-process with `tower::ServiceExt`.
  pub fn into_router(self) -> Router {
    Router::new().fallback(dispatch).with_state(self)
  }

  /// Starts the HTTP listener in the background and returns a handle whose
  /// `stop` triggers graceful shutdown.
  pub fn launch(self, addr: &str) -> anyhow::Result<ProxyHandle> {
    let app = self.into_router();
    let addr = addr.to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
      let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
          tracing::error!(%addr, error = %e, "reverse proxy failed to bind");
          return;
        }
      };
      tracing::info!(%addr, "exposing reverse proxy");
      let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = stop_rx.await;
      });
      if let Err(e) = server.await {
        tracing::error!(error = %e, "reverse proxy server exited with error");
      }
    });

    Ok(ProxyHandle { join, stop_tx: Some(stop_tx) })
  }
}

pub struct ProxyHandle {
  join: tokio::task::JoinHandle<()>,
  stop_tx: Option<oneshot::Sender<()>>,
}

impl ProxyHandle {
  pub async fn stop(mut self) {
    if let Some(tx) = self.stop_tx.take() {
      let _ = tx.send(());
    }
    let _ = self.join.await;
  }
}

fn normalize_host(raw: &str) -> Result<String, KerfuffleError> {
  if raw.is_empty() {
    return Err(KerfuffleError::InvalidArgument(
      "origin host cannot be empty".to_string(),
    ));
  }
  if let Ok(parsed) = Url::parse(raw) {
    if let Some(host) = parsed.host_str() {
      return Ok(host.to_string());
    }
  }
  Ok(raw.to_string())
}

async fn dispatch(State(router): State<ProxyRouter>, request: Request) -> Response {
  let host = request
    .headers()
    .get(axum::http::header::HOST)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default()
    .to_string();

  // Clone what's needed and drop the shard guard before awaiting anything,
  // so a concurrent `set_hold`/`uninstall_route`/`install_route` on a host
  // hashing to the same shard never blocks on this in-flight request.
  let (hold, target) = {
    let Some(route) = router.routes.get(&host) else {
      return (StatusCode::OK, pages::INDEX).into_response();
    };
    (route.hold.load(Ordering::SeqCst), route.target.clone())
  };

  if hold {
    return (StatusCode::OK, pages::MAINTENANCE).into_response();
  }

  match target {
    RouteTarget::Static(dir) => {
      let service = ServeDir::new(dir);
      tower::ServiceExt::oneshot(service, request)
        .await
        .map(|resp| resp.map(Body::new))
        .unwrap_or_else(|_| {
          (StatusCode::INTERNAL_SERVER_ERROR, "static file service error").into_response()
        })
    }
    RouteTarget::Upstream(target) => forward(&router.client, &target, host, request).await,
  }
}

async fn forward(client: &reqwest::Client, target: &Url, original_host: String, request: Request) -> Response {
  let (parts, body) = request.into_parts();

  let path_and_query = parts
    .uri
    .path_and_query()
    .map(|p| p.as_str())
    .unwrap_or("/");
  let upstream_uri = match build_upstream_url(target, path_and_query) {
    Ok(uri) => uri,
    Err(e) => {
      tracing::error!(error = %e, "failed to build upstream url");
      return (StatusCode::BAD_GATEWAY, "bad upstream target").into_response();
    }
  };

  let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
    Ok(bytes) => bytes,
    Err(e) => {
      tracing::error!(error = %e, "failed to read request body");
      return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
    }
  };

  let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
    .unwrap_or(reqwest::Method::GET);

  let mut req_builder = client.request(method, upstream_uri.as_str());
  for (name, value) in parts.headers.iter() {
    if is_hop_by_hop(name.as_str()) {
      continue;
    }
    req_builder = req_builder.header(name.as_str(), value.as_bytes());
  }
  req_builder = req_builder.header("X-Forwarded-Host", &original_host);
  req_builder = req_builder.header("Host", target.host_str().unwrap_or_default());
  req_builder = req_builder.body(body_bytes);

  tracing::info!(
    method = %parts.method,
    origin = %original_host,
    target = %target,
    path = %path_and_query,
    "proxy"
  );

  let upstream_response = match req_builder.send().await {
    Ok(resp) => resp,
    Err(e) => {
      tracing::error!(error = %e, "upstream request failed");
      return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
    }
  };

  let status = upstream_response.status();
  let headers = upstream_response.headers().clone();
  let body = match upstream_response.bytes().await {
    Ok(bytes) => bytes,
    Err(e) => {
      tracing::error!(error = %e, "failed to read upstream response body");
      return (StatusCode::BAD_GATEWAY, "failed to read upstream response").into_response();
    }
  };

  let mut response = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
  for (name, value) in headers.iter() {
    if is_hop_by_hop(name.as_str()) {
      continue;
    }
    if let Some(builder_headers) = response.headers_mut() {
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_str().as_bytes()),
        HeaderValue::from_bytes(value.as_bytes()),
      ) {
        builder_headers.insert(name, value);
      }
    }
  }
  if let Some(builder_headers) = response.headers_mut() {
    builder_headers.insert(VERSION_HEADER, HeaderValue::from_static(VERSION));
  }

  response.body(Body::from(body)).unwrap_or_else(|_| {
    (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
  })
}

fn build_upstream_url(target: &Url, path_and_query: &str) -> anyhow::Result<Uri> {
  let mut upstream = target.clone();
  upstream.set_path("");
  let joined = format!("{}{}", upstream.as_str().trim_end_matches('/'), path_and_query);
  Ok(joined.parse::<Uri>()?)
}

fn is_hop_by_hop(name: &str) -> bool {
  matches!(
    name.to_ascii_lowercase().as_str(),
    "connection"
      | "keep-alive"
      | "proxy-authenticate"
      | "proxy-authorization"
      | "te"
      | "trailer"
      | "transfer-encoding"
      | "upgrade"
      | "host"
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_plain_hostname() {
    assert_eq!(normalize_host("svc.local").unwrap(), "svc.local");
  }

  #[test]
  fn normalizes_full_url_to_host_component() {
    assert_eq!(
      normalize_host("http://svc.local:8080/path").unwrap(),
      "svc.local"
    );
  }

  #[test]
  fn rejects_empty_host() {
    assert!(normalize_host("").is_err());
  }

  #[test]
  fn install_then_reinstall_after_uninstall_succeeds() {
    let router = ProxyRouter::new();
    router.install_route("a.local", "http://localhost:3000").unwrap();
    assert!(router.install_route("a.local", "http://localhost:3001").is_err());
    router.uninstall_route("a.local").unwrap();
    router.install_route("a.local", "http://localhost:3001").unwrap();
  }

  #[test]
  fn install_route_rejects_empty_target_host() {
    let router = ProxyRouter::new();
    assert!(router.install_route("a.local", "http:///just-a-path").is_err());
  }

  #[test]
  fn set_hold_on_missing_route_fails() {
    let router = ProxyRouter::new();
    assert!(router.set_hold("missing.local", true).is_err());
  }
}
