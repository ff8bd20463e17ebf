//! Entrypoint: loads configuration, rehydrates persisted applications,
//! launches the reverse proxy and the REST control plane, and waits for
//! either an operator signal or a `/debug/shutdown` request before tearing
//! everything down.

mod api;
mod application;
mod config;
mod dns;
mod error;
mod manager;
mod manifest;
mod proxy;
mod supervisor;

use std::sync::Arc;

use clap::Parser;
use config::{CliArgs, Config};
use manager::Manager;
use proxy::ProxyRouter;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let args = CliArgs::parse();
  let config = Config::load(&args.config)?;
  logger::init(&config.log)?;

  tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting kerfuffled");

  let proxy_router = ProxyRouter::new();
  let manager = Arc::new(Manager::new(
    config.app_data_path.clone(),
    config.cf_zones_path.clone(),
    proxy_router.clone(),
  ));

  if let Err(e) = manager.load().await {
    tracing::error!(error = %e, "failed to rehydrate applications from disk");
  }

  let proxy_handle = proxy_router
    .launch(&config.reverse_proxy_bind)
    .map_err(|e| anyhow::anyhow!("failed to launch reverse proxy on {}: {e}", config.reverse_proxy_bind))?;

  let api_listener = tokio::net::TcpListener::bind(&config.api_bind)
    .await
    .map_err(|e| anyhow::anyhow!("failed to bind REST facade on {}: {e}", config.api_bind))?;

  let shutdown = Arc::new(Notify::new());
  let api_state = api::ApiState {
    manager: manager.clone(),
    shutdown: shutdown.clone(),
  };
  tracing::info!(addr = %config.api_bind, "exposing REST facade");
  let api_join = tokio::spawn(async move {
    if let Err(e) = axum::serve(api_listener, api::app(api_state)).await {
      tracing::error!(error = %e, "REST facade exited with error");
    }
  });

  wait_for_shutdown_signal(&shutdown).await;

  tracing::info!("shutting down");
  manager.shutdown().await;
  proxy_handle.stop().await;
  api_join.abort();

  Ok(())
}

/// Resolves once either the operator sends SIGINT/SIGTERM, or `/debug/shutdown`
/// notifies the shared handle.
async fn wait_for_shutdown_signal(debug_shutdown: &Notify) {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::warn!(error = %e, "failed to install SIGTERM handler");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("received ctrl-c"),
    _ = terminate => tracing::info!("received sigterm"),
    _ = debug_shutdown.notified() => tracing::info!("received shutdown request via /debug/shutdown"),
  }
}
