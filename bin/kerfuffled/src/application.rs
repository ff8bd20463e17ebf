//! One deployed repository: its manifest-derived provisions, proxies, and DNS
//! bindings, the live processes running its provisions, and its status log.

use std::{
  collections::BTreeMap,
  path::PathBuf,
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use debounce::Debounce;
use kerfuffle_client::entities::{
  AppStatus, DnsBinding, InstallConfiguration, Meta, Provision, Proxy, StatusFlag,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::supervisor::Process;

/// Aggregate root for one cloned repository. Owns everything bootstrapped
/// from its manifest; the [`crate::manager::Manager`] owns the map of these
/// keyed by id.
pub struct Application {
  pub id: String,
  pub root_path: PathBuf,
  pub install_configuration: InstallConfiguration,
  meta: AsyncMutex<Meta>,
  pub maintenance_mode: AtomicBool,
  pub created: DateTime<Utc>,
  status_log: AsyncMutex<Vec<AppStatus>>,
  /// Empty until `set_manifest` runs once, right after the manifest is
  /// parsed; a `DashMap` so reads from REST handlers never contend with the
  /// one-time write.
  pub provisions: DashMap<String, Provision>,
  /// Mutated once during bootstrap (port allocation writes `bind_port`
  /// back); a `DashMap` gives the same interior mutability the route table
  /// uses without introducing a second locking convention.
  pub proxies: DashMap<String, Proxy>,
  pub dns_bindings: DashMap<String, DnsBinding>,
  pub processes: DashMap<String, std::sync::Arc<Process>>,
  last_commit: Debounce<Result<git::LatestCommit, String>>,
}

impl Application {
  pub fn new(id: String, root_path: PathBuf, install_configuration: InstallConfiguration) -> Self {
    Self {
      id,
      root_path,
      install_configuration,
      meta: AsyncMutex::new(Meta::default()),
      maintenance_mode: AtomicBool::new(false),
      created: Utc::now(),
      status_log: AsyncMutex::new(Vec::new()),
      provisions: DashMap::new(),
      proxies: DashMap::new(),
      dns_bindings: DashMap::new(),
      processes: DashMap::new(),
      last_commit: Debounce::new(Duration::from_secs(60)),
    }
  }

  /// Fills in the manifest-derived collections. Called exactly once, by the
  /// Manager, right after the manifest has been parsed (§4.8 step 5).
  pub fn set_manifest(
    &self,
    meta: Meta,
    provisions: BTreeMap<String, Provision>,
    dns_bindings: BTreeMap<String, DnsBinding>,
  ) {
    *self.meta.try_lock().expect("set_manifest runs before the Application is shared") = meta;
    for (id, provision) in provisions {
      self.provisions.insert(id, provision);
    }
    for (id, binding) in dns_bindings {
      self.dns_bindings.insert(id, binding);
    }
  }

  pub async fn meta(&self) -> Meta {
    self.meta.lock().await.clone()
  }

  pub async fn push_status(&self, flag: StatusFlag, reason: impl Into<String>) {
    let mut log = self.status_log.lock().await;
    log.insert(0, AppStatus::new(flag, reason));
  }

  pub async fn status(&self) -> AppStatus {
    self
      .status_log
      .lock()
      .await
      .first()
      .cloned()
      .unwrap_or_else(|| AppStatus::new(StatusFlag::Unknown, "no status recorded"))
  }

  pub async fn status_log(&self) -> Vec<AppStatus> {
    self.status_log.lock().await.clone()
  }

  pub async fn replace_status_log(&self, log: Vec<AppStatus>) {
    *self.status_log.lock().await = log;
  }

  /// The read-only view serialized across the REST boundary.
  pub async fn to_view(&self) -> kerfuffle_client::entities::Application {
    kerfuffle_client::entities::Application {
      id: self.id.clone(),
      install_configuration: self.install_configuration.clone(),
      meta: self.meta().await,
      maintenance_mode: self.maintenance_mode.load(Ordering::SeqCst),
      created: self.created,
      status_log: self.status_log().await,
    }
  }

  /// Rate-limited (P9, one per minute) read of the checked-out commit.
  pub async fn get_last_git_commit(&self) -> Result<git::LatestCommit, String> {
    let root_path = self.root_path.clone();
    self
      .last_commit
      .run(|| async move { git::get_commit_hash_info(&root_path).await.map_err(|e| e.to_string()) })
      .await
  }

  /// Host env ∪ `provision.environment_variables` ∪ `APP_HOST`/`APP_PORT`
  /// when a proxy keyed the same as the provision has a bound port.
  pub fn compose_env(&self, provision: &Provision) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();
    for kv in &provision.environment_variables {
      if let Some((k, v)) = kv.split_once('=') {
        env.push((k.to_string(), v.to_string()));
      }
    }
    if let Some(proxy) = self.proxies.get(&provision.id) {
      if !proxy.bind_port.is_empty() {
        env.push(("APP_HOST".to_string(), format!("localhost:{}", proxy.bind_port)));
        env.push(("APP_PORT".to_string(), proxy.bind_port.clone()));
      }
    }
    env
  }

  /// Sets status `shutdown`, then kills every owned process best-effort.
  /// Per §7, a failed kill is logged and does not abort the others.
  pub async fn shutdown(&self) {
    self.push_status(StatusFlag::Shutdown, "shutting down").await;
    for entry in self.processes.iter() {
      if let Err(e) = entry.value().kill().await {
        tracing::warn!(app = %self.id, provision = entry.key(), error = %e, "failed to kill process during shutdown");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Application {
    Application::new(
      "demo@main".to_string(),
      std::env::temp_dir(),
      InstallConfiguration::new("https://example.test/repo"),
    )
  }

  #[tokio::test]
  async fn status_log_is_newest_first() {
    let app = sample();
    app.push_status(StatusFlag::Booting, "booting").await;
    app.push_status(StatusFlag::Running, "install complete").await;
    let log = app.status_log().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].flag, StatusFlag::Running);
    assert_eq!(log[1].flag, StatusFlag::Booting);
  }

  #[tokio::test]
  async fn compose_env_adds_app_host_and_port_for_matching_proxy() {
    let app = sample();
    app.proxies.insert(
      "web".to_string(),
      Proxy {
        hosts: vec!["svc.local".to_string()],
        bind_port: "4000".to_string(),
        static_dir: String::new(),
        hold: false,
      },
    );
    let provision = Provision {
      id: "web".to_string(),
      environment_variables: vec!["FOO=bar".to_string()],
      ..Default::default()
    };
    let env = app.compose_env(&provision);
    assert!(env.contains(&("APP_HOST".to_string(), "localhost:4000".to_string())));
    assert!(env.contains(&("APP_PORT".to_string(), "4000".to_string())));
    assert!(env.contains(&("FOO".to_string(), "bar".to_string())));
  }

  #[tokio::test]
  async fn shutdown_pushes_shutdown_status() {
    let app = sample();
    app.shutdown().await;
    assert_eq!(app.status().await.flag, StatusFlag::Shutdown);
  }
}
