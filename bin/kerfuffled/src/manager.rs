//! Process-wide registry of every installed [`Application`]: install,
//! uninstall, reload, rehydrate, maintenance toggling, and shutdown.

use std::{
  collections::BTreeMap,
  net::TcpListener,
  path::{Path, PathBuf},
  sync::Arc,
};

use dashmap::DashMap;
use kerfuffle_client::entities::{DnsRecord, InstallConfiguration, StatusFlag};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One row of `.cf-dns`: the apex zone alongside the record published for
/// it, so `uninstall` knows both what to delete and which zone token file
/// to authenticate the deletion with.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedDnsRecord {
  zone: String,
  record: DnsRecord,
}

use crate::{
  application::Application,
  dns, manifest,
  proxy::ProxyRouter,
  supervisor::{self, Process},
};

/// Derives the deterministic Application id: a URL-slug of the repository,
/// falling back to `hex(md5(repo+branch+bootstrap_path))` when the
/// repository URL doesn't slugify to anything usable, then `"{slug}@{branch}"`.
pub fn derive_id(config: &InstallConfiguration) -> String {
  let slug = slug::slugify(&config.repository);
  let base = if slug.is_empty() {
    let mut hasher = Md5::new();
    hasher.update(config.repository.as_bytes());
    hasher.update(config.branch.as_bytes());
    hasher.update(config.bootstrap_path.as_bytes());
    hex::encode(hasher.finalize())
  } else {
    slug
  };
  format!("{base}@{}", config.branch)
}

pub struct Manager {
  pub app_data_path: PathBuf,
  pub zone_dir: PathBuf,
  applications: DashMap<String, Arc<Application>>,
  proxy_router: ProxyRouter,
  /// Serializes the multi-step window of `reload_application` and
  /// `uninstall` against each other for the same id.
  uninstall_lock: RwLock<()>,
}

impl Manager {
  pub fn new(app_data_path: PathBuf, zone_dir: PathBuf, proxy_router: ProxyRouter) -> Self {
    Self {
      app_data_path,
      zone_dir,
      applications: DashMap::new(),
      proxy_router,
      uninstall_lock: RwLock::new(()),
    }
  }

  pub fn get(&self, id: &str) -> Option<Arc<Application>> {
    self.applications.get(id).map(|e| e.value().clone())
  }

  pub fn list(&self) -> Vec<Arc<Application>> {
    self.applications.iter().map(|e| e.value().clone()).collect()
  }

  fn install_record_path(&self, id: &str) -> PathBuf {
    self.app_data_path.join(format!("{id}.install-info"))
  }

  /// Steps 1-10 of §4.8. On any failure after the Application is registered,
  /// the Application remains registered (status already records why) so the
  /// operator can inspect or reload it.
  pub async fn install_from_repo(&self, mut config: InstallConfiguration) -> anyhow::Result<Arc<Application>> {
    config.load_defaults();
    let id = derive_id(&config);

    if self.applications.contains_key(&id) {
      anyhow::bail!(crate::error::KerfuffleError::AlreadyExists(id));
    }

    let root_path = self.resolve_clone_root(&self.app_data_path.join(&id));
    let app = Arc::new(Application::new(id.clone(), root_path.clone(), config.clone()));
    self.applications.insert(id.clone(), app.clone());
    app.push_status(StatusFlag::Booting, "installing").await;

    if let Err(e) = self.run_install(&app, &config).await {
      app
        .push_status(StatusFlag::Failed, format!("install failed: {e}"))
        .await;
      return Err(e);
    }

    Ok(app)
  }

  async fn run_install(
    &self,
    app: &Arc<Application>,
    config: &InstallConfiguration,
  ) -> anyhow::Result<()> {
    self.clone_repository(config, &app.root_path).await?;

    let manifest_path = app.root_path.join(&config.bootstrap_path);
    let manifest = manifest::load(&manifest_path)?;

    app.set_manifest(manifest.meta, manifest.provisions, manifest.dns_bindings);

    self.bootstrap_proxies(app, &manifest.proxies).await?;
    self.bootstrap_provisions(app).await?;
    self.publish_dns(app).await?;
    self.persist_install_record(&app.id, config)?;
    app.push_status(StatusFlag::Running, "Application install complete").await;
    Ok(())
  }

  /// Picks the directory the clone will actually land in: `root_path` itself,
  /// unless it already exists and can't be removed, in which case a
  /// disambiguated sibling path is used instead. Resolved up front, before
  /// the Application is constructed, so `app.root_path` is never stale.
  fn resolve_clone_root(&self, root_path: &Path) -> PathBuf {
    if root_path.exists() {
      if let Err(e) = std::fs::remove_dir_all(root_path) {
        let e = crate::error::KerfuffleError::FailedToRemove(e.to_string());
        let disambiguated = root_path.with_extension(format!("{:x}", rand::random::<u32>()));
        tracing::warn!(
          path = %root_path.display(),
          error = %e,
          retry_path = %disambiguated.display(),
          "failed to remove existing clone directory, cloning at a disambiguated path instead"
        );
        return disambiguated;
      }
    }
    root_path.to_path_buf()
  }

  async fn clone_repository(&self, config: &InstallConfiguration, dest: &Path) -> anyhow::Result<()> {
    git::clone_repo(&config.repository, Some(&config.branch), dest)
      .await
      .map_err(|e| crate::error::KerfuffleError::CloneFailed(e.to_string()))?;
    Ok(())
  }

  /// Validates the provision-vs-static-dir invariant (S3), allocates free
  /// ports (when requested), and registers each host with the reverse proxy
  /// router (S4's conflicts surface from here).
  async fn bootstrap_proxies(
    &self,
    app: &Arc<Application>,
    proxies: &BTreeMap<String, kerfuffle_client::entities::Proxy>,
  ) -> anyhow::Result<()> {
    for (pid, proxy) in proxies {
      if app.provisions.contains_key(pid) && !proxy.static_dir.is_empty() {
        anyhow::bail!(crate::error::KerfuffleError::ManifestInvalid(format!(
          "proxy '{pid}' matches a provision but sets static_dir; it won't be exposed to the provisioned process's port"
        )));
      }

      let mut proxy = proxy.clone();
      if proxy.wants_allocated_port() {
        let port = allocate_free_port()
          .map_err(|e| crate::error::KerfuffleError::PortAllocationFailed(e.to_string()))?;
        proxy.bind_port = port.to_string();
      }

      for host in &proxy.hosts {
        if !proxy.static_dir.is_empty() {
          let dir = app.root_path.join(&proxy.static_dir);
          self
            .proxy_router
            .install_static(host, dir)
            .map_err(|e| crate::error::KerfuffleError::RouteConflict(e.to_string()))?;
        } else {
          let target = format!("http://localhost:{}", proxy.bind_port);
          self
            .proxy_router
            .install_route(host, &target)
            .map_err(|e| crate::error::KerfuffleError::RouteConflict(e.to_string()))?;
        }
      }

      app.proxies.insert(pid.clone(), proxy);
    }
    Ok(())
  }

  /// `init` (if present) runs synchronously first; every other provision is
  /// spawned concurrently. Runs a port-bind watcher alongside, per §4.6.
  async fn bootstrap_provisions(&self, app: &Arc<Application>) -> anyhow::Result<()> {
    let init = app.provisions.get("init").map(|e| e.value().clone());
    if let Some(init) = &init {
      let process = Process::new(app.root_path.join(&init.base_directory), app.compose_env(init));
      app.processes.insert("init".to_string(), process.clone());
      if !supervisor::execute_provision(process, init).await {
        if app.status().await.flag != StatusFlag::Shutdown {
          app
            .push_status(StatusFlag::Crashed, "init provision failed".to_string())
            .await;
        }
        anyhow::bail!(crate::error::KerfuffleError::SubprocessFailed(
          "init provision failed".to_string()
        ));
      }
    }

    let targets: Vec<(String, kerfuffle_client::entities::Provision)> = app
      .provisions
      .iter()
      .filter(|e| e.key() != "init")
      .map(|e| (e.key().clone(), e.value().clone()))
      .collect();

    for (target, provision) in targets {
      let app = app.clone();
      tokio::spawn(async move {
        let process = Process::new(app.root_path.join(&provision.base_directory), app.compose_env(&provision));
        app.processes.insert(target.clone(), process.clone());
        if !supervisor::execute_provision(process, &provision).await {
          tracing::error!(app = %app.id, provision = %target, "provision exited with an error");
          if app.status().await.flag != StatusFlag::Shutdown {
            app
              .push_status(StatusFlag::Crashed, format!("provision '{target}' failed"))
              .await;
          }
        }
      });
    }

    spawn_bind_watcher(app.clone());
    Ok(())
  }

  async fn publish_dns(&self, app: &Arc<Application>) -> anyhow::Result<()> {
    let mut published = Vec::new();
    for binding in app.dns_bindings.iter() {
      for host in &binding.hosts {
        let record = dns::publish_record(&self.zone_dir, &binding.zone, host, binding.proxied)
          .await
          .map_err(|e| crate::error::KerfuffleError::DnsProviderFailed(e.to_string()))?;
        if let Some(record) = record {
          published.push(PersistedDnsRecord { zone: binding.zone.clone(), record });
        }
      }
    }
    if !published.is_empty() {
      let cf_dns_path = app.root_path.join(".cf-dns");
      std::fs::write(cf_dns_path, serde_json::to_string_pretty(&published)?)?;
    }
    Ok(())
  }

  /// Best-effort: removes every record recorded in the app's `.cf-dns`
  /// manifest. Missing file or provider error is logged, not propagated —
  /// DNS cleanup failure shouldn't block the rest of teardown.
  async fn unpublish_dns(&self, app: &Arc<Application>) {
    let cf_dns_path = app.root_path.join(".cf-dns");
    let Ok(raw) = std::fs::read_to_string(&cf_dns_path) else {
      return;
    };
    let Ok(records): Result<Vec<PersistedDnsRecord>, _> = serde_json::from_str(&raw) else {
      tracing::warn!(app = %app.id, "malformed .cf-dns file, skipping dns cleanup");
      return;
    };
    for entry in records {
      if let Err(e) = dns::remove_record(&self.zone_dir, &entry.zone, &entry.record).await {
        tracing::warn!(app = %app.id, zone = %entry.zone, error = %e, "failed to remove dns record during uninstall");
      }
    }
  }

  fn persist_install_record(&self, id: &str, config: &InstallConfiguration) -> anyhow::Result<()> {
    std::fs::create_dir_all(&self.app_data_path)?;
    let encoded = serde_json::to_string_pretty(config)?;
    std::fs::write(self.install_record_path(id), encoded)?;
    Ok(())
  }

  /// Shuts the Application down, unregisters every proxy host, removes the
  /// install record, and drops it from the registry. Per §7, route-removal
  /// failures are collected and surfaced rather than silently ignored, but
  /// teardown continues regardless so nothing is left half-registered.
  pub async fn uninstall(&self, id: &str) -> anyhow::Result<()> {
    let _guard = self.uninstall_lock.write().await;
    let app = self
      .get(id)
      .ok_or_else(|| crate::error::KerfuffleError::NotFound(id.to_string()))?;

    app.shutdown().await;
    self.unpublish_dns(&app).await;

    let mut route_errors = Vec::new();
    for proxy in app.proxies.iter() {
      for host in &proxy.hosts {
        if let Err(e) = self.proxy_router.uninstall_route(host) {
          route_errors.push(format!("{host}: {e}"));
        }
      }
    }

    let _ = std::fs::remove_file(self.install_record_path(id));
    self.applications.remove(id);

    if !route_errors.is_empty() {
      tracing::warn!(app = %id, errors = ?route_errors, "some routes failed to uninstall cleanly");
    }
    Ok(())
  }

  /// Snapshots config and status log, uninstalls, reinstalls from the
  /// snapshot, then restores the prior status log onto the new Application.
  pub async fn reload_application(&self, id: &str) -> anyhow::Result<Arc<Application>> {
    let _guard = self.uninstall_lock.write().await;
    let app = self
      .get(id)
      .ok_or_else(|| crate::error::KerfuffleError::NotFound(id.to_string()))?;
    let config = app.install_configuration.clone();
    let prior_log = app.status_log().await;
    drop(app);

    self.uninstall(id).await?;
    let reinstalled = self.install_from_repo(config).await?;
    reinstalled.replace_status_log(prior_log).await;
    Ok(reinstalled)
  }

  pub fn reload_provision(&self, app: &Arc<Application>, target: &str) {
    let Some(provision) = app.provisions.get(target) else {
      return;
    };
    let app = app.clone();
    let target = target.to_string();
    let provision = provision.clone();
    tokio::spawn(async move {
      if let Some((_, old)) = app.processes.remove(&target) {
        if let Err(e) = old.kill().await {
          tracing::warn!(app = %app.id, provision = %target, error = %e, "failed to kill process before reload");
        }
      }
      let process = Process::new(app.root_path.join(&provision.base_directory), app.compose_env(&provision));
      app.processes.insert(target.clone(), process.clone());
      if !supervisor::execute_provision(process, &provision).await {
        tracing::error!(app = %app.id, provision = %target, "reloaded provision exited with an error");
      }
    });
  }

  pub async fn set_maintenance_mode(&self, id: &str, enabled: bool) -> anyhow::Result<()> {
    let app = self
      .get(id)
      .ok_or_else(|| crate::error::KerfuffleError::NotFound(id.to_string()))?;
    app.maintenance_mode.store(enabled, std::sync::atomic::Ordering::SeqCst);
    for proxy in app.proxies.iter() {
      for host in &proxy.hosts {
        self.proxy_router.set_hold(host, enabled)?;
      }
    }
    Ok(())
  }

  /// Globs `*.install-info` under `app_data_path` and reinstalls each.
  /// Per-application failures are logged and skipped.
  pub async fn load(&self) -> anyhow::Result<()> {
    if !self.app_data_path.exists() {
      return Ok(());
    }
    let mut entries = tokio::fs::read_dir(&self.app_data_path).await?;
    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("install-info") {
        continue;
      }
      let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
          tracing::warn!(path = %path.display(), error = %e, "failed to read install record, skipping");
          continue;
        }
      };
      let config: InstallConfiguration = match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
          tracing::warn!(path = %path.display(), error = %e, "malformed install record, skipping");
          continue;
        }
      };
      if let Err(e) = self.install_from_repo(config).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to rehydrate application, skipping");
      }
    }
    Ok(())
  }

  pub async fn shutdown(&self) {
    for app in self.list() {
      app.shutdown().await;
    }
  }
}

fn allocate_free_port() -> std::io::Result<u16> {
  let listener = TcpListener::bind("127.0.0.1:0")?;
  listener.local_addr().map(|addr| addr.port())
}

fn spawn_bind_watcher(app: Arc<Application>) {
  tokio::spawn(async move {
    let ports: Vec<String> = app
      .proxies
      .iter()
      .map(|e| e.bind_port.clone())
      .filter(|p| !p.is_empty())
      .collect();

    let client = match reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(10))
      .build()
    {
      Ok(client) => client,
      Err(_) => return,
    };

    for port in ports {
      let url = format!("http://localhost:{port}");
      let mut bound = false;
      for _ in 0..30 {
        if client.get(&url).send().await.is_ok() {
          bound = true;
          break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
      }
      if !bound {
        if app.status().await.flag == StatusFlag::Booting {
          app
            .push_status(StatusFlag::Failed, format!("timed out waiting for port {port} to bind"))
            .await;
        }
        return;
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derive_id_slugifies_repository_and_appends_branch() {
    let config = InstallConfiguration {
      repository: "https://example.test/repo".to_string(),
      branch: "main".to_string(),
      bootstrap_path: ".kerfuffle".to_string(),
    };
    assert_eq!(derive_id(&config), "https-example-test-repo@main");
  }

  #[test]
  fn derive_id_falls_back_to_md5_hex_when_unslugifiable() {
    let config = InstallConfiguration {
      repository: "~~~".to_string(),
      branch: "main".to_string(),
      bootstrap_path: ".kerfuffle".to_string(),
    };
    let id = derive_id(&config);
    assert!(id.ends_with("@main"));
    assert_eq!(id.len(), "@main".len() + 32);
  }
}
