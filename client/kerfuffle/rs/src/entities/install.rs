use serde::{Deserialize, Serialize};

fn default_branch() -> String {
  "master".to_string()
}

fn default_bootstrap_path() -> String {
  ".kerfuffle".to_string()
}

/// User intent for one deployed repository. Immutable once an [`Application`]
/// has been created from it, and serialized verbatim into the install record
/// on disk so the [`Manager`](crate) can rehydrate it after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfiguration {
  pub repository: String,
  #[serde(default = "default_branch")]
  pub branch: String,
  #[serde(default = "default_bootstrap_path")]
  pub bootstrap_path: String,
}

impl InstallConfiguration {
  pub fn new(repository: impl Into<String>) -> Self {
    Self {
      repository: repository.into(),
      branch: default_branch(),
      bootstrap_path: default_bootstrap_path(),
    }
  }

  /// Fills in defaults for any field left empty by the caller. Called once
  /// on install, before the deterministic id is derived from the fields.
  pub fn load_defaults(&mut self) {
    if self.branch.is_empty() {
      self.branch = default_branch();
    }
    if self.bootstrap_path.is_empty() {
      self.bootstrap_path = default_bootstrap_path();
    }
  }
}

/// `meta.name` from the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
  #[serde(default)]
  pub name: String,
}
