use serde::{Deserialize, Serialize};

/// A binding from one or more public hostnames to either a locally bound
/// port or a static directory. Parsed out of the manifest's `proxy.*`
/// table. Exactly one of `bind_port` (after port allocation) or
/// `static_dir` is effective for a given proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proxy {
  #[serde(default, rename = "host")]
  pub hosts: Vec<String>,
  /// Empty means "allocate a free port"; the Manager writes the chosen
  /// port back here once bootstrapped.
  #[serde(default, rename = "bind_port")]
  pub bind_port: String,
  #[serde(default, rename = "static_dir")]
  pub static_dir: String,
  /// Mirrors the owning [`Application`](crate::entities::Application)'s
  /// maintenance mode; not present in the manifest itself.
  #[serde(skip_deserializing, default)]
  pub hold: bool,
}

impl Proxy {
  pub fn wants_allocated_port(&self) -> bool {
    self.static_dir.is_empty() && self.bind_port.is_empty()
  }
}
