use serde::{Deserialize, Serialize};

/// A named, ordered sequence of subprocess invocations belonging to an
/// [`Application`](crate::entities::Application). Parsed out of the
/// manifest's `provision.*` table; `id` is filled in from the table key
/// after deserialization since it isn't itself a field in the manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provision {
  #[serde(skip_deserializing, default)]
  pub id: String,
  /// Argv vectors, run serially. `run = [["npm", "install"], ["npm", "start"]]`.
  #[serde(default)]
  pub run: Vec<Vec<String>>,
  /// `"K=V"` pairs appended to the host environment.
  #[serde(default, rename = "envs")]
  pub environment_variables: Vec<String>,
  /// Relative to the application's clone root.
  #[serde(default, rename = "base_dir")]
  pub base_directory: String,
  #[serde(default)]
  pub health_endpoint: String,
  #[serde(default)]
  pub event_url: String,
}
