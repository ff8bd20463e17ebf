use serde::{Deserialize, Serialize};

/// Reported liveness of one provision's running [`Process`](crate). Mirrors
/// the shape of the `/processes` REST response: alive while the child is
/// live, carrying a freeform status string either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessState {
  pub alive: bool,
  #[serde(skip_serializing_if = "String::is_empty", default)]
  pub status: String,
}

impl ProcessState {
  pub fn running(argv: &[String]) -> Self {
    Self {
      alive: true,
      status: format!("running: {}", argv.join(" ")),
    }
  }

  pub fn exited(description: impl Into<String>) -> Self {
    Self {
      alive: false,
      status: description.into(),
    }
  }
}
