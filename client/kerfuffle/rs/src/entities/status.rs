use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFlag {
  Booting,
  Running,
  Failed,
  Crashed,
  Shutdown,
  Unknown,
}

impl Default for StatusFlag {
  fn default() -> Self {
    StatusFlag::Unknown
  }
}

/// One entry in an [`Application`](crate::entities::Application)'s status
/// log. The log is append-prepend: the newest entry is always at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
  pub flag: StatusFlag,
  pub reason: String,
  pub at: DateTime<Utc>,
}

impl AppStatus {
  pub fn new(flag: StatusFlag, reason: impl Into<String>) -> Self {
    Self {
      flag,
      reason: reason.into(),
      at: Utc::now(),
    }
  }
}
