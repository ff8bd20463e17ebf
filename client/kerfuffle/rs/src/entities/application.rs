use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppStatus, InstallConfiguration, Meta};

/// Read-only view of one deployed repository, as returned from
/// `GET /application` and `GET /application/:id`. The server's internal
/// `Application` aggregate additionally owns live process handles and
/// route registrations that don't serialize across the REST boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
  pub id: String,
  pub install_configuration: InstallConfiguration,
  pub meta: Meta,
  pub maintenance_mode: bool,
  pub created: DateTime<Utc>,
  /// Newest entry first.
  pub status_log: Vec<AppStatus>,
}
