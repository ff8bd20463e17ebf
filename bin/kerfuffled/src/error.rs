//! Error kinds shared across the Manager, Supervisor, and DNS Publisher.
//!
//! Call sites that need to match on *kind* (the REST facade, mostly, to pick
//! an HTTP status) use [`KerfuffleError`] directly; everything else keeps
//! propagating `anyhow::Result` and attaches a kind only where one is known.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KerfuffleError {
  #[error("{0} does not exist")]
  NotFound(String),

  #[error("{0} already exists")]
  AlreadyExists(String),

  #[error("manifest is invalid: {0}")]
  ManifestInvalid(String),

  #[error("failed to clone repository: {0}")]
  CloneFailed(String),

  #[error("failed to remove directory: {0}")]
  FailedToRemove(String),

  #[error("dns provider request failed: {0}")]
  DnsProviderFailed(String),

  #[error("no token on file for zone '{0}'")]
  NoTokenForZone(String),

  #[error("failed to allocate a free tcp port: {0}")]
  PortAllocationFailed(String),

  #[error("route conflict: {0}")]
  RouteConflict(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("subprocess failed: {0}")]
  SubprocessFailed(String),

  #[error("timed out waiting for port to bind: {0}")]
  BindTimeout(String),
}

impl KerfuffleError {
  /// The HTTP status this kind maps to at the REST facade.
  pub fn status_code(&self) -> u16 {
    match self {
      KerfuffleError::NotFound(_) => 404,
      KerfuffleError::AlreadyExists(_) => 409,
      KerfuffleError::RouteConflict(_) => 409,
      KerfuffleError::ManifestInvalid(_)
      | KerfuffleError::InvalidArgument(_) => 400,
      KerfuffleError::CloneFailed(_)
      | KerfuffleError::FailedToRemove(_)
      | KerfuffleError::DnsProviderFailed(_)
      | KerfuffleError::NoTokenForZone(_)
      | KerfuffleError::PortAllocationFailed(_)
      | KerfuffleError::SubprocessFailed(_)
      | KerfuffleError::BindTimeout(_) => 500,
    }
  }
}
