//! Configuration is loaded by composing, in ascending precedence: compiled-in
//! defaults, `kerfuffle.toml` (or the path given by `--config`), then
//! `KERFUFFLE_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use logger::LogConfig;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "kerfuffled", about = "Self-hosted application deployer and supervisor")]
pub struct CliArgs {
  /// Path to the TOML configuration file.
  #[arg(long, default_value = "kerfuffle.toml")]
  pub config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api_bind: String,
  pub reverse_proxy_bind: String,
  pub cf_zones_path: PathBuf,
  pub app_data_path: PathBuf,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_bind: "0.0.0.0:8080".to_string(),
      reverse_proxy_bind: "0.0.0.0:80".to_string(),
      cf_zones_path: PathBuf::from(".cf-zones"),
      app_data_path: PathBuf::from("app_data"),
      log: LogConfig::default(),
    }
  }
}

/// Flat mirror of [`Config`]'s scalar fields, used only to pick up
/// `KERFUFFLE_*` environment overrides; `envy` doesn't need to know about
/// the nested `log` table since operators override log level via `RUST_LOG`.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
  api_bind: Option<String>,
  reverse_proxy_bind: Option<String>,
  cf_zones_path: Option<PathBuf>,
  app_data_path: Option<PathBuf>,
}

impl Config {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let mut config = if path.exists() {
      let raw = std::fs::read_to_string(path).with_context(|| {
        format!("failed to read config file at {}", path.display())
      })?;
      toml::from_str(&raw).with_context(|| {
        format!("failed to parse config file at {}", path.display())
      })?
    } else {
      Config::default()
    };

    let overrides: EnvOverrides =
      envy::prefixed("KERFUFFLE_").from_env().unwrap_or_default();
    if let Some(v) = overrides.api_bind {
      config.api_bind = v;
    }
    if let Some(v) = overrides.reverse_proxy_bind {
      config.reverse_proxy_bind = v;
    }
    if let Some(v) = overrides.cf_zones_path {
      config.cf_zones_path = v;
    }
    if let Some(v) = overrides.app_data_path {
      config.app_data_path = v;
    }

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let config = Config::default();
    assert_eq!(config.api_bind, "0.0.0.0:8080");
    assert_eq!(config.reverse_proxy_bind, "0.0.0.0:80");
    assert_eq!(config.cf_zones_path, PathBuf::from(".cf-zones"));
  }

  #[test]
  fn missing_file_falls_back_to_defaults() {
    let config = Config::load(Path::new("/nonexistent/kerfuffle.toml")).unwrap();
    assert_eq!(config.api_bind, "0.0.0.0:8080");
  }
}
