//! Stdout/stderr logging setup, configured by the same `kerfuffle.toml` /
//! environment overrides as the rest of the daemon.

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
  EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

/// How log lines are rendered to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LogConfig {
  pub level: LogLevel,
  pub stdio: StdioLogMode,
  pub pretty: bool,
  pub ansi: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: LogLevel::Info,
      stdio: StdioLogMode::Standard,
      pretty: false,
      ansi: true,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Error,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Error => tracing::Level::ERROR,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Trace => tracing::Level::TRACE,
    }
  }
}

/// Installs the global `tracing` subscriber. Callers also get `RUST_LOG`
/// honored on top of `config.level` via [`EnvFilter`], matching the usual
/// tracing-subscriber convention.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let level: tracing::Level = config.level.into();
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::from_level(level).into())
    .from_env_lossy();

  let registry = Registry::default().with(filter);

  match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false)
          .with_ansi(config.ansi),
      )
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false)
          .with_ansi(config.ansi),
      )
      .try_init(),
    (StdioLogMode::Json, _) => {
      registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    }
    (StdioLogMode::None, _) => Ok(()),
  }
  .context("failed to init logger")
}
