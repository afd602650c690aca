//! Process configuration: a TOML file layered with `TIDINGS_` environment
//! variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use tidings_dispatch::DispatchSettings;
use tidings_trigger::EngineConfig;
use tokio::time::Duration;

use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// SQLite database file. A leading `~/` is expanded.
  pub store_path:              PathBuf,
  /// Base URL for links in rendered notifications.
  pub ui_url:                  String,
  /// Concurrent dispatch workers.
  pub workers:                 usize,
  pub poll_interval_secs:      u64,
  pub event_batch_size:        usize,
  pub stats_interval_secs:     u64,
  pub renotify_interval_hours: i64,
  pub dispatch:                DispatchSettings,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      store_path:              PathBuf::from("~/.local/share/tidings/tidings.db"),
      ui_url:                  EngineConfig::default().ui_url,
      workers:                 4,
      poll_interval_secs:      5,
      event_batch_size:        100,
      stats_interval_secs:     60,
      renotify_interval_hours: 48,
      dispatch:                DispatchSettings::default(),
    }
  }
}

impl WorkerConfig {
  /// Read `path` (optional) and the environment.
  pub fn load(path: &Path) -> Result<Self> {
    Self::build(Config::builder().add_source(File::from(path).required(false)))
  }

  /// Parse TOML text, still layered with the environment.
  pub fn parse(toml: &str) -> Result<Self> {
    Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
  }

  fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
    let config = builder
      .add_source(
        Environment::with_prefix("TIDINGS")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()?;
    Ok(config)
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      ui_url:            self.ui_url.clone(),
      renotify_interval: chrono::Duration::hours(self.renotify_interval_hours),
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs.max(1))
  }

  pub fn stats_interval(&self) -> Duration {
    Duration::from_secs(self.stats_interval_secs.max(1))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_gives_defaults() {
    let config = WorkerConfig::parse("").unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.dispatch.webhook_timeout_secs, 5);
    assert!(config.dispatch.smtp.is_none());
    assert_eq!(config.engine_config().renotify_interval, chrono::Duration::hours(48));
  }

  #[test]
  fn nested_channel_sections() {
    let config = WorkerConfig::parse(
      r#"
        ui_url  = "https://ci.example.com"
        workers = 8

        [dispatch]
        webhook_timeout_secs = 2

        [dispatch.smtp]
        server = "smtp.example.com"
        from   = "ci@example.com"

        [dispatch.slack]
        token = "xoxb-1"
      "#,
    )
    .unwrap();

    assert_eq!(config.ui_url, "https://ci.example.com");
    assert_eq!(config.workers, 8);
    assert_eq!(config.dispatch.webhook_timeout_secs, 2);
    assert_eq!(config.dispatch.delivery_deadline_secs, 30);

    let smtp = config.dispatch.smtp.unwrap();
    assert_eq!(smtp.port, 25);
    assert!(!smtp.use_tls);
    assert_eq!(config.dispatch.slack.unwrap().api_url, "https://slack.com/api");
  }

  #[test]
  fn tilde_expansion() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(
      expand_tilde(Path::new("~/tidings.db")),
      PathBuf::from(home).join("tidings.db")
    );
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }
}
