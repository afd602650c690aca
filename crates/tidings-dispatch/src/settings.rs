//! Channel credentials and delivery limits, deserialised from the
//! `[dispatch]` section of the worker configuration.

use std::time::Duration;

use serde::Deserialize;

// ─── Dispatch ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
  /// Wall-clock limit for one webhook request.
  pub webhook_timeout_secs:   u64,
  /// Upper bound on any single delivery attempt, whatever the channel.
  pub delivery_deadline_secs: u64,
  pub smtp:                   Option<SmtpSettings>,
  pub slack:                  Option<SlackSettings>,
  pub jira:                   Option<JiraSettings>,
  pub github:                 Option<GithubSettings>,
}

impl Default for DispatchSettings {
  fn default() -> Self {
    Self {
      webhook_timeout_secs:   5,
      delivery_deadline_secs: 30,
      smtp:                   None,
      slack:                  None,
      jira:                   None,
      github:                 None,
    }
  }
}

impl DispatchSettings {
  pub fn webhook_timeout(&self) -> Duration {
    Duration::from_secs(self.webhook_timeout_secs)
  }

  pub fn delivery_deadline(&self) -> Duration {
    Duration::from_secs(self.delivery_deadline_secs)
  }
}

// ─── Channels ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
  pub server:   String,
  #[serde(default = "default_smtp_port")]
  pub port:     u16,
  /// Envelope and header sender.
  pub from:     String,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
  /// Require STARTTLS. Plain SMTP otherwise.
  #[serde(default)]
  pub use_tls:  bool,
}

fn default_smtp_port() -> u16 { 25 }

#[derive(Debug, Clone, Deserialize)]
pub struct SlackSettings {
  pub token:   String,
  #[serde(default = "default_slack_api")]
  pub api_url: String,
}

fn default_slack_api() -> String { "https://slack.com/api".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct JiraSettings {
  pub url:      String,
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSettings {
  pub token:   String,
  #[serde(default = "default_github_api")]
  pub api_url: String,
}

fn default_github_api() -> String { "https://api.github.com".to_string() }
