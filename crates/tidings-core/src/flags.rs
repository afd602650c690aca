//! Operator kill-switches, one per delivery channel.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::subscription::SubscriberKind;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
  Webhook,
  Email,
  Slack,
  Jira,
  Github,
}

impl SubscriberKind {
  pub fn channel(self) -> Channel {
    match self {
      Self::Webhook => Channel::Webhook,
      Self::Email => Channel::Email,
      Self::Slack => Channel::Slack,
      Self::JiraComment | Self::JiraIssue => Channel::Jira,
      Self::GithubPullRequest => Channel::Github,
    }
  }
}

/// Degraded-mode state. Everything is enabled by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceFlags {
  pub webhook_notifications_disabled: bool,
  pub email_notifications_disabled:   bool,
  pub slack_notifications_disabled:   bool,
  pub jira_notifications_disabled:    bool,
  pub github_status_api_disabled:     bool,
}

impl ServiceFlags {
  pub fn is_disabled(&self, channel: Channel) -> bool {
    match channel {
      Channel::Webhook => self.webhook_notifications_disabled,
      Channel::Email => self.email_notifications_disabled,
      Channel::Slack => self.slack_notifications_disabled,
      Channel::Jira => self.jira_notifications_disabled,
      Channel::Github => self.github_status_api_disabled,
    }
  }

  pub fn set(&mut self, channel: Channel, disabled: bool) {
    let flag = match channel {
      Channel::Webhook => &mut self.webhook_notifications_disabled,
      Channel::Email => &mut self.email_notifications_disabled,
      Channel::Slack => &mut self.slack_notifications_disabled,
      Channel::Jira => &mut self.jira_notifications_disabled,
      Channel::Github => &mut self.github_status_api_disabled,
    };
    *flag = disabled;
  }

  pub fn all_disabled() -> Self {
    Self {
      webhook_notifications_disabled: true,
      email_notifications_disabled:   true,
      slack_notifications_disabled:   true,
      jira_notifications_disabled:    true,
      github_status_api_disabled:     true,
    }
  }
}
