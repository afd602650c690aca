//! Subscriptions: which events a subscriber wants to hear about, and where to
//! deliver them.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::{Error, Result, event::ResourceType};

// ─── Selectors ───────────────────────────────────────────────────────────────

pub const SELECTOR_ID: &str = "id";
pub const SELECTOR_OBJECT: &str = "object";
pub const SELECTOR_PROJECT: &str = "project";
pub const SELECTOR_OWNER: &str = "owner";
pub const SELECTOR_REQUESTER: &str = "requester";
pub const SELECTOR_IN_VERSION: &str = "in-version";
pub const SELECTOR_IN_BUILD: &str = "in-build";
pub const SELECTOR_DISPLAY_NAME: &str = "display-name";
pub const SELECTOR_BUILD_VARIANT: &str = "build-variant";

/// One `(attribute, expected value)` match condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
  #[serde(rename = "type")]
  pub kind: String,
  pub data: String,
}

impl Selector {
  pub fn new(kind: impl Into<String>, data: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      data: data.into(),
    }
  }
}

// ─── Triggers ────────────────────────────────────────────────────────────────

/// Trigger-data key holding the duration threshold, in seconds.
pub const TRIGGER_DATA_DURATION_SECS: &str = "task-duration-secs";
/// Trigger-data key holding the runtime change threshold, in percent.
pub const TRIGGER_DATA_PERCENT_CHANGE: &str = "task-percent-change";

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
pub enum Trigger {
  Outcome,
  Success,
  Failure,
  FirstFailureInVersion,
  FirstFailureInBuild,
  FirstFailureInVersionWithName,
  Regression,
  RegressionByTest,
  ExceedsDuration,
  RuntimeChange,
}

impl Trigger {
  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownTrigger(s.to_string()))
  }

  /// Whether this trigger can be evaluated for events on `resource`.
  pub fn supports(self, resource: ResourceType) -> bool {
    match resource {
      ResourceType::Task => true,
      ResourceType::Build | ResourceType::Version => {
        matches!(self, Self::Outcome | Self::Success | Self::Failure)
      }
    }
  }
}

// ─── Subscribers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscriber {
  pub url:    String,
  pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssueSubscriber {
  pub project:    String,
  pub issue_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubPullRequestSubscriber {
  pub owner:     String,
  pub repo:      String,
  pub pr_number: u64,
  #[serde(rename = "ref")]
  pub git_ref:   String,
}

/// Discriminant of [`Subscriber`]. This is the value persisted as
/// `subscriber.type` and used for stats grouping.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Display,
  EnumString,
  EnumIter,
  AsRefStr,
)]
pub enum SubscriberKind {
  #[strum(serialize = "evergreen-webhook")]
  Webhook,
  #[strum(serialize = "email")]
  Email,
  #[strum(serialize = "slack")]
  Slack,
  #[strum(serialize = "jira-comment")]
  JiraComment,
  #[strum(serialize = "jira-issue")]
  JiraIssue,
  #[strum(serialize = "github_pull_request")]
  GithubPullRequest,
}

impl SubscriberKind {
  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownSubscriberType(s.to_string()))
  }
}

/// Delivery destination. The target's shape is fixed by the variant; a
/// `{type, target}` pair that disagrees is rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSubscriber", into = "RawSubscriber")]
pub enum Subscriber {
  Webhook(WebhookSubscriber),
  Email(String),
  Slack(String),
  JiraComment(String),
  JiraIssue(JiraIssueSubscriber),
  GithubPullRequest(GithubPullRequestSubscriber),
}

impl Subscriber {
  pub fn kind(&self) -> SubscriberKind {
    match self {
      Self::Webhook(_) => SubscriberKind::Webhook,
      Self::Email(_) => SubscriberKind::Email,
      Self::Slack(_) => SubscriberKind::Slack,
      Self::JiraComment(_) => SubscriberKind::JiraComment,
      Self::JiraIssue(_) => SubscriberKind::JiraIssue,
      Self::GithubPullRequest(_) => SubscriberKind::GithubPullRequest,
    }
  }

  /// Decode a subscriber from its persisted discriminant and target.
  pub fn from_parts(kind: &str, target: serde_json::Value) -> Result<Self> {
    let subscriber = match SubscriberKind::parse(kind)? {
      SubscriberKind::Webhook => Self::Webhook(serde_json::from_value(target)?),
      SubscriberKind::Email => Self::Email(serde_json::from_value(target)?),
      SubscriberKind::Slack => Self::Slack(serde_json::from_value(target)?),
      SubscriberKind::JiraComment => {
        Self::JiraComment(serde_json::from_value(target)?)
      }
      SubscriberKind::JiraIssue => {
        Self::JiraIssue(serde_json::from_value(target)?)
      }
      SubscriberKind::GithubPullRequest => {
        Self::GithubPullRequest(serde_json::from_value(target)?)
      }
    };
    subscriber.validate()?;
    Ok(subscriber)
  }

  pub fn target_json(&self) -> serde_json::Value {
    // Serialising these plain structs and strings cannot fail.
    let result = match self {
      Self::Webhook(t) => serde_json::to_value(t),
      Self::Email(t) | Self::Slack(t) | Self::JiraComment(t) => {
        serde_json::to_value(t)
      }
      Self::JiraIssue(t) => serde_json::to_value(t),
      Self::GithubPullRequest(t) => serde_json::to_value(t),
    };
    result.unwrap_or(serde_json::Value::Null)
  }

  /// Reject targets that decode but cannot possibly be delivered to.
  pub fn validate(&self) -> Result<()> {
    let invalid = |kind, reason: &str| {
      Err(Error::InvalidTarget {
        kind,
        reason: reason.to_string(),
      })
    };
    match self {
      Self::Webhook(w) if w.url.is_empty() => invalid("webhook", "empty url"),
      Self::Webhook(w) if w.secret.is_empty() => {
        invalid("webhook", "empty secret")
      }
      Self::Email(addr) if !addr.contains('@') => {
        invalid("email", "address has no '@'")
      }
      Self::Slack(channel) if channel.is_empty() => {
        invalid("slack", "empty channel")
      }
      Self::JiraComment(key) if key.is_empty() => {
        invalid("jira-comment", "empty issue key")
      }
      Self::JiraIssue(j) if j.project.is_empty() => {
        invalid("jira-issue", "empty project")
      }
      Self::GithubPullRequest(g)
        if g.owner.is_empty() || g.repo.is_empty() || g.git_ref.is_empty() =>
      {
        invalid("github_pull_request", "owner, repo and ref are required")
      }
      _ => Ok(()),
    }
  }
}

impl fmt::Display for Subscriber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Webhook(w) => write!(f, "{}: {}", self.kind(), w.url),
      Self::Email(t) | Self::Slack(t) | Self::JiraComment(t) => {
        write!(f, "{}: {t}", self.kind())
      }
      Self::JiraIssue(j) => write!(f, "{}: {}", self.kind(), j.project),
      Self::GithubPullRequest(g) => write!(
        f,
        "{}: {}/{}#{}@{}",
        self.kind(),
        g.owner,
        g.repo,
        g.pr_number,
        g.git_ref
      ),
    }
  }
}

#[derive(Serialize, Deserialize)]
struct RawSubscriber {
  #[serde(rename = "type")]
  kind:   String,
  target: serde_json::Value,
}

impl TryFrom<RawSubscriber> for Subscriber {
  type Error = Error;

  fn try_from(raw: RawSubscriber) -> Result<Self> {
    Self::from_parts(&raw.kind, raw.target)
  }
}

impl From<Subscriber> for RawSubscriber {
  fn from(s: Subscriber) -> Self {
    Self {
      kind:   s.kind().to_string(),
      target: s.target_json(),
    }
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
  pub subscription_id: Uuid,
  pub resource_type:   ResourceType,
  pub trigger:         Trigger,
  pub selectors:       Vec<Selector>,
  pub subscriber:      Subscriber,
  pub owner:           String,
  #[serde(default)]
  pub trigger_data:    BTreeMap<String, String>,
}

impl Subscription {
  pub fn new(
    resource_type: ResourceType,
    trigger: Trigger,
    selectors: Vec<Selector>,
    subscriber: Subscriber,
    owner: impl Into<String>,
  ) -> Self {
    Self {
      subscription_id: Uuid::new_v4(),
      resource_type,
      trigger,
      selectors,
      subscriber,
      owner: owner.into(),
      trigger_data: BTreeMap::new(),
    }
  }

  pub fn with_trigger_data(
    mut self,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    self.trigger_data.insert(key.into(), value.into());
    self
  }

  /// `true` iff every selector of this subscription appears among
  /// `attributes`. An empty selector set matches everything.
  pub fn matches(&self, attributes: &[Selector]) -> bool {
    self.selectors.iter().all(|s| attributes.contains(s))
  }

  /// Numeric trigger-data value for `key`, if present.
  pub fn threshold(&self, key: &'static str) -> Result<Option<f64>> {
    let Some(raw) = self.trigger_data.get(key) else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<f64>()
      .map(Some)
      .map_err(|_| Error::InvalidTriggerData {
        key,
        value: raw.clone(),
      })
  }
}
