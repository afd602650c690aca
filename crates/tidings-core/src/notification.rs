//! Rendered notifications and their delivery bookkeeping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::subscription::{Subscriber, SubscriberKind};

// ─── Payloads ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
  pub subject: String,
  pub body:    String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
  /// JSON document posted verbatim; the signature covers these exact bytes.
  pub body:    String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackAttachment {
  pub title:      String,
  pub title_link: String,
  pub text:       String,
  pub color:      String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackPayload {
  pub body:        String,
  #[serde(default)]
  pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssuePayload {
  pub summary:     String,
  pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubStatusPayload {
  pub state:       String,
  pub target_url:  String,
  pub description: String,
  pub context:     String,
}

/// Channel-specific rendering stored alongside the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "kebab-case")]
pub enum Payload {
  Email(EmailPayload),
  Webhook(WebhookPayload),
  Slack(SlackPayload),
  JiraComment(String),
  JiraIssue(JiraIssuePayload),
  GithubStatus(GithubStatusPayload),
}

impl Payload {
  /// Whether this payload can be delivered to a subscriber of `kind`.
  pub fn matches(&self, kind: SubscriberKind) -> bool {
    matches!(
      (self, kind),
      (Self::Email(_), SubscriberKind::Email)
        | (Self::Webhook(_), SubscriberKind::Webhook)
        | (Self::Slack(_), SubscriberKind::Slack)
        | (Self::JiraComment(_), SubscriberKind::JiraComment)
        | (Self::JiraIssue(_), SubscriberKind::JiraIssue)
        | (Self::GithubStatus(_), SubscriberKind::GithubPullRequest)
    )
  }
}

// ─── Notification ────────────────────────────────────────────────────────────

/// One pending or concluded delivery.
///
/// `sent_at` being set means a delivery attempt concluded, not that it
/// succeeded; `error` tells the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub notification_id: String,
  pub event_id:        Uuid,
  pub subscription_id: Uuid,
  pub subscriber:      Subscriber,
  pub payload:         Payload,
  pub created_at:      DateTime<Utc>,
  pub sent_at:         Option<DateTime<Utc>>,
  pub error:           Option<String>,
}

impl Notification {
  pub fn new(
    event_id: Uuid,
    subscription_id: Uuid,
    subscriber: Subscriber,
    payload: Payload,
  ) -> Self {
    Self {
      notification_id: Self::id_for(event_id, subscription_id),
      event_id,
      subscription_id,
      subscriber,
      payload,
      created_at: Utc::now(),
      sent_at: None,
      error: None,
    }
  }

  /// Deterministic identifier for the (event, subscription) pair, so that
  /// processing the same event twice yields the same notification.
  pub fn id_for(event_id: Uuid, subscription_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(subscription_id.to_string().as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
  }

  pub fn is_sent(&self) -> bool { self.sent_at.is_some() }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// Point-in-time backlog figures for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
  pub unprocessed_events:            u64,
  /// Unsent notifications keyed by `subscriber.type`.
  pub pending_notifications_by_type: BTreeMap<String, u64>,
  pub last_processed_at:             Option<DateTime<Utc>>,
}

impl NotificationStats {
  pub fn pending_total(&self) -> u64 {
    self.pending_notifications_by_type.values().sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_stable_per_pair() {
    let event = Uuid::new_v4();
    let sub_a = Uuid::new_v4();
    let sub_b = Uuid::new_v4();

    let id = Notification::id_for(event, sub_a);
    assert_eq!(id.len(), 32);
    assert_eq!(id, Notification::id_for(event, sub_a));
    assert_ne!(id, Notification::id_for(event, sub_b));
  }

  #[test]
  fn payload_matches_only_its_own_channel() {
    let payload = Payload::JiraComment("hi".into());
    assert!(payload.matches(SubscriberKind::JiraComment));
    assert!(!payload.matches(SubscriberKind::JiraIssue));

    let status = Payload::GithubStatus(GithubStatusPayload {
      state:       "failure".into(),
      target_url:  "u".into(),
      description: "d".into(),
      context:     "evergreen/task".into(),
    });
    assert!(status.matches(SubscriberKind::GithubPullRequest));
  }
}
