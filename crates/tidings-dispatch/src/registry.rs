//! Sender registry: subscriber type to channel adapter.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::Client;
use tidings_core::{
  notification::Payload,
  subscription::{Subscriber, SubscriberKind},
};

use crate::{
  DispatchSettings, Error, Result,
  channels::{
    EmailSender, GithubStatusSender, JiraCommentSender, JiraIssueSender,
    SlackSender, WebhookSender,
  },
};

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A composed message ready for one channel.
#[derive(Debug, Clone)]
pub struct Message {
  pub notification_id: String,
  pub payload:         Payload,
}

/// Receives failures a transport reports after `send` has already returned.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
  async fn handle(&self, notification_id: &str, error: Error);
}

#[async_trait]
pub trait Sender: Send + Sync {
  async fn send(&self, message: &Message) -> Result<()>;

  /// Install the post-hoc failure hook. Senders without a post-hoc failure
  /// path ignore it.
  fn set_error_handler(&mut self, _handler: Arc<dyn ErrorHandler>) {}
}

/// Route a post-hoc failure to `handler`, or just log it.
pub(crate) async fn report(
  handler: Option<&Arc<dyn ErrorHandler>>,
  notification_id: &str,
  error: Error,
) {
  match handler {
    Some(handler) => handler.handle(notification_id, error).await,
    None => tracing::warn!(
      notification_id,
      %error,
      "post-hoc delivery failure with no error handler"
    ),
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

pub type SenderFactory =
  Box<dyn Fn(&Subscriber) -> Result<Box<dyn Sender>> + Send + Sync>;

#[derive(Default)]
pub struct SenderRegistry {
  factories: HashMap<SubscriberKind, SenderFactory>,
}

impl SenderRegistry {
  pub fn register<F>(&mut self, kind: SubscriberKind, factory: F)
  where
    F: Fn(&Subscriber) -> Result<Box<dyn Sender>> + Send + Sync + 'static,
  {
    self.factories.insert(kind, Box::new(factory));
  }

  pub fn is_registered(&self, kind: SubscriberKind) -> bool {
    self.factories.contains_key(&kind)
  }

  /// Build the sender for one subscriber. Fails for an unregistered type or
  /// a target the adapter cannot use.
  pub fn sender_for(&self, subscriber: &Subscriber) -> Result<Box<dyn Sender>> {
    let kind = subscriber.kind();
    let factory = self
      .factories
      .get(&kind)
      .ok_or(Error::UnregisteredSender(kind))?;
    factory(subscriber)
  }

  /// A registry with every built-in channel adapter.
  pub fn with_channels(settings: &DispatchSettings) -> Result<Self> {
    let client = Client::builder()
      .timeout(settings.delivery_deadline())
      .build()?;
    let mut registry = Self::default();

    let (http, timeout) = (client.clone(), settings.webhook_timeout());
    registry.register(SubscriberKind::Webhook, move |sub| {
      let Subscriber::Webhook(target) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::Webhook));
      };
      Ok(Box::new(WebhookSender::new(http.clone(), target, timeout)?))
    });

    let (smtp, timeout) = (settings.smtp.clone(), settings.delivery_deadline());
    registry.register(SubscriberKind::Email, move |sub| {
      let Subscriber::Email(address) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::Email));
      };
      Ok(Box::new(EmailSender::new(smtp.as_ref(), address, timeout)?))
    });

    let (http, slack) = (client.clone(), settings.slack.clone());
    registry.register(SubscriberKind::Slack, move |sub| {
      let Subscriber::Slack(channel) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::Slack));
      };
      Ok(Box::new(SlackSender::new(http.clone(), slack.as_ref(), channel)?))
    });

    let (http, jira) = (client.clone(), settings.jira.clone());
    registry.register(SubscriberKind::JiraComment, move |sub| {
      let Subscriber::JiraComment(issue) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::JiraComment));
      };
      Ok(Box::new(JiraCommentSender::new(http.clone(), jira.as_ref(), issue)?))
    });

    let (http, jira) = (client.clone(), settings.jira.clone());
    registry.register(SubscriberKind::JiraIssue, move |sub| {
      let Subscriber::JiraIssue(target) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::JiraIssue));
      };
      Ok(Box::new(JiraIssueSender::new(http.clone(), jira.as_ref(), target)?))
    });

    let (http, github) = (client, settings.github.clone());
    registry.register(SubscriberKind::GithubPullRequest, move |sub| {
      let Subscriber::GithubPullRequest(target) = sub else {
        return Err(wrong_variant(sub, SubscriberKind::GithubPullRequest));
      };
      Ok(Box::new(GithubStatusSender::new(
        http.clone(),
        github.as_ref(),
        target,
      )?))
    });

    Ok(registry)
  }
}

fn wrong_variant(sub: &Subscriber, expected: SubscriberKind) -> Error {
  Error::InvalidTarget {
    kind:   expected,
    reason: format!("subscriber is {}", sub.kind()),
  }
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn every_subscriber_type_has_a_channel() {
    let registry = SenderRegistry::with_channels(&DispatchSettings::default())
      .unwrap();
    assert!(SubscriberKind::iter().all(|k| registry.is_registered(k)));
  }

  #[test]
  fn unregistered_type_is_an_error() {
    let registry = SenderRegistry::default();
    let err = registry
      .sender_for(&Subscriber::Slack("#ci".into()))
      .err()
      .unwrap();
    assert!(matches!(err, Error::UnregisteredSender(SubscriberKind::Slack)));
  }

  #[test]
  fn factory_rejects_bad_targets() {
    let registry = SenderRegistry::with_channels(&DispatchSettings::default())
      .unwrap();
    let bad = Subscriber::Webhook(tidings_core::subscription::WebhookSubscriber {
      url:    "not a url".into(),
      secret: "s".into(),
    });
    assert!(matches!(
      registry.sender_for(&bad).err().unwrap(),
      Error::InvalidTarget { .. }
    ));
  }

  #[test]
  fn missing_channel_settings_fail_at_resolution() {
    let registry = SenderRegistry::with_channels(&DispatchSettings::default())
      .unwrap();
    let err = registry
      .sender_for(&Subscriber::Email("dev@example.com".into()))
      .err()
      .unwrap();
    assert_eq!(err.to_string(), "email smtp settings are empty");
  }
}
