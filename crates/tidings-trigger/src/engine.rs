//! [`TriggerEngine`]: subscription lookup, trigger dispatch and rendering.

use std::sync::Arc;

use chrono::Duration;
use tidings_core::{
  event::{Event, EventData, ResourceType},
  notification::Notification,
  resource::{Build, BuildStatus, Task, Version},
  store::{AlertStore, SubscriptionStore, TaskHistory},
  subscription::{
    SELECTOR_BUILD_VARIANT, SELECTOR_DISPLAY_NAME, SELECTOR_ID,
    SELECTOR_IN_BUILD, SELECTOR_IN_VERSION, SELECTOR_OBJECT, SELECTOR_OWNER,
    SELECTOR_PROJECT, SELECTOR_REQUESTER, Selector, Subscription, Trigger,
  },
};
use uuid::Uuid;

use crate::{
  Error, Result,
  payload::{Template, render},
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Base URL links in rendered notifications point at.
  pub ui_url:            String,
  /// How long a still-failing task stays quiet after a regression alert.
  pub renotify_interval: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      ui_url:            "http://localhost:9090".to_string(),
      renotify_interval: Duration::hours(48),
    }
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// A subscription whose predicate or renderer failed. Other subscriptions for
/// the same event are unaffected.
#[derive(Debug)]
pub struct SubscriptionFailure {
  pub subscription_id: Uuid,
  pub error:           Error,
}

/// Outcome of evaluating one event.
#[derive(Debug, Default)]
pub struct Evaluation {
  pub notifications: Vec<Notification>,
  pub failures:      Vec<SubscriptionFailure>,
}

// ─── Resources ───────────────────────────────────────────────────────────────

/// The resource an event is about, loaded from history.
#[derive(Debug, Clone)]
pub(crate) enum Resource {
  Task(Task),
  Build(Build),
  Version(Version),
}

impl Resource {
  /// Attributes subscriptions select on.
  pub(crate) fn selectors(&self) -> Vec<Selector> {
    match self {
      Self::Task(t) => vec![
        Selector::new(SELECTOR_ID, &t.task_id),
        Selector::new(SELECTOR_OBJECT, "task"),
        Selector::new(SELECTOR_PROJECT, &t.project),
        Selector::new(SELECTOR_IN_VERSION, &t.version),
        Selector::new(SELECTOR_IN_BUILD, &t.build_id),
        Selector::new(SELECTOR_DISPLAY_NAME, &t.display_name),
        Selector::new(SELECTOR_BUILD_VARIANT, &t.build_variant),
        Selector::new(SELECTOR_REQUESTER, &t.requester),
      ],
      Self::Build(b) => vec![
        Selector::new(SELECTOR_ID, &b.build_id),
        Selector::new(SELECTOR_OBJECT, "build"),
        Selector::new(SELECTOR_PROJECT, &b.project),
        Selector::new(SELECTOR_IN_VERSION, &b.version),
        Selector::new(SELECTOR_DISPLAY_NAME, &b.display_name),
        Selector::new(SELECTOR_BUILD_VARIANT, &b.build_variant),
        Selector::new(SELECTOR_REQUESTER, &b.requester),
      ],
      Self::Version(v) => vec![
        Selector::new(SELECTOR_ID, &v.version_id),
        Selector::new(SELECTOR_OBJECT, "version"),
        Selector::new(SELECTOR_PROJECT, &v.project),
        Selector::new(SELECTOR_REQUESTER, &v.requester),
        Selector::new(SELECTOR_OWNER, &v.author),
      ],
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct TriggerEngine<S> {
  pub(crate) store:  Arc<S>,
  pub(crate) config: EngineConfig,
}

impl<S> TriggerEngine<S>
where
  S: SubscriptionStore + AlertStore + TaskHistory,
{
  pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
    Self { store, config }
  }

  /// Evaluate every subscription matching `event`.
  ///
  /// Fails as a whole if the resource cannot be loaded, if subscription lookup
  /// fails, or if any matching subscription names a trigger that does not
  /// apply to the event's resource type; in those cases no predicate has run
  /// and no alert record was written. Failures inside a single predicate or
  /// renderer are collected in [`Evaluation::failures`].
  pub async fn notifications_from_event(
    &self,
    event: &Event,
  ) -> Result<Evaluation> {
    let resource_type = event.resource_type();
    let resource = self.load_resource(event).await?;
    let attributes = resource.selectors();

    let subscriptions = self
      .store
      .find_subscriptions(resource_type, &attributes)
      .await
      .map_err(Error::store)?;

    if let Some(sub) = subscriptions
      .iter()
      .find(|s| !s.trigger.supports(resource_type))
    {
      return Err(Error::UnsupportedTrigger {
        subscription_id: sub.subscription_id,
        trigger: sub.trigger,
        resource_type,
      });
    }

    let mut evaluation = Evaluation::default();
    for sub in &subscriptions {
      match self.evaluate(event, &resource, sub).await {
        Ok(Some(notification)) => {
          tracing::debug!(
            event_id = %event.event_id,
            subscription_id = %sub.subscription_id,
            trigger = %sub.trigger,
            notification_id = %notification.notification_id,
            "trigger fired"
          );
          evaluation.notifications.push(notification);
        }
        Ok(None) => {}
        Err(error) => {
          tracing::warn!(
            event_id = %event.event_id,
            subscription_id = %sub.subscription_id,
            trigger = %sub.trigger,
            %error,
            "subscription evaluation failed"
          );
          evaluation.failures.push(SubscriptionFailure {
            subscription_id: sub.subscription_id,
            error,
          });
        }
      }
    }

    tracing::info!(
      event_id = %event.event_id,
      resource_id = %event.resource_id,
      matched = subscriptions.len(),
      fired = evaluation.notifications.len(),
      failed = evaluation.failures.len(),
      "evaluated event"
    );
    Ok(evaluation)
  }

  async fn load_resource(&self, event: &Event) -> Result<Resource> {
    let id = event.resource_id.as_str();
    let not_found = || Error::ResourceNotFound {
      resource_type: event.resource_type(),
      id:            id.to_string(),
    };

    match &event.data {
      EventData::Task { execution, .. } => self
        .store
        .get_task(id, Some(*execution))
        .await
        .map_err(Error::store)?
        .map(Resource::Task)
        .ok_or_else(not_found),
      EventData::Build { .. } => self
        .store
        .get_build(id)
        .await
        .map_err(Error::store)?
        .map(Resource::Build)
        .ok_or_else(not_found),
      EventData::Version { .. } => self
        .store
        .get_version(id)
        .await
        .map_err(Error::store)?
        .map(Resource::Version)
        .ok_or_else(not_found),
    }
  }

  async fn evaluate(
    &self,
    event: &Event,
    resource: &Resource,
    sub: &Subscription,
  ) -> Result<Option<Notification>> {
    let fired = match (&event.data, resource) {
      (EventData::Task { status, .. }, Resource::Task(task)) => {
        self.task_trigger(event, task, *status, sub).await?
      }
      (EventData::Build { status }, Resource::Build(_))
      | (EventData::Version { status }, Resource::Version(_)) => {
        outcome_trigger(sub.trigger, *status)
      }
      _ => false,
    };
    if !fired {
      return Ok(None);
    }

    let template = Template::new(&self.config.ui_url, event, resource, sub);
    let payload = render(&template, sub)?;
    Ok(Some(Notification::new(
      event.event_id,
      sub.subscription_id,
      sub.subscriber.clone(),
      payload,
    )))
  }
}

/// Build and version triggers. Only the outcome family applies.
fn outcome_trigger(trigger: Trigger, status: BuildStatus) -> bool {
  match trigger {
    Trigger::Outcome => status.is_finished(),
    Trigger::Success => status == BuildStatus::Success,
    Trigger::Failure => status == BuildStatus::Failed,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn build_outcome_triggers() {
    assert!(!outcome_trigger(Trigger::Outcome, BuildStatus::Started));
    assert!(outcome_trigger(Trigger::Outcome, BuildStatus::Failed));
    assert!(outcome_trigger(Trigger::Success, BuildStatus::Success));
    assert!(!outcome_trigger(Trigger::Success, BuildStatus::Failed));
    assert!(outcome_trigger(Trigger::Failure, BuildStatus::Failed));
    assert!(!outcome_trigger(Trigger::Regression, BuildStatus::Failed));
  }

  #[test]
  fn version_selectors_include_owner() {
    let v = Resource::Version(Version {
      version_id: "v1".into(),
      project:    "mci".into(),
      revision:   "abc".into(),
      author:     "alice".into(),
      requester:  "gitter_request".into(),
      status:     BuildStatus::Success,
    });
    let selectors = v.selectors();
    assert!(selectors.contains(&Selector::new(SELECTOR_OWNER, "alice")));
    assert!(selectors.contains(&Selector::new(SELECTOR_OBJECT, "version")));
    assert!(!selectors.iter().any(|s| s.kind == SELECTOR_IN_BUILD));
  }
}
