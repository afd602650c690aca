//! The dispatch worker: concludes exactly one delivery attempt per call.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tidings_core::{
  notification::Notification,
  store::{FlagSource, NotificationStore},
};

use crate::{
  Error, Result,
  gate::{DegradedModeGate, check_flag},
  registry::{ErrorHandler, Message, SenderRegistry},
};

/// Persists post-hoc sender failures on the notification. `sent_at` is left
/// to the dispatcher.
pub struct StoreErrorHandler<S> {
  store:    Arc<S>,
  reported: AtomicBool,
}

impl<S> StoreErrorHandler<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      reported: AtomicBool::new(false),
    }
  }

  /// Whether a sender has reported a failure through this handler.
  pub fn reported(&self) -> bool { self.reported.load(Ordering::SeqCst) }
}

#[async_trait]
impl<S: NotificationStore + 'static> ErrorHandler for StoreErrorHandler<S> {
  async fn handle(&self, notification_id: &str, error: Error) {
    tracing::warn!(notification_id, %error, "sender reported a failure");
    self.reported.store(true, Ordering::SeqCst);
    if let Err(e) = self
      .store
      .record_notification_error(notification_id, error.to_string())
      .await
    {
      tracing::error!(notification_id, error = %e, "failed to record sender failure");
    }
  }
}

pub struct Dispatcher<S> {
  store:    Arc<S>,
  gate:     DegradedModeGate<S>,
  registry: SenderRegistry,
  deadline: Duration,
}

impl<S> Dispatcher<S>
where
  S: NotificationStore + FlagSource + 'static,
{
  pub fn new(store: Arc<S>, registry: SenderRegistry, deadline: Duration) -> Self {
    Self {
      gate: DegradedModeGate::new(store.clone()),
      store,
      registry,
      deadline,
    }
  }

  /// Run one unit of work.
  ///
  /// Precondition failures (empty id, unreadable flags, unknown notification)
  /// return an error without touching the store. Once the notification is
  /// loaded every path ends by stamping `sent_at`, with the error recorded
  /// alongside it when there was one; that same error is returned.
  pub async fn run(&self, notification_id: &str) -> Result<()> {
    if notification_id.is_empty() {
      return Err(Error::EmptyNotificationId);
    }
    let flags = self.gate.reload().await?;
    let notification = self
      .store
      .get_notification(notification_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotificationNotFound(notification_id.to_string()))?;

    let kind = notification.subscriber.kind();
    let channel = kind.channel();

    let handler = Arc::new(StoreErrorHandler::new(self.store.clone()));
    let outcome = match check_flag(&flags, channel) {
      Ok(()) => self.deliver(&notification, handler.clone()).await,
      Err(suppressed) => Err(suppressed),
    };

    let error = outcome.as_ref().err().map(ToString::to_string);
    self
      .store
      .complete_notification(notification_id, Utc::now(), error)
      .await
      .map_err(Error::store)?;

    match &outcome {
      Ok(()) if handler.reported() => tracing::info!(
        notification_id,
        %channel,
        subscriber = %notification.subscriber,
        "delivery attempt concluded with a reported failure"
      ),
      Ok(()) => tracing::info!(
        notification_id,
        %channel,
        subscriber = %notification.subscriber,
        "notification delivered"
      ),
      Err(e) if e.is_suppression() => {}
      Err(e) => tracing::warn!(
        notification_id,
        %channel,
        subscriber = %notification.subscriber,
        error = %e,
        "notification delivery failed"
      ),
    }
    outcome
  }

  async fn deliver(
    &self,
    notification: &Notification,
    handler: Arc<StoreErrorHandler<S>>,
  ) -> Result<()> {
    let kind = notification.subscriber.kind();
    if !notification.payload.matches(kind) {
      return Err(Error::MismatchedPayload(kind));
    }

    let mut sender = self.registry.sender_for(&notification.subscriber)?;
    sender.set_error_handler(handler);

    let message = Message {
      notification_id: notification.notification_id.clone(),
      payload:         notification.payload.clone(),
    };
    tokio::time::timeout(self.deadline, sender.send(&message))
      .await
      .map_err(|_| Error::Timeout(self.deadline))?
  }
}

#[cfg(test)]
mod tests {
  use tidings_core::{
    notification::{Payload, SlackPayload},
    subscription::Subscriber,
  };
  use tidings_store_sqlite::SqliteStore;
  use uuid::Uuid;

  use super::*;

  #[tokio::test]
  async fn handler_records_and_remembers_reported_failures() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let notification = Notification::new(
      Uuid::new_v4(),
      Uuid::new_v4(),
      Subscriber::Slack("#ci".into()),
      Payload::Slack(SlackPayload {
        body:        "hi".into(),
        attachments: vec![],
      }),
    );
    let id = notification.notification_id.clone();
    store.insert_notifications(vec![notification]).await.unwrap();

    let handler = StoreErrorHandler::new(store.clone());
    assert!(!handler.reported());
    handler
      .handle(&id, Error::Rejected {
        service: "slack",
        reason:  "channel_not_found".into(),
      })
      .await;
    assert!(handler.reported());

    let stored = store.get_notification(&id).await.unwrap().unwrap();
    assert!(stored.error.unwrap().contains("channel_not_found"));
    assert!(stored.sent_at.is_none());
  }
}
