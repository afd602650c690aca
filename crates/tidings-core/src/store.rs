//! Storage traits for the notification pipeline.
//!
//! The traits are implemented by storage backends (e.g.
//! `tidings-store-sqlite`). The trigger engine, the dispatch worker and the
//! worker binary depend on these abstractions, never on a concrete backend.
//!
//! All methods return `Send` futures so the traits can be used from a
//! multi-threaded tokio runtime.

use std::{collections::BTreeMap, future::Future};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  alert::AlertRecord,
  event::{Event, ResourceType},
  flags::ServiceFlags,
  notification::Notification,
  resource::{Build, HistoryScope, Task, TestResult, Version},
  subscription::{Selector, Subscription, Trigger},
};

/// Common supertrait carrying the backend's error type.
pub trait Store: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

pub trait SubscriptionStore: Store {
  /// Insert or replace a subscription by id.
  fn upsert_subscription(
    &self,
    subscription: Subscription,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Subscriptions on `resource_type` whose selectors are all satisfied by
  /// `attributes`.
  ///
  /// Returns an error if any candidate subscription fails to decode; a broken
  /// subscription is surfaced rather than skipped.
  fn find_subscriptions<'a>(
    &'a self,
    resource_type: ResourceType,
    attributes: &'a [Selector],
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + 'a;

  fn list_subscriptions(
    &self,
    owner: Option<String>,
  ) -> impl Future<Output = Result<Vec<Subscription>, Self::Error>> + Send + '_;
}

// ─── Alert history ───────────────────────────────────────────────────────────

pub trait AlertStore: Store {
  /// Insert `record` unless one with the same `dedup_key` exists.
  ///
  /// Returns `true` if this call created the record. The check and the insert
  /// are a single atomic operation.
  fn insert_alert(
    &self,
    record: AlertRecord,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Most recent alert of `trigger` for `subscription_id` within `scope` whose
  /// revision order is at most `max_revision`.
  fn last_alert<'a>(
    &'a self,
    subscription_id: Uuid,
    trigger: Trigger,
    scope: &'a HistoryScope,
    max_revision: i64,
  ) -> impl Future<Output = Result<Option<AlertRecord>, Self::Error>> + Send + 'a;
}

// ─── Resource history (read-only) ────────────────────────────────────────────

pub trait TaskHistory: Store {
  /// A task execution; `None` for `execution` means the latest one.
  fn get_task<'a>(
    &'a self,
    task_id: &'a str,
    execution: Option<u32>,
  ) -> impl Future<Output = Result<Option<Task>, Self::Error>> + Send + 'a;

  /// The latest execution of the most recent finished mainline task in
  /// `scope` with revision order strictly below `before_revision`.
  fn previous_completed_task<'a>(
    &'a self,
    scope: &'a HistoryScope,
    before_revision: i64,
  ) -> impl Future<Output = Result<Option<Task>, Self::Error>> + Send + 'a;

  /// Like [`previous_completed_task`](Self::previous_completed_task), but only
  /// successful tasks qualify.
  fn last_successful_task<'a>(
    &'a self,
    scope: &'a HistoryScope,
    before_revision: i64,
  ) -> impl Future<Output = Result<Option<Task>, Self::Error>> + Send + 'a;

  fn test_results<'a>(
    &'a self,
    task_id: &'a str,
    execution: u32,
  ) -> impl Future<Output = Result<Vec<TestResult>, Self::Error>> + Send + 'a;

  fn get_build<'a>(
    &'a self,
    build_id: &'a str,
  ) -> impl Future<Output = Result<Option<Build>, Self::Error>> + Send + 'a;

  fn get_version<'a>(
    &'a self,
    version_id: &'a str,
  ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a;
}

// ─── Notifications ───────────────────────────────────────────────────────────

pub trait NotificationStore: Store {
  /// Insert notifications, ignoring any whose id already exists. Returns the
  /// ids that were actually inserted.
  fn insert_notifications(
    &self,
    notifications: Vec<Notification>,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  fn get_notification<'a>(
    &'a self,
    notification_id: &'a str,
  ) -> impl Future<Output = Result<Option<Notification>, Self::Error>> + Send + 'a;

  /// Record the conclusion of a delivery attempt. `error = None` keeps any
  /// error already recorded for the notification.
  fn complete_notification<'a>(
    &'a self,
    notification_id: &'a str,
    sent_at: DateTime<Utc>,
    error: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Record a failure reported after the fact. Leaves `sent_at` untouched.
  fn record_notification_error<'a>(
    &'a self,
    notification_id: &'a str,
    error: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Ids of every notification without `sent_at`, oldest first.
  fn unsent_notification_ids(
    &self,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Unsent notification counts keyed by subscriber type.
  fn unsent_notification_counts(
    &self,
  ) -> impl Future<Output = Result<BTreeMap<String, u64>, Self::Error>> + Send + '_;
}

// ─── Event log ───────────────────────────────────────────────────────────────

pub trait EventLog: Store {
  fn insert_event(
    &self,
    event: Event,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Up to `limit` unprocessed events, oldest first.
  fn unprocessed_events(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;

  fn mark_event_processed(
    &self,
    event_id: Uuid,
    processed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn count_unprocessed_events(
    &self,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn last_processed_at(
    &self,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;
}

// ─── Service flags ───────────────────────────────────────────────────────────

/// Durable source of [`ServiceFlags`]. Every call reads fresh state.
pub trait FlagSource: Store {
  fn service_flags(
    &self,
  ) -> impl Future<Output = Result<ServiceFlags, Self::Error>> + Send + '_;

  fn set_service_flags(
    &self,
    flags: ServiceFlags,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Job queue ───────────────────────────────────────────────────────────────

/// Work distribution for dispatch: one unit per notification id.
pub trait JobQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn enqueue(
    &self,
    notification_id: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
