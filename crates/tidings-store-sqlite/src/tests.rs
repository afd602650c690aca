//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use tidings_core::{
  alert::{AlertRecord, AlertScope},
  event::{Event, EventData, EventType, ResourceType},
  flags::{Channel, ServiceFlags},
  notification::{Notification, Payload, SlackPayload},
  resource::{
    Build, BuildStatus, HistoryScope, Task, TaskStatus, TestResult, TestStatus,
  },
  store::{
    AlertStore, EventLog, FlagSource, NotificationStore, SubscriptionStore,
    TaskHistory,
  },
  subscription::{
    SELECTOR_ID, SELECTOR_PROJECT, Selector, Subscriber, Subscription, Trigger,
    WebhookSubscriber,
  },
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn task(id: &str, revision: i64, status: TaskStatus) -> Task {
  Task {
    task_id: id.into(),
    execution: 0,
    display_name: "compile".into(),
    project: "mci".into(),
    version: format!("v{revision}"),
    build_id: format!("b{revision}"),
    build_variant: "ubuntu".into(),
    requester: "gitter_request".into(),
    status,
    start_time: None,
    finish_time: None,
    revision_order: revision,
  }
}

fn scope() -> HistoryScope {
  HistoryScope {
    project:       "mci".into(),
    build_variant: "ubuntu".into(),
    display_name:  "compile".into(),
  }
}

fn slack_notification(event_id: Uuid) -> Notification {
  Notification::new(
    event_id,
    Uuid::new_v4(),
    Subscriber::Slack("#ci".into()),
    Payload::Slack(SlackPayload {
      body:        "hello".into(),
      attachments: vec![],
    }),
  )
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn find_subscriptions_filters_by_resource_and_selectors() {
  let s = store().await;

  let everything = Subscription::new(
    ResourceType::Task,
    Trigger::Outcome,
    vec![],
    Subscriber::Email("a@example.com".into()),
    "alice",
  );
  let project_only = Subscription::new(
    ResourceType::Task,
    Trigger::Failure,
    vec![Selector::new(SELECTOR_PROJECT, "mci")],
    Subscriber::Webhook(WebhookSubscriber {
      url:    "http://localhost/hook".into(),
      secret: "s".into(),
    }),
    "bob",
  );
  let other_project = Subscription::new(
    ResourceType::Task,
    Trigger::Failure,
    vec![Selector::new(SELECTOR_PROJECT, "other")],
    Subscriber::Slack("#x".into()),
    "bob",
  );
  let builds = Subscription::new(
    ResourceType::Build,
    Trigger::Outcome,
    vec![],
    Subscriber::Slack("#builds".into()),
    "carol",
  );
  for sub in [&everything, &project_only, &other_project, &builds] {
    s.upsert_subscription(sub.clone()).await.unwrap();
  }

  let attrs = vec![
    Selector::new(SELECTOR_ID, "t1"),
    Selector::new(SELECTOR_PROJECT, "mci"),
  ];
  let found = s.find_subscriptions(ResourceType::Task, &attrs).await.unwrap();
  let ids: Vec<Uuid> = found.iter().map(|s| s.subscription_id).collect();
  assert_eq!(found.len(), 2);
  assert!(ids.contains(&everything.subscription_id));
  assert!(ids.contains(&project_only.subscription_id));

  // The decoded subscriber keeps its concrete target.
  let hook = found
    .iter()
    .find(|s| s.subscription_id == project_only.subscription_id)
    .unwrap();
  assert_eq!(hook.subscriber, project_only.subscriber);
}

#[tokio::test]
async fn upsert_replaces_by_id_and_list_filters_by_owner() {
  let s = store().await;

  let mut sub = Subscription::new(
    ResourceType::Version,
    Trigger::Success,
    vec![],
    Subscriber::Slack("#a".into()),
    "alice",
  );
  s.upsert_subscription(sub.clone()).await.unwrap();
  sub.subscriber = Subscriber::Slack("#b".into());
  s.upsert_subscription(sub.clone()).await.unwrap();
  s.upsert_subscription(Subscription::new(
    ResourceType::Task,
    Trigger::Outcome,
    vec![],
    Subscriber::Slack("#c".into()),
    "bob",
  ))
  .await
  .unwrap();

  let all = s.list_subscriptions(None).await.unwrap();
  assert_eq!(all.len(), 2);

  let alice = s.list_subscriptions(Some("alice".into())).await.unwrap();
  assert_eq!(alice.len(), 1);
  assert_eq!(alice[0].subscriber, Subscriber::Slack("#b".into()));
}

// ─── Alert history ───────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_alert_is_insert_if_absent() {
  let s = store().await;
  let sub = Uuid::new_v4();
  let scope = AlertScope::Version("v1".into());

  let first = AlertRecord::new(sub, Trigger::FirstFailureInVersion, &scope);
  let second = AlertRecord::new(sub, Trigger::FirstFailureInVersion, &scope);
  assert!(s.insert_alert(first).await.unwrap());
  assert!(!s.insert_alert(second).await.unwrap());

  // Different trigger, same scope: independent.
  let other = AlertRecord::new(sub, Trigger::FirstFailureInBuild, &scope);
  assert!(s.insert_alert(other).await.unwrap());
}

#[tokio::test]
async fn concurrent_alert_inserts_admit_exactly_one() {
  let s = store().await;
  let sub = Uuid::new_v4();
  let scope = AlertScope::Build("b1".into());

  let attempts = (0..8).map(|_| {
    let s = s.clone();
    let rec = AlertRecord::new(sub, Trigger::FirstFailureInBuild, &scope);
    tokio::spawn(async move { s.insert_alert(rec).await.unwrap() })
  });
  let mut winners = 0;
  for handle in attempts {
    if handle.await.unwrap() {
      winners += 1;
    }
  }
  assert_eq!(winners, 1);
}

#[tokio::test]
async fn last_alert_respects_scope_and_revision_bound() {
  let s = store().await;
  let sub = Uuid::new_v4();

  for rev in [3, 7, 5] {
    let rec = AlertRecord::for_task(
      sub,
      Trigger::RegressionByTest,
      &task(&format!("t{rev}"), rev, TaskStatus::Failed),
    )
    .with_failing_tests(vec![format!("test_{rev}")]);
    assert!(s.insert_alert(rec).await.unwrap());
  }

  let latest = s
    .last_alert(sub, Trigger::RegressionByTest, &scope(), i64::MAX)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(latest.revision_order, Some(7));
  assert_eq!(latest.failing_tests, vec!["test_7".to_string()]);
  assert_eq!(latest.history, Some(scope()));

  let bounded = s
    .last_alert(sub, Trigger::RegressionByTest, &scope(), 6)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(bounded.revision_order, Some(5));

  // Another trigger or subscription sees nothing.
  assert!(
    s.last_alert(sub, Trigger::Regression, &scope(), i64::MAX)
      .await
      .unwrap()
      .is_none()
  );
  assert!(
    s.last_alert(Uuid::new_v4(), Trigger::RegressionByTest, &scope(), i64::MAX)
      .await
      .unwrap()
      .is_none()
  );
}

// ─── Resource history ────────────────────────────────────────────────────────

#[tokio::test]
async fn get_task_defaults_to_latest_execution() {
  let s = store().await;
  let mut t = task("t1", 1, TaskStatus::Succeeded);
  s.put_task(&t).await.unwrap();
  t.execution = 1;
  t.status = TaskStatus::Failed;
  s.put_task(&t).await.unwrap();

  let latest = s.get_task("t1", None).await.unwrap().unwrap();
  assert_eq!(latest.execution, 1);
  assert_eq!(latest.status, TaskStatus::Failed);

  let first = s.get_task("t1", Some(0)).await.unwrap().unwrap();
  assert_eq!(first.status, TaskStatus::Succeeded);

  assert!(s.get_task("missing", None).await.unwrap().is_none());
}

#[tokio::test]
async fn history_queries_use_mainline_finished_latest_executions() {
  let s = store().await;

  s.put_task(&task("t1", 1, TaskStatus::Succeeded)).await.unwrap();
  s.put_task(&task("t2", 2, TaskStatus::Failed)).await.unwrap();
  // Patch build: never part of history.
  let mut patch = task("p3", 3, TaskStatus::Succeeded);
  patch.requester = "patch_request".into();
  s.put_task(&patch).await.unwrap();
  // Still running: not completed.
  s.put_task(&task("t4", 4, TaskStatus::Started)).await.unwrap();
  // Different variant.
  let mut other = task("o4", 4, TaskStatus::Succeeded);
  other.build_variant = "windows".into();
  s.put_task(&other).await.unwrap();

  let prev = s.previous_completed_task(&scope(), 5).await.unwrap().unwrap();
  assert_eq!(prev.task_id, "t2");

  let green = s.last_successful_task(&scope(), 5).await.unwrap().unwrap();
  assert_eq!(green.task_id, "t1");

  // The bound is strict.
  let prev = s.previous_completed_task(&scope(), 2).await.unwrap().unwrap();
  assert_eq!(prev.task_id, "t1");
  assert!(s.previous_completed_task(&scope(), 1).await.unwrap().is_none());

  // A rerun that failed hides the earlier successful execution.
  let mut rerun = task("t1", 1, TaskStatus::Failed);
  rerun.execution = 1;
  s.put_task(&rerun).await.unwrap();
  assert!(s.last_successful_task(&scope(), 5).await.unwrap().is_none());
}

#[tokio::test]
async fn test_results_are_per_execution() {
  let s = store().await;
  for (exec, file, status) in [
    (0, "a", TestStatus::Fail),
    (0, "b", TestStatus::Pass),
    (1, "a", TestStatus::Pass),
  ] {
    s.add_test_result(&TestResult {
      task_id:   "t1".into(),
      execution: exec,
      test_file: file.into(),
      status,
    })
    .await
    .unwrap();
  }

  let first = s.test_results("t1", 0).await.unwrap();
  assert_eq!(first.len(), 2);
  assert_eq!(first[0].status, TestStatus::Fail);
  assert_eq!(s.test_results("t1", 1).await.unwrap().len(), 1);
  assert!(s.test_results("t1", 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn builds_round_trip() {
  let s = store().await;
  let build = Build {
    build_id:      "b1".into(),
    version:       "v1".into(),
    project:       "mci".into(),
    build_variant: "ubuntu".into(),
    display_name:  "Ubuntu".into(),
    requester:     "gitter_request".into(),
    status:        BuildStatus::Failed,
  };
  s.put_build(&build).await.unwrap();
  assert_eq!(s.get_build("b1").await.unwrap(), Some(build));
  assert!(s.get_version("v1").await.unwrap().is_none());
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_notifications_ignores_duplicates() {
  let s = store().await;
  let n = slack_notification(Uuid::new_v4());

  let inserted = s.insert_notifications(vec![n.clone()]).await.unwrap();
  assert_eq!(inserted, vec![n.notification_id.clone()]);

  let again = s.insert_notifications(vec![n.clone()]).await.unwrap();
  assert!(again.is_empty());

  let fetched = s.get_notification(&n.notification_id).await.unwrap().unwrap();
  assert_eq!(fetched.subscriber, n.subscriber);
  assert_eq!(fetched.payload, n.payload);
  assert!(fetched.sent_at.is_none());
}

#[tokio::test]
async fn complete_notification_keeps_handler_error() {
  let s = store().await;
  let n = slack_notification(Uuid::new_v4());
  let id = n.notification_id.clone();
  s.insert_notifications(vec![n]).await.unwrap();

  s.record_notification_error(&id, "channel_not_found".into())
    .await
    .unwrap();
  s.complete_notification(&id, Utc::now(), None).await.unwrap();

  let done = s.get_notification(&id).await.unwrap().unwrap();
  assert!(done.sent_at.is_some());
  assert_eq!(done.error.as_deref(), Some("channel_not_found"));

  // An explicit error replaces it.
  s.complete_notification(&id, Utc::now(), Some("timeout".into()))
    .await
    .unwrap();
  let done = s.get_notification(&id).await.unwrap().unwrap();
  assert_eq!(done.error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn completing_missing_notification_is_an_error() {
  let s = store().await;
  let err = s
    .complete_notification("nope", Utc::now(), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotificationNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn unsent_ids_and_counts() {
  let s = store().await;
  let a = slack_notification(Uuid::new_v4());
  let b = slack_notification(Uuid::new_v4());
  let c = Notification::new(
    Uuid::new_v4(),
    Uuid::new_v4(),
    Subscriber::JiraComment("ABC-1".into()),
    Payload::JiraComment("hi".into()),
  );
  s.insert_notifications(vec![a.clone(), b.clone(), c.clone()])
    .await
    .unwrap();
  s.complete_notification(&b.notification_id, Utc::now(), None)
    .await
    .unwrap();

  let ids = s.unsent_notification_ids().await.unwrap();
  assert_eq!(ids.len(), 2);
  assert!(ids.contains(&a.notification_id));
  assert!(ids.contains(&c.notification_id));

  let counts = s.unsent_notification_counts().await.unwrap();
  assert_eq!(counts.get("slack"), Some(&1));
  assert_eq!(counts.get("jira-comment"), Some(&1));
}

// ─── Event log ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn event_log_tracks_processing() {
  let s = store().await;
  assert_eq!(s.last_processed_at().await.unwrap(), None);

  let mut older = Event::new(EventType::TaskFinished, "t1", EventData::Task {
    status:    TaskStatus::Failed,
    execution: 0,
  });
  older.timestamp = Utc::now() - Duration::minutes(5);
  let newer = Event::new(EventType::BuildStateChange, "b1", EventData::Build {
    status: BuildStatus::Success,
  });
  s.insert_event(newer.clone()).await.unwrap();
  s.insert_event(older.clone()).await.unwrap();
  // Redelivery of the same event is absorbed.
  s.insert_event(older.clone()).await.unwrap();

  let pending = s.unprocessed_events(10).await.unwrap();
  assert_eq!(pending.len(), 2);
  assert_eq!(pending[0].event_id, older.event_id);
  assert_eq!(pending[0].data, older.data);
  assert_eq!(s.count_unprocessed_events().await.unwrap(), 2);

  let at = Utc::now();
  s.mark_event_processed(older.event_id, at).await.unwrap();
  assert_eq!(s.count_unprocessed_events().await.unwrap(), 1);
  assert_eq!(s.unprocessed_events(10).await.unwrap()[0].event_id, newer.event_id);

  let last = s.last_processed_at().await.unwrap().unwrap();
  assert_eq!(last.timestamp_micros(), at.timestamp_micros());
}

// ─── Service flags ───────────────────────────────────────────────────────────

#[tokio::test]
async fn service_flags_default_then_persist() {
  let s = store().await;
  assert_eq!(s.service_flags().await.unwrap(), ServiceFlags::default());

  let mut flags = ServiceFlags::default();
  flags.set(Channel::Email, true);
  s.set_service_flags(flags).await.unwrap();
  assert!(s.service_flags().await.unwrap().email_notifications_disabled);

  s.set_service_flags(ServiceFlags::all_disabled()).await.unwrap();
  assert_eq!(s.service_flags().await.unwrap(), ServiceFlags::all_disabled());
}
