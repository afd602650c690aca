//! Event log to delivered notification, through the worker wiring.

use std::{sync::Arc, time::Duration};

use axum::{Router, extract::State, http::StatusCode, routing::post};
use chrono::Utc;
use tidings_core::{
  event::{Event, EventData, EventType, ResourceType},
  notification::{Notification, Payload, SlackPayload},
  resource::{Build, BuildStatus, Task, TaskStatus},
  store::{EventLog, NotificationStore, SubscriptionStore},
  subscription::{
    SELECTOR_PROJECT, Selector, Subscriber, Subscription, Trigger,
    WebhookSubscriber,
  },
};
use tidings_store_sqlite::SqliteStore;
use tidings_trigger::{EngineConfig, TriggerEngine};
use tidings_worker::{
  config::WorkerConfig,
  processor::EventProcessor,
  queue::{LocalQueue, requeue_unsent},
  stats::collect_stats,
};
use tokio::{net::TcpListener, sync::Notify};
use uuid::Uuid;

async fn store() -> Arc<SqliteStore> {
  Arc::new(SqliteStore::open_in_memory().await.unwrap())
}

fn task(status: TaskStatus) -> Task {
  let start = Utc::now() - chrono::Duration::minutes(10);
  Task {
    task_id:        "t1".into(),
    execution:      0,
    display_name:   "compile".into(),
    project:        "mci".into(),
    version:        "v1".into(),
    build_id:       "b1".into(),
    build_variant:  "ubuntu".into(),
    requester:      "gitter_request".into(),
    status,
    start_time:     Some(start),
    finish_time:    Some(start + chrono::Duration::minutes(5)),
    revision_order: 1,
  }
}

fn finished(task: &Task) -> Event {
  Event::new(EventType::TaskFinished, &task.task_id, EventData::Task {
    status:    task.status,
    execution: task.execution,
  })
}

async fn subscribe(store: &SqliteStore, trigger: Trigger, subscriber: Subscriber) {
  store
    .upsert_subscription(Subscription::new(
      ResourceType::Task,
      trigger,
      vec![Selector::new(SELECTOR_PROJECT, "mci")],
      subscriber,
      "someone",
    ))
    .await
    .unwrap();
}

fn processor(
  store: &Arc<SqliteStore>,
  queue: &Arc<LocalQueue>,
) -> EventProcessor<SqliteStore, LocalQueue> {
  let engine = TriggerEngine::new(store.clone(), EngineConfig {
    ui_url: "https://ci.example.com".into(),
    ..EngineConfig::default()
  });
  EventProcessor::new(store.clone(), engine, queue.clone())
}

#[tokio::test]
async fn processed_events_queue_their_notifications_once() {
  let store = store().await;
  let queue = Arc::new(LocalQueue::new());
  let t = task(TaskStatus::Failed);
  store.put_task(&t).await.unwrap();
  subscribe(&store, Trigger::Outcome, Subscriber::Slack("#ci".into())).await;
  subscribe(&store, Trigger::Failure, Subscriber::Email("dev@example.com".into()))
    .await;
  let event = finished(&t);
  store.insert_event(event.clone()).await.unwrap();

  let processor = processor(&store, &queue);
  let summary = processor.process_batch(10).await.unwrap();
  assert_eq!(summary.fetched, 1);
  assert_eq!(summary.processed, 1);
  assert_eq!(summary.notifications, 2);
  assert_eq!(queue.len(), 2);
  assert_eq!(store.count_unprocessed_events().await.unwrap(), 0);
  assert!(store.last_processed_at().await.unwrap().is_some());

  // Duplicate delivery of the same event creates nothing new.
  assert_eq!(processor.process_event(&event).await.unwrap(), 0);
  assert_eq!(queue.len(), 2);

  let stats = collect_stats(store.as_ref()).await.unwrap();
  assert_eq!(stats.unprocessed_events, 0);
  assert_eq!(stats.pending_total(), 2);
  assert_eq!(stats.pending_notifications_by_type["slack"], 1);
  assert_eq!(stats.pending_notifications_by_type["email"], 1);
}

#[tokio::test]
async fn events_that_cannot_evaluate_do_not_block_newer_ones() {
  let store = store().await;
  let queue = Arc::new(LocalQueue::new());

  // Regression is a task-only trigger; every build event aborts on it.
  store
    .upsert_subscription(Subscription::new(
      ResourceType::Build,
      Trigger::Regression,
      vec![],
      Subscriber::Slack("#builds".into()),
      "someone",
    ))
    .await
    .unwrap();
  for id in ["b1", "b2"] {
    store
      .put_build(&Build {
        build_id:      id.into(),
        version:       "v1".into(),
        project:       "mci".into(),
        build_variant: "ubuntu".into(),
        display_name:  "ubuntu".into(),
        requester:     "gitter_request".into(),
        status:        BuildStatus::Failed,
      })
      .await
      .unwrap();
    store
      .insert_event(Event::new(EventType::BuildStateChange, id, EventData::Build {
        status: BuildStatus::Failed,
      }))
      .await
      .unwrap();
  }
  // No task behind this one.
  store
    .insert_event(Event::new(EventType::TaskFinished, "gone", EventData::Task {
      status:    TaskStatus::Failed,
      execution: 0,
    }))
    .await
    .unwrap();

  let t = task(TaskStatus::Failed);
  store.put_task(&t).await.unwrap();
  subscribe(&store, Trigger::Outcome, Subscriber::Slack("#ci".into())).await;
  store.insert_event(finished(&t)).await.unwrap();

  let processor = processor(&store, &queue);
  let first = processor.process_batch(2).await.unwrap();
  assert_eq!(first.skipped, 2);
  assert_eq!(first.failed, 0);

  let second = processor.process_batch(2).await.unwrap();
  assert_eq!(second.skipped, 1);
  assert_eq!(second.processed, 1);
  assert_eq!(second.notifications, 1);
  assert_eq!(queue.len(), 1);
  assert_eq!(store.count_unprocessed_events().await.unwrap(), 0);
}

#[tokio::test]
async fn unsent_notifications_are_requeued_at_startup() {
  let store = store().await;
  let sent = Notification::new(
    Uuid::new_v4(),
    Uuid::new_v4(),
    Subscriber::Slack("#ci".into()),
    Payload::Slack(SlackPayload {
      body:        "hi".into(),
      attachments: vec![],
    }),
  );
  let mut unsent = sent.clone();
  unsent.notification_id = Notification::id_for(Uuid::new_v4(), Uuid::new_v4());
  let unsent_id = unsent.notification_id.clone();
  let sent_id = sent.notification_id.clone();
  store.insert_notifications(vec![sent, unsent]).await.unwrap();
  store
    .complete_notification(&sent_id, Utc::now(), None)
    .await
    .unwrap();

  let queue = LocalQueue::new();
  assert_eq!(requeue_unsent(store.as_ref(), &queue).await.unwrap(), 1);
  assert_eq!(queue.next().await, Some(unsent_id));
}

#[tokio::test]
async fn run_delivers_a_webhook_end_to_end() {
  let store = store().await;

  let delivered = Arc::new(Notify::new());
  let app = Router::new()
    .route(
      "/hook",
      post(|State(delivered): State<Arc<Notify>>| async move {
        delivered.notify_one();
        StatusCode::OK
      }),
    )
    .with_state(delivered.clone());
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

  let t = task(TaskStatus::Succeeded);
  store.put_task(&t).await.unwrap();
  subscribe(
    &store,
    Trigger::Success,
    Subscriber::Webhook(WebhookSubscriber {
      url:    format!("http://{addr}/hook"),
      secret: "s".into(),
    }),
  )
  .await;
  store.insert_event(finished(&t)).await.unwrap();

  let config = WorkerConfig {
    ui_url: "https://ci.example.com".into(),
    workers: 2,
    poll_interval_secs: 1,
    ..WorkerConfig::default()
  };
  let shutdown = {
    let delivered = delivered.clone();
    async move {
      let _ = tokio::time::timeout(Duration::from_secs(10), delivered.notified()).await;
    }
  };
  tidings_worker::run(store.clone(), &config, shutdown)
    .await
    .unwrap();

  let stats = collect_stats(store.as_ref()).await.unwrap();
  assert_eq!(stats.unprocessed_events, 0);
  assert_eq!(stats.pending_total(), 0);
  assert!(store.unsent_notification_ids().await.unwrap().is_empty());
}
