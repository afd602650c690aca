//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed microsecond
//! precision and a `Z` suffix, so lexical order equals chronological order.
//! Enums are stored by their wire names. Structured fields (selectors,
//! subscriber targets, payloads, event data) are stored as compact JSON.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use tidings_core::{
  alert::AlertRecord,
  event::{Event, EventData, EventType},
  notification::{Notification, Payload},
  resource::{
    Build, BuildStatus, HistoryScope, Task, TaskStatus, TestResult, TestStatus,
    Version,
  },
  subscription::{Selector, Subscriber, Subscription, Trigger},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Parse a stored enum by its wire name.
pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| {
    Error::Core(tidings_core::Error::UnknownValue {
      kind,
      value: s.to_string(),
    })
  })
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

pub const SUBSCRIPTION_COLUMNS: &str = "subscription_id, resource_type, \
                                        trigger_name, selectors, \
                                        subscriber_type, subscriber_target, \
                                        owner, trigger_data";

pub struct RawSubscription {
  pub subscription_id:   String,
  pub resource_type:     String,
  pub trigger_name:      String,
  pub selectors:         String,
  pub subscriber_type:   String,
  pub subscriber_target: String,
  pub owner:             String,
  pub trigger_data:      String,
}

impl RawSubscription {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subscription_id:   row.get(0)?,
      resource_type:     row.get(1)?,
      trigger_name:      row.get(2)?,
      selectors:         row.get(3)?,
      subscriber_type:   row.get(4)?,
      subscriber_target: row.get(5)?,
      owner:             row.get(6)?,
      trigger_data:      row.get(7)?,
    })
  }

  pub fn encode(s: &Subscription) -> Result<Self> {
    Ok(Self {
      subscription_id:   encode_uuid(s.subscription_id),
      resource_type:     s.resource_type.to_string(),
      trigger_name:      s.trigger.to_string(),
      selectors:         serde_json::to_string(&s.selectors)?,
      subscriber_type:   s.subscriber.kind().to_string(),
      subscriber_target: s.subscriber.target_json().to_string(),
      owner:             s.owner.clone(),
      trigger_data:      serde_json::to_string(&s.trigger_data)?,
    })
  }

  pub fn into_subscription(self) -> Result<Subscription> {
    let target: serde_json::Value =
      serde_json::from_str(&self.subscriber_target)?;
    let selectors: Vec<Selector> = serde_json::from_str(&self.selectors)?;
    let trigger_data: BTreeMap<String, String> =
      serde_json::from_str(&self.trigger_data)?;

    Ok(Subscription {
      subscription_id: decode_uuid(&self.subscription_id)?,
      resource_type: decode_enum("resource type", &self.resource_type)?,
      trigger: Trigger::parse(&self.trigger_name)?,
      selectors,
      subscriber: Subscriber::from_parts(&self.subscriber_type, target)?,
      owner: self.owner,
      trigger_data,
    })
  }
}

// ─── Alert records ───────────────────────────────────────────────────────────

pub const ALERT_COLUMNS: &str = "alert_id, dedup_key, subscription_id, \
                                 trigger_name, task_id, execution, project, \
                                 build_variant, display_name, revision_order, \
                                 task_status, failing_tests, alerted_at";

pub struct RawAlert {
  pub alert_id:        String,
  pub dedup_key:       String,
  pub subscription_id: String,
  pub trigger_name:    String,
  pub task_id:         Option<String>,
  pub execution:       Option<u32>,
  pub project:         Option<String>,
  pub build_variant:   Option<String>,
  pub display_name:    Option<String>,
  pub revision_order:  Option<i64>,
  pub task_status:     Option<String>,
  pub failing_tests:   String,
  pub alerted_at:      String,
}

impl RawAlert {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      alert_id:        row.get(0)?,
      dedup_key:       row.get(1)?,
      subscription_id: row.get(2)?,
      trigger_name:    row.get(3)?,
      task_id:         row.get(4)?,
      execution:       row.get(5)?,
      project:         row.get(6)?,
      build_variant:   row.get(7)?,
      display_name:    row.get(8)?,
      revision_order:  row.get(9)?,
      task_status:     row.get(10)?,
      failing_tests:   row.get(11)?,
      alerted_at:      row.get(12)?,
    })
  }

  pub fn encode(r: &AlertRecord) -> Result<Self> {
    let history = r.history.as_ref();
    Ok(Self {
      alert_id:        encode_uuid(r.alert_id),
      dedup_key:       r.dedup_key.clone(),
      subscription_id: encode_uuid(r.subscription_id),
      trigger_name:    r.trigger.to_string(),
      task_id:         r.task_id.clone(),
      execution:       r.execution,
      project:         history.map(|h| h.project.clone()),
      build_variant:   history.map(|h| h.build_variant.clone()),
      display_name:    history.map(|h| h.display_name.clone()),
      revision_order:  r.revision_order,
      task_status:     r.task_status.map(|s| s.to_string()),
      failing_tests:   serde_json::to_string(&r.failing_tests)?,
      alerted_at:      encode_dt(r.alerted_at),
    })
  }

  pub fn into_alert(self) -> Result<AlertRecord> {
    let history = match (self.project, self.build_variant, self.display_name) {
      (Some(project), Some(build_variant), Some(display_name)) => {
        Some(HistoryScope {
          project,
          build_variant,
          display_name,
        })
      }
      _ => None,
    };
    let task_status = self
      .task_status
      .as_deref()
      .map(|s| decode_enum::<TaskStatus>("task status", s))
      .transpose()?;

    Ok(AlertRecord {
      alert_id: decode_uuid(&self.alert_id)?,
      dedup_key: self.dedup_key,
      subscription_id: decode_uuid(&self.subscription_id)?,
      trigger: Trigger::parse(&self.trigger_name)?,
      task_id: self.task_id,
      execution: self.execution,
      history,
      revision_order: self.revision_order,
      task_status,
      failing_tests: serde_json::from_str(&self.failing_tests)?,
      alerted_at: decode_dt(&self.alerted_at)?,
    })
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

pub const NOTIFICATION_COLUMNS: &str = "notification_id, event_id, \
                                        subscription_id, subscriber_type, \
                                        subscriber_target, payload, \
                                        created_at, sent_at, error";

pub struct RawNotification {
  pub notification_id:   String,
  pub event_id:          String,
  pub subscription_id:   String,
  pub subscriber_type:   String,
  pub subscriber_target: String,
  pub payload:           String,
  pub created_at:        String,
  pub sent_at:           Option<String>,
  pub error:             Option<String>,
}

impl RawNotification {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      notification_id:   row.get(0)?,
      event_id:          row.get(1)?,
      subscription_id:   row.get(2)?,
      subscriber_type:   row.get(3)?,
      subscriber_target: row.get(4)?,
      payload:           row.get(5)?,
      created_at:        row.get(6)?,
      sent_at:           row.get(7)?,
      error:             row.get(8)?,
    })
  }

  pub fn encode(n: &Notification) -> Result<Self> {
    Ok(Self {
      notification_id:   n.notification_id.clone(),
      event_id:          encode_uuid(n.event_id),
      subscription_id:   encode_uuid(n.subscription_id),
      subscriber_type:   n.subscriber.kind().to_string(),
      subscriber_target: n.subscriber.target_json().to_string(),
      payload:           serde_json::to_string(&n.payload)?,
      created_at:        encode_dt(n.created_at),
      sent_at:           n.sent_at.map(encode_dt),
      error:             n.error.clone(),
    })
  }

  pub fn into_notification(self) -> Result<Notification> {
    let target: serde_json::Value =
      serde_json::from_str(&self.subscriber_target)?;
    let payload: Payload = serde_json::from_str(&self.payload)?;

    Ok(Notification {
      notification_id: self.notification_id,
      event_id: decode_uuid(&self.event_id)?,
      subscription_id: decode_uuid(&self.subscription_id)?,
      subscriber: Subscriber::from_parts(&self.subscriber_type, target)?,
      payload,
      created_at: decode_dt(&self.created_at)?,
      sent_at: decode_opt_dt(self.sent_at)?,
      error: self.error,
    })
  }
}

// ─── Events ──────────────────────────────────────────────────────────────────

pub const EVENT_COLUMNS: &str =
  "event_id, event_type, resource_id, timestamp, data, processed_at";

pub struct RawEvent {
  pub event_id:     String,
  pub event_type:   String,
  pub resource_id:  String,
  pub timestamp:    String,
  pub data:         String,
  pub processed_at: Option<String>,
}

impl RawEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:     row.get(0)?,
      event_type:   row.get(1)?,
      resource_id:  row.get(2)?,
      timestamp:    row.get(3)?,
      data:         row.get(4)?,
      processed_at: row.get(5)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    let data: EventData = serde_json::from_str(&self.data)?;
    Ok(Event {
      event_id: decode_uuid(&self.event_id)?,
      event_type: decode_enum::<EventType>("event type", &self.event_type)?,
      resource_id: self.resource_id,
      timestamp: decode_dt(&self.timestamp)?,
      data,
      processed_at: decode_opt_dt(self.processed_at)?,
    })
  }
}

// ─── Resources ───────────────────────────────────────────────────────────────

pub const TASK_COLUMNS: &str = "task_id, execution, display_name, project, \
                                version, build_id, build_variant, requester, \
                                status, start_time, finish_time, \
                                revision_order";

pub struct RawTask {
  pub task_id:        String,
  pub execution:      u32,
  pub display_name:   String,
  pub project:        String,
  pub version:        String,
  pub build_id:       String,
  pub build_variant:  String,
  pub requester:      String,
  pub status:         String,
  pub start_time:     Option<String>,
  pub finish_time:    Option<String>,
  pub revision_order: i64,
}

impl RawTask {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      task_id:        row.get(0)?,
      execution:      row.get(1)?,
      display_name:   row.get(2)?,
      project:        row.get(3)?,
      version:        row.get(4)?,
      build_id:       row.get(5)?,
      build_variant:  row.get(6)?,
      requester:      row.get(7)?,
      status:         row.get(8)?,
      start_time:     row.get(9)?,
      finish_time:    row.get(10)?,
      revision_order: row.get(11)?,
    })
  }

  pub fn encode(t: &Task) -> Self {
    Self {
      task_id:        t.task_id.clone(),
      execution:      t.execution,
      display_name:   t.display_name.clone(),
      project:        t.project.clone(),
      version:        t.version.clone(),
      build_id:       t.build_id.clone(),
      build_variant:  t.build_variant.clone(),
      requester:      t.requester.clone(),
      status:         t.status.to_string(),
      start_time:     t.start_time.map(encode_dt),
      finish_time:    t.finish_time.map(encode_dt),
      revision_order: t.revision_order,
    }
  }

  pub fn into_task(self) -> Result<Task> {
    Ok(Task {
      task_id:        self.task_id,
      execution:      self.execution,
      display_name:   self.display_name,
      project:        self.project,
      version:        self.version,
      build_id:       self.build_id,
      build_variant:  self.build_variant,
      requester:      self.requester,
      status:         decode_enum("task status", &self.status)?,
      start_time:     decode_opt_dt(self.start_time)?,
      finish_time:    decode_opt_dt(self.finish_time)?,
      revision_order: self.revision_order,
    })
  }
}

pub fn decode_test_result(
  task_id: String,
  execution: u32,
  test_file: String,
  status: &str,
) -> Result<TestResult> {
  Ok(TestResult {
    task_id,
    execution,
    test_file,
    status: decode_enum::<TestStatus>("test status", status)?,
  })
}

pub struct RawBuild {
  pub build_id:      String,
  pub version:       String,
  pub project:       String,
  pub build_variant: String,
  pub display_name:  String,
  pub requester:     String,
  pub status:        String,
}

impl RawBuild {
  pub fn into_build(self) -> Result<Build> {
    Ok(Build {
      build_id:      self.build_id,
      version:       self.version,
      project:       self.project,
      build_variant: self.build_variant,
      display_name:  self.display_name,
      requester:     self.requester,
      status:        decode_enum::<BuildStatus>("build status", &self.status)?,
    })
  }
}

pub struct RawVersion {
  pub version_id: String,
  pub project:    String,
  pub revision:   String,
  pub author:     String,
  pub requester:  String,
  pub status:     String,
}

impl RawVersion {
  pub fn into_version(self) -> Result<Version> {
    Ok(Version {
      version_id: self.version_id,
      project:    self.project,
      revision:   self.revision,
      author:     self.author,
      requester:  self.requester,
      status:     decode_enum::<BuildStatus>("version status", &self.status)?,
    })
  }
}
