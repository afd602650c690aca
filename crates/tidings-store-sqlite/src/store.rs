//! [`SqliteStore`]: the SQLite implementation of every storage trait.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use tidings_core::{
  alert::AlertRecord,
  event::{Event, ResourceType},
  flags::ServiceFlags,
  notification::Notification,
  resource::{
    Build, HistoryScope, MAINLINE_REQUESTERS, Task, TaskStatus, TestResult,
    Version,
  },
  store::{
    AlertStore, EventLog, FlagSource, NotificationStore, Store,
    SubscriptionStore, TaskHistory,
  },
  subscription::{Selector, Subscription, Trigger},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    ALERT_COLUMNS, EVENT_COLUMNS, NOTIFICATION_COLUMNS, RawAlert, RawBuild,
    RawEvent, RawNotification, RawSubscription, RawTask, RawVersion,
    SUBSCRIPTION_COLUMNS, TASK_COLUMNS, decode_test_result, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A notification store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Resource writes ───────────────────────────────────────────────────────
  //
  // Tasks, builds and versions belong to upstream state machines. These
  // writers exist so that those producers (and tests) can populate the read
  // models this store answers history queries from.

  /// Insert or replace one task execution.
  pub async fn put_task(&self, task: &Task) -> Result<()> {
    let raw = RawTask::encode(task);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT OR REPLACE INTO tasks ({TASK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          rusqlite::params![
            raw.task_id,
            raw.execution,
            raw.display_name,
            raw.project,
            raw.version,
            raw.build_id,
            raw.build_variant,
            raw.requester,
            raw.status,
            raw.start_time,
            raw.finish_time,
            raw.revision_order,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn add_test_result(&self, result: &TestResult) -> Result<()> {
    let task_id   = result.task_id.clone();
    let execution = result.execution;
    let test_file = result.test_file.clone();
    let status    = result.status.to_string();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO test_results (task_id, execution, test_file, status)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![task_id, execution, test_file, status],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn put_build(&self, build: &Build) -> Result<()> {
    let b = build.clone();
    let status = b.status.to_string();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO builds (
             build_id, version, project, build_variant, display_name,
             requester, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            b.build_id,
            b.version,
            b.project,
            b.build_variant,
            b.display_name,
            b.requester,
            status,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn put_version(&self, version: &Version) -> Result<()> {
    let v = version.clone();
    let status = v.status.to_string();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO versions (
             version_id, project, revision, author, requester, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            v.version_id,
            v.project,
            v.revision,
            v.author,
            v.requester,
            status,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Latest execution of the newest mainline task in `scope` below
  /// `before_revision` whose status is one of `statuses`.
  async fn history_query(
    &self,
    scope: &HistoryScope,
    before_revision: i64,
    statuses: &[TaskStatus],
  ) -> Result<Option<Task>> {
    let project       = scope.project.clone();
    let build_variant = scope.build_variant.clone();
    let display_name  = scope.display_name.clone();
    let statuses      = quoted_list(statuses.iter().map(AsRef::<str>::as_ref));
    let requesters    = quoted_list(MAINLINE_REQUESTERS.iter().copied());

    let raw: Option<RawTask> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {TASK_COLUMNS} FROM tasks t
           WHERE t.project = ?1
             AND t.build_variant = ?2
             AND t.display_name = ?3
             AND t.revision_order < ?4
             AND t.requester IN ({requesters})
             AND t.status IN ({statuses})
             AND t.execution = (
               SELECT MAX(execution) FROM tasks WHERE task_id = t.task_id
             )
           ORDER BY t.revision_order DESC
           LIMIT 1"
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![
                project,
                build_variant,
                display_name,
                before_revision
              ],
              RawTask::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTask::into_task).transpose()
  }
}

/// `'a', 'b'` for an `IN (...)` clause. Only ever fed compile-time wire
/// names, never user input.
fn quoted_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
  items.map(|s| format!("'{s}'")).collect::<Vec<_>>().join(", ")
}

impl Store for SqliteStore {
  type Error = Error;
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

impl SubscriptionStore for SqliteStore {
  async fn upsert_subscription(&self, subscription: Subscription) -> Result<()> {
    let raw = RawSubscription::encode(&subscription)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT OR REPLACE INTO subscriptions ({SUBSCRIPTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
          ),
          rusqlite::params![
            raw.subscription_id,
            raw.resource_type,
            raw.trigger_name,
            raw.selectors,
            raw.subscriber_type,
            raw.subscriber_target,
            raw.owner,
            raw.trigger_data,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_subscriptions(
    &self,
    resource_type: ResourceType,
    attributes: &[Selector],
  ) -> Result<Vec<Subscription>> {
    let resource_str = resource_type.to_string();

    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
           WHERE resource_type = ?1
           ORDER BY subscription_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![resource_str], RawSubscription::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut matched = Vec::new();
    for raw in raws {
      let subscription = raw.into_subscription()?;
      if subscription.matches(attributes) {
        matched.push(subscription);
      }
    }
    Ok(matched)
  }

  async fn list_subscriptions(
    &self,
    owner: Option<String>,
  ) -> Result<Vec<Subscription>> {
    let raws: Vec<RawSubscription> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(o) = owner {
          let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE owner = ?1 ORDER BY resource_type, trigger_name"
          ))?;
          stmt
            .query_map(rusqlite::params![o], RawSubscription::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             ORDER BY owner, resource_type, trigger_name"
          ))?;
          stmt
            .query_map([], RawSubscription::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawSubscription::into_subscription)
      .collect()
  }
}

// ─── Alert history ───────────────────────────────────────────────────────────

impl AlertStore for SqliteStore {
  async fn insert_alert(&self, record: AlertRecord) -> Result<bool> {
    let raw = RawAlert::encode(&record)?;

    let inserted = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          &format!(
            "INSERT INTO alert_records ({ALERT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(dedup_key) DO NOTHING"
          ),
          rusqlite::params![
            raw.alert_id,
            raw.dedup_key,
            raw.subscription_id,
            raw.trigger_name,
            raw.task_id,
            raw.execution,
            raw.project,
            raw.build_variant,
            raw.display_name,
            raw.revision_order,
            raw.task_status,
            raw.failing_tests,
            raw.alerted_at,
          ],
        )?;
        Ok(changed == 1)
      })
      .await?;

    if !inserted {
      tracing::debug!(dedup_key = %record.dedup_key, "alert already recorded");
    }
    Ok(inserted)
  }

  async fn last_alert(
    &self,
    subscription_id: Uuid,
    trigger: Trigger,
    scope: &HistoryScope,
    max_revision: i64,
  ) -> Result<Option<AlertRecord>> {
    let sub_str       = encode_uuid(subscription_id);
    let trigger_str   = trigger.to_string();
    let project       = scope.project.clone();
    let build_variant = scope.build_variant.clone();
    let display_name  = scope.display_name.clone();

    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ALERT_COLUMNS} FROM alert_records
                 WHERE subscription_id = ?1
                   AND trigger_name = ?2
                   AND project = ?3
                   AND build_variant = ?4
                   AND display_name = ?5
                   AND revision_order <= ?6
                 ORDER BY revision_order DESC, seq DESC
                 LIMIT 1"
              ),
              rusqlite::params![
                sub_str,
                trigger_str,
                project,
                build_variant,
                display_name,
                max_revision,
              ],
              RawAlert::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }
}

// ─── Resource history ────────────────────────────────────────────────────────

impl TaskHistory for SqliteStore {
  async fn get_task(
    &self,
    task_id: &str,
    execution: Option<u32>,
  ) -> Result<Option<Task>> {
    let id = task_id.to_owned();

    let raw: Option<RawTask> = self
      .conn
      .call(move |conn| {
        let raw = match execution {
          Some(exec) => conn
            .query_row(
              &format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE task_id = ?1 AND execution = ?2"
              ),
              rusqlite::params![id, exec],
              RawTask::from_row,
            )
            .optional()?,
          None => conn
            .query_row(
              &format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE task_id = ?1
                 ORDER BY execution DESC LIMIT 1"
              ),
              rusqlite::params![id],
              RawTask::from_row,
            )
            .optional()?,
        };
        Ok(raw)
      })
      .await?;

    raw.map(RawTask::into_task).transpose()
  }

  async fn previous_completed_task(
    &self,
    scope: &HistoryScope,
    before_revision: i64,
  ) -> Result<Option<Task>> {
    self
      .history_query(scope, before_revision, &[
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::SystemFailed,
        TaskStatus::TestTimedOut,
      ])
      .await
  }

  async fn last_successful_task(
    &self,
    scope: &HistoryScope,
    before_revision: i64,
  ) -> Result<Option<Task>> {
    self
      .history_query(scope, before_revision, &[TaskStatus::Succeeded])
      .await
  }

  async fn test_results(
    &self,
    task_id: &str,
    execution: u32,
  ) -> Result<Vec<TestResult>> {
    let id = task_id.to_owned();

    let rows: Vec<(String, u32, String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT task_id, execution, test_file, status FROM test_results
           WHERE task_id = ?1 AND execution = ?2
           ORDER BY seq",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id, execution], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(task_id, execution, test_file, status)| {
        decode_test_result(task_id, execution, test_file, &status)
      })
      .collect()
  }

  async fn get_build(&self, build_id: &str) -> Result<Option<Build>> {
    let id = build_id.to_owned();

    let raw: Option<RawBuild> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT build_id, version, project, build_variant, display_name,
                      requester, status
               FROM builds WHERE build_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawBuild {
                  build_id:      row.get(0)?,
                  version:       row.get(1)?,
                  project:       row.get(2)?,
                  build_variant: row.get(3)?,
                  display_name:  row.get(4)?,
                  requester:     row.get(5)?,
                  status:        row.get(6)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawBuild::into_build).transpose()
  }

  async fn get_version(&self, version_id: &str) -> Result<Option<Version>> {
    let id = version_id.to_owned();

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT version_id, project, revision, author, requester, status
               FROM versions WHERE version_id = ?1",
              rusqlite::params![id],
              |row| {
                Ok(RawVersion {
                  version_id: row.get(0)?,
                  project:    row.get(1)?,
                  revision:   row.get(2)?,
                  author:     row.get(3)?,
                  requester:  row.get(4)?,
                  status:     row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

impl NotificationStore for SqliteStore {
  async fn insert_notifications(
    &self,
    notifications: Vec<Notification>,
  ) -> Result<Vec<String>> {
    let raws = notifications
      .iter()
      .map(RawNotification::encode)
      .collect::<Result<Vec<_>>>()?;

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(raws.len());
        {
          let mut stmt = tx.prepare(&format!(
            "INSERT OR IGNORE INTO notifications ({NOTIFICATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
          ))?;
          for raw in raws {
            let changed = stmt.execute(rusqlite::params![
              raw.notification_id,
              raw.event_id,
              raw.subscription_id,
              raw.subscriber_type,
              raw.subscriber_target,
              raw.payload,
              raw.created_at,
              raw.sent_at,
              raw.error,
            ])?;
            if changed == 1 {
              inserted.push(raw.notification_id);
            }
          }
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await?;

    Ok(inserted)
  }

  async fn get_notification(
    &self,
    notification_id: &str,
  ) -> Result<Option<Notification>> {
    let id = notification_id.to_owned();

    let raw: Option<RawNotification> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE notification_id = ?1"
              ),
              rusqlite::params![id],
              RawNotification::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawNotification::into_notification).transpose()
  }

  async fn complete_notification(
    &self,
    notification_id: &str,
    sent_at: DateTime<Utc>,
    error: Option<String>,
  ) -> Result<()> {
    let id      = notification_id.to_owned();
    let sent_at = encode_dt(sent_at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications
           SET sent_at = ?2, error = COALESCE(?3, error)
           WHERE notification_id = ?1",
          rusqlite::params![id, sent_at, error],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotificationNotFound(notification_id.to_owned()));
    }
    Ok(())
  }

  async fn record_notification_error(
    &self,
    notification_id: &str,
    error: String,
  ) -> Result<()> {
    let id = notification_id.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications SET error = ?2 WHERE notification_id = ?1",
          rusqlite::params![id, error],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotificationNotFound(notification_id.to_owned()));
    }
    Ok(())
  }

  async fn unsent_notification_ids(&self) -> Result<Vec<String>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT notification_id FROM notifications
           WHERE sent_at IS NULL
           ORDER BY created_at, notification_id",
        )?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(ids)
  }

  async fn unsent_notification_counts(&self) -> Result<BTreeMap<String, u64>> {
    let rows: Vec<(String, i64)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT subscriber_type, COUNT(*) FROM notifications
           WHERE sent_at IS NULL
           GROUP BY subscriber_type",
        )?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(kind, count)| (kind, count.max(0) as u64))
        .collect(),
    )
  }
}

// ─── Event log ───────────────────────────────────────────────────────────────

impl EventLog for SqliteStore {
  async fn insert_event(&self, event: Event) -> Result<()> {
    let event_id      = encode_uuid(event.event_id);
    let event_type    = event.event_type.to_string();
    let resource_type = event.resource_type().to_string();
    let resource_id   = event.resource_id.clone();
    let timestamp     = encode_dt(event.timestamp);
    let data          = serde_json::to_string(&event.data)?;
    let processed_at  = event.processed_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO events (
             event_id, event_type, resource_type, resource_id, timestamp,
             data, processed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            event_id,
            event_type,
            resource_type,
            resource_id,
            timestamp,
            data,
            processed_at,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn unprocessed_events(&self, limit: usize) -> Result<Vec<Event>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM events
           WHERE processed_at IS NULL
           ORDER BY timestamp, seq
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![limit], RawEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn mark_event_processed(
    &self,
    event_id: Uuid,
    processed_at: DateTime<Utc>,
  ) -> Result<()> {
    let id = encode_uuid(event_id);
    let at = encode_dt(processed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE events SET processed_at = ?2 WHERE event_id = ?1",
          rusqlite::params![id, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn count_unprocessed_events(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM events WHERE processed_at IS NULL",
          [],
          |row| row.get(0),
        )?)
      })
      .await?;
    Ok(count.max(0) as u64)
  }

  async fn last_processed_at(&self) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT MAX(processed_at) FROM events",
          [],
          |row| row.get(0),
        )?)
      })
      .await?;

    raw.as_deref().map(crate::encode::decode_dt).transpose()
  }
}

// ─── Service flags ───────────────────────────────────────────────────────────

impl FlagSource for SqliteStore {
  async fn service_flags(&self) -> Result<ServiceFlags> {
    let raw: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row("SELECT flags FROM service_flags WHERE id = 1", [], |row| {
              row.get(0)
            })
            .optional()?,
        )
      })
      .await?;

    match raw {
      Some(json) => Ok(serde_json::from_str(&json)?),
      None => Ok(ServiceFlags::default()),
    }
  }

  async fn set_service_flags(&self, flags: ServiceFlags) -> Result<()> {
    let json = serde_json::to_string(&flags)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO service_flags (id, flags) VALUES (1, ?1)
           ON CONFLICT(id) DO UPDATE SET flags = excluded.flags",
          rusqlite::params![json],
        )?;
        Ok(())
      })
      .await?;

    tracing::info!(?flags, "service flags updated");
    Ok(())
  }
}
