//! Delivery backlog figures for operators.

use tidings_core::{
  notification::NotificationStats,
  store::{EventLog, NotificationStore},
};

use crate::{Error, Result};

pub async fn collect_stats<S>(store: &S) -> Result<NotificationStats>
where
  S: EventLog + NotificationStore,
{
  Ok(NotificationStats {
    unprocessed_events:            store
      .count_unprocessed_events()
      .await
      .map_err(Error::store)?,
    pending_notifications_by_type: store
      .unsent_notification_counts()
      .await
      .map_err(Error::store)?,
    last_processed_at:             store
      .last_processed_at()
      .await
      .map_err(Error::store)?,
  })
}

pub fn log_stats(stats: &NotificationStats) {
  tracing::info!(
    unprocessed_events = stats.unprocessed_events,
    pending_notifications = stats.pending_total(),
    pending_notifications_by_type = ?stats.pending_notifications_by_type,
    last_processed_at = ?stats.last_processed_at,
    "notification stats"
  );
}
