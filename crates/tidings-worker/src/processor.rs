//! Event processor: unprocessed events in, queued notifications out.

use std::sync::Arc;

use chrono::Utc;
use tidings_core::{
  event::Event,
  store::{EventLog, JobQueue, NotificationStore},
};
use tidings_trigger::TriggerEngine;

use crate::{Error, Result, WorkerStore};

/// Tally for one pass over the event log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
  pub fetched:       usize,
  pub processed:     usize,
  pub failed:        usize,
  /// Events that can never evaluate; marked processed without notifications.
  pub skipped:       usize,
  pub notifications: usize,
}

pub struct EventProcessor<S, Q> {
  store:  Arc<S>,
  engine: TriggerEngine<S>,
  queue:  Arc<Q>,
}

impl<S, Q> EventProcessor<S, Q>
where
  S: WorkerStore,
  Q: JobQueue<Error = Error>,
{
  pub fn new(store: Arc<S>, engine: TriggerEngine<S>, queue: Arc<Q>) -> Self {
    Self {
      store,
      engine,
      queue,
    }
  }

  /// Process up to `limit` events, oldest first. An event that fails on a
  /// store error stays unprocessed and is retried on the next pass; one that
  /// can never evaluate is logged and marked processed.
  pub async fn process_batch(&self, limit: usize) -> Result<BatchSummary> {
    let events = self
      .store
      .unprocessed_events(limit)
      .await
      .map_err(Error::store)?;

    let mut summary = BatchSummary {
      fetched: events.len(),
      ..BatchSummary::default()
    };
    for event in &events {
      match self.process_event(event).await {
        Ok(created) => {
          summary.processed += 1;
          summary.notifications += created;
        }
        Err(Error::Trigger(error)) if error.is_permanent() => {
          tracing::warn!(
            event_id = %event.event_id,
            resource_id = %event.resource_id,
            %error,
            "event cannot be evaluated, skipping"
          );
          self
            .store
            .mark_event_processed(event.event_id, Utc::now())
            .await
            .map_err(Error::store)?;
          summary.skipped += 1;
        }
        Err(error) => {
          summary.failed += 1;
          tracing::warn!(
            event_id = %event.event_id,
            resource_id = %event.resource_id,
            %error,
            "event processing failed"
          );
        }
      }
    }

    if summary.fetched > 0 {
      tracing::info!(
        fetched = summary.fetched,
        processed = summary.processed,
        failed = summary.failed,
        skipped = summary.skipped,
        notifications = summary.notifications,
        "processed event batch"
      );
    }
    Ok(summary)
  }

  /// Evaluate one event, persist its notifications and queue the new ones.
  /// Returns how many notifications were created.
  pub async fn process_event(&self, event: &Event) -> Result<usize> {
    let evaluation = self.engine.notifications_from_event(event).await?;

    let inserted = self
      .store
      .insert_notifications(evaluation.notifications)
      .await
      .map_err(Error::store)?;
    for id in &inserted {
      self.queue.enqueue(id.clone()).await?;
    }

    self
      .store
      .mark_event_processed(event.event_id, Utc::now())
      .await
      .map_err(Error::store)?;
    Ok(inserted.len())
  }
}
