//! Process wiring for the notification pipeline.
//!
//! [`run`] polls the event log through an [`EventProcessor`], hands new
//! notification ids to a [`LocalQueue`], and drains the queue with a
//! [`WorkerPool`] of dispatchers until the shutdown future resolves.

pub mod config;
pub mod error;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod stats;

pub use error::{Error, Result};

use std::{future::Future, sync::Arc};

use tidings_core::store::{
  AlertStore, EventLog, FlagSource, NotificationStore, SubscriptionStore,
  TaskHistory,
};
use tidings_dispatch::{Dispatcher, SenderRegistry};
use tidings_trigger::TriggerEngine;

use self::{
  config::WorkerConfig,
  pool::WorkerPool,
  processor::EventProcessor,
  queue::{LocalQueue, requeue_unsent},
  stats::{collect_stats, log_stats},
};

/// Everything the worker needs from storage.
pub trait WorkerStore:
  SubscriptionStore
  + AlertStore
  + TaskHistory
  + NotificationStore
  + EventLog
  + FlagSource
  + 'static
{
}

impl<T> WorkerStore for T where
  T: SubscriptionStore
    + AlertStore
    + TaskHistory
    + NotificationStore
    + EventLog
    + FlagSource
    + 'static
{
}

// ─── Run loop ────────────────────────────────────────────────────────────────

/// Run until `shutdown` resolves, then let in-flight dispatches finish.
pub async fn run<S, F>(
  store: Arc<S>,
  config: &WorkerConfig,
  shutdown: F,
) -> Result<()>
where
  S: WorkerStore,
  F: Future<Output = ()>,
{
  let queue = Arc::new(LocalQueue::new());
  let registry = SenderRegistry::with_channels(&config.dispatch)?;
  let dispatcher = Arc::new(Dispatcher::new(
    store.clone(),
    registry,
    config.dispatch.delivery_deadline(),
  ));
  let pool = WorkerPool::spawn(config.workers, queue.clone(), dispatcher);
  tracing::info!(workers = pool.size(), "dispatch workers started");

  requeue_unsent(store.as_ref(), queue.as_ref()).await?;

  let engine = TriggerEngine::new(store.clone(), config.engine_config());
  let processor = EventProcessor::new(store.clone(), engine, queue.clone());

  let mut poll = tokio::time::interval(config.poll_interval());
  let mut report = tokio::time::interval(config.stats_interval());
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      () = &mut shutdown => break,
      _ = poll.tick() => drain_events(&processor, config.event_batch_size).await,
      _ = report.tick() => match collect_stats(store.as_ref()).await {
        Ok(stats) => log_stats(&stats),
        Err(error) => tracing::warn!(%error, "failed to collect stats"),
      },
    }
  }

  tracing::info!(pending = queue.len(), "shutting down");
  queue.close();
  pool.join().await;
  Ok(())
}

/// Keep taking full batches until the log is caught up.
async fn drain_events<S: WorkerStore>(
  processor: &EventProcessor<S, LocalQueue>,
  batch_size: usize,
) {
  let batch_size = batch_size.max(1);
  loop {
    match processor.process_batch(batch_size).await {
      Ok(summary)
        if summary.fetched == batch_size
          && summary.processed + summary.skipped > 0 => {}
      Ok(_) => break,
      Err(error) => {
        tracing::warn!(%error, "failed to read the event log");
        break;
      }
    }
  }
}
