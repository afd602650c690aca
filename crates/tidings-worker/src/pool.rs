//! Dispatch workers pulling from the local queue.

use std::sync::Arc;

use tidings_dispatch::Dispatcher;
use tokio::task::JoinHandle;

use crate::{WorkerStore, queue::LocalQueue};

pub struct WorkerPool {
  handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  /// Start `size` workers. They exit once the queue is closed and drained.
  pub fn spawn<S: WorkerStore>(
    size: usize,
    queue: Arc<LocalQueue>,
    dispatcher: Arc<Dispatcher<S>>,
  ) -> Self {
    let handles = (0..size.max(1))
      .map(|worker| {
        let queue = queue.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
          while let Some(id) = queue.next().await {
            match dispatcher.run(&id).await {
              Ok(()) => {}
              Err(e) if e.is_suppression() => {
                tracing::debug!(worker, notification_id = %id, "suppressed");
              }
              Err(error) => tracing::warn!(
                worker,
                notification_id = %id,
                %error,
                "dispatch failed"
              ),
            }
            queue.finish(&id);
          }
          tracing::debug!(worker, "worker stopped");
        })
      })
      .collect();
    Self { handles }
  }

  pub fn size(&self) -> usize { self.handles.len() }

  /// Wait for every worker to stop.
  pub async fn join(self) {
    for handle in self.handles {
      if let Err(e) = handle.await {
        tracing::error!(error = %e, "dispatch worker panicked");
      }
    }
  }
}
