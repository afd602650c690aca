//! In-process job queue for dispatch units.
//!
//! An id is owned by the queue from `enqueue` until the worker that took it
//! calls [`LocalQueue::finish`]. Enqueueing an id that is already owned is a
//! no-op, so two workers never run the same notification at once.

use std::{
  collections::HashSet,
  sync::{Mutex, MutexGuard, PoisonError},
};

use tidings_core::store::{JobQueue, NotificationStore};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::{Error, Result};

pub struct LocalQueue {
  tx:    Mutex<Option<mpsc::UnboundedSender<String>>>,
  rx:    AsyncMutex<mpsc::UnboundedReceiver<String>>,
  owned: Mutex<HashSet<String>>,
}

impl Default for LocalQueue {
  fn default() -> Self { Self::new() }
}

impl LocalQueue {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      tx:    Mutex::new(Some(tx)),
      rx:    AsyncMutex::new(rx),
      owned: Mutex::new(HashSet::new()),
    }
  }

  /// Next id to run, or `None` once the queue is closed and drained.
  pub async fn next(&self) -> Option<String> { self.rx.lock().await.recv().await }

  /// Release an id taken with [`next`](Self::next).
  pub fn finish(&self, notification_id: &str) {
    self.owned().remove(notification_id);
  }

  /// Stop accepting work. Already queued ids are still handed out.
  pub fn close(&self) {
    lock(&self.tx).take();
  }

  /// Ids queued or running.
  pub fn len(&self) -> usize { self.owned().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  fn owned(&self) -> MutexGuard<'_, HashSet<String>> { lock(&self.owned) }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobQueue for LocalQueue {
  type Error = Error;

  async fn enqueue(&self, notification_id: String) -> Result<()> {
    let tx = lock(&self.tx);
    let Some(tx) = tx.as_ref() else {
      return Err(Error::QueueClosed);
    };
    if !self.owned().insert(notification_id.clone()) {
      tracing::debug!(notification_id, "already queued");
      return Ok(());
    }
    tx.send(notification_id).map_err(|_| Error::QueueClosed)
  }
}

/// Queue every notification that has not concluded. Run once at start-up so
/// work interrupted by a crash is attempted again.
pub async fn requeue_unsent<S, Q>(store: &S, queue: &Q) -> Result<usize>
where
  S: NotificationStore,
  Q: JobQueue<Error = Error>,
{
  let ids = store.unsent_notification_ids().await.map_err(Error::store)?;
  let count = ids.len();
  for id in ids {
    queue.enqueue(id).await?;
  }
  if count > 0 {
    tracing::info!(count, "requeued unsent notifications");
  }
  Ok(count)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn duplicate_ids_are_owned_once() {
    let queue = LocalQueue::new();
    queue.enqueue("a".into()).await.unwrap();
    queue.enqueue("a".into()).await.unwrap();
    queue.enqueue("b".into()).await.unwrap();
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.next().await.as_deref(), Some("a"));
    // Still running: a redelivery is ignored.
    queue.enqueue("a".into()).await.unwrap();
    queue.finish("a");
    assert_eq!(queue.next().await.as_deref(), Some("b"));
    queue.finish("b");
    assert!(queue.is_empty());

    // Once finished, the id can be queued again.
    queue.enqueue("a".into()).await.unwrap();
    assert_eq!(queue.next().await.as_deref(), Some("a"));
  }

  #[tokio::test]
  async fn close_drains_then_ends() {
    let queue = LocalQueue::new();
    queue.enqueue("a".into()).await.unwrap();
    queue.close();

    assert!(matches!(
      queue.enqueue("b".into()).await,
      Err(Error::QueueClosed)
    ));
    assert_eq!(queue.next().await.as_deref(), Some("a"));
    assert_eq!(queue.next().await, None);
  }
}
