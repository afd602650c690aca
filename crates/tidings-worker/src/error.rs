//! Error type for `tidings-worker`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Trigger(#[from] tidings_trigger::Error),

  #[error(transparent)]
  Dispatch(#[from] tidings_dispatch::Error),

  #[error("configuration: {0}")]
  Config(#[from] config::ConfigError),

  #[error("job queue is closed")]
  QueueClosed,
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
