//! Error type for `tidings-trigger`.

use thiserror::Error;
use tidings_core::{event::ResourceType, subscription::Trigger};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] tidings_core::Error),

  #[error("{resource_type} {id:?} not found")]
  ResourceNotFound {
    resource_type: ResourceType,
    id:            String,
  },

  #[error(
    "subscription {subscription_id}: trigger {trigger} does not apply to \
     {resource_type} events"
  )]
  UnsupportedTrigger {
    subscription_id: Uuid,
    trigger:         Trigger,
    resource_type:   ResourceType,
  },

  #[error("trigger {trigger} requires trigger data {key:?}")]
  MissingTriggerData {
    trigger: Trigger,
    key:     &'static str,
  },

  #[error("rendering payload: {0}")]
  Render(String),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  /// Whether evaluating the same event again would fail the same way: the
  /// resource is gone, a subscription is misconfigured, or stored data does
  /// not decode. Other store failures are worth retrying.
  pub fn is_permanent(&self) -> bool {
    match self {
      Self::ResourceNotFound { .. }
      | Self::UnsupportedTrigger { .. }
      | Self::MissingTriggerData { .. }
      | Self::Render(_)
      | Self::Core(_) => true,
      Self::Store(e) => {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(e.as_ref());
        while let Some(err) = cause {
          if err.is::<tidings_core::Error>() {
            return true;
          }
          cause = err.source();
        }
        false
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn undecodable_subscriptions_are_permanent() {
    let decode = tidings_store_sqlite::Error::Core(
      tidings_core::Error::UnknownTrigger("sometimes".into()),
    );
    assert!(Error::store(decode).is_permanent());
  }

  #[test]
  fn io_failures_are_retried() {
    let io = std::io::Error::other("disk gone");
    assert!(!Error::store(io).is_permanent());
    let missing = Error::ResourceNotFound {
      resource_type: ResourceType::Task,
      id:            "t1".into(),
    };
    assert!(missing.is_permanent());
  }
}
