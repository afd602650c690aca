//! Error type for `tidings-dispatch`.

use std::time::Duration;

use thiserror::Error;
use tidings_core::{flags::Channel, subscription::SubscriberKind};

#[derive(Debug, Error)]
pub enum Error {
  // ── Preconditions ─────────────────────────────────────────────────────────
  #[error("notification id is empty")]
  EmptyNotificationId,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("notification {0:?} not found")]
  NotificationNotFound(String),

  // ── Suppression ───────────────────────────────────────────────────────────
  #[error("sender is disabled, not sending notification")]
  ChannelDisabled(Channel),

  // ── Configuration ─────────────────────────────────────────────────────────
  #[error("no sender registered for subscriber type {0}")]
  UnregisteredSender(SubscriberKind),

  #[error("payload does not match subscriber type {0}")]
  MismatchedPayload(SubscriberKind),

  #[error("invalid {kind} target: {reason}")]
  InvalidTarget {
    kind:   SubscriberKind,
    reason: String,
  },

  #[error("{0}")]
  Configuration(&'static str),

  #[error(transparent)]
  Core(#[from] tidings_core::Error),

  // ── Delivery ──────────────────────────────────────────────────────────────
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("webhook response status was {0}")]
  WebhookStatus(u16),

  #[error("{service} response status was {status}")]
  ApiStatus {
    service: &'static str,
    status:  u16,
  },

  #[error("{service} rejected the message: {reason}")]
  Rejected {
    service: &'static str,
    reason:  String,
  },

  #[error("smtp: {0}")]
  Smtp(String),

  #[error("delivery timed out after {0:?}")]
  Timeout(Duration),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub(crate) fn smtp(e: impl std::fmt::Display) -> Self {
    Self::Smtp(e.to_string())
  }

  /// Whether this is the degraded-mode suppression signal rather than a
  /// failure.
  pub fn is_suppression(&self) -> bool {
    matches!(self, Self::ChannelDisabled(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
