//! Error types for `tidings-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown subscriber type: {0:?}")]
  UnknownSubscriberType(String),

  #[error("invalid {kind} subscriber target: {reason}")]
  InvalidTarget { kind: &'static str, reason: String },

  #[error("unknown trigger: {0:?}")]
  UnknownTrigger(String),

  #[error("trigger data {key:?} is not a number: {value:?}")]
  InvalidTriggerData { key: &'static str, value: String },

  #[error("unknown {kind} value: {value:?}")]
  UnknownValue { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
