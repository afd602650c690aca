//! The trigger engine: turns one domain event into the notifications its
//! matching subscriptions ask for.
//!
//! [`TriggerEngine::notifications_from_event`] looks up subscriptions by the
//! event's resource attributes, runs the predicate named by each
//! subscription's trigger, and renders a channel-specific payload for every
//! trigger that fires. Suppression state lives in the alert store; every
//! other step is a pure function of the event and resource history.

mod engine;
mod payload;
mod task;

pub mod error;

pub use engine::{EngineConfig, Evaluation, SubscriptionFailure, TriggerEngine};
pub use error::{Error, Result};
pub use payload::NO_TESTS_MARKER;
