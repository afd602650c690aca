//! Notification delivery.
//!
//! [`Dispatcher::run`] takes one notification id, consults the degraded-mode
//! gate, resolves a channel adapter from the [`SenderRegistry`] and records
//! the outcome of a single delivery attempt on the notification.

mod channels;
mod dispatcher;
mod gate;
mod registry;

pub mod error;
pub mod settings;

pub use channels::{
  EmailSender, GithubStatusSender, JiraCommentSender, JiraIssueSender,
  NOTIFICATION_ID_HEADER, SIGNATURE_HEADER, SlackSender, WebhookSender, sign,
};
pub use dispatcher::{Dispatcher, StoreErrorHandler};
pub use error::{Error, Result};
pub use gate::{DEGRADED_LOGGING_PERCENT, DegradedModeGate, check_flag};
pub use registry::{ErrorHandler, Message, Sender, SenderFactory, SenderRegistry};
pub use settings::{
  DispatchSettings, GithubSettings, JiraSettings, SlackSettings, SmtpSettings,
};
