//! Degraded-mode gate: per-channel kill-switches read fresh from the store.

use std::sync::Arc;

use rand::Rng;
use tidings_core::{
  flags::{Channel, ServiceFlags},
  store::FlagSource,
};

use crate::{Error, Result};

/// Share of suppressed dispatches that emit a log line.
pub const DEGRADED_LOGGING_PERCENT: u32 = 10;

pub struct DegradedModeGate<F> {
  source: Arc<F>,
}

impl<F: FlagSource> DegradedModeGate<F> {
  pub fn new(source: Arc<F>) -> Self { Self { source } }

  /// Read the current flags. Nothing is cached between calls.
  pub async fn reload(&self) -> Result<ServiceFlags> {
    self.source.service_flags().await.map_err(Error::store)
  }
}

/// Suppression signal for a disabled channel.
pub fn check_flag(flags: &ServiceFlags, channel: Channel) -> Result<()> {
  if !flags.is_disabled(channel) {
    return Ok(());
  }
  if rand::thread_rng().gen_range(0..100) < DEGRADED_LOGGING_PERCENT {
    tracing::info!(%channel, "sender is disabled, not sending notification");
  }
  Err(Error::ChannelDisabled(channel))
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn enabled_channels_pass() {
    let flags = ServiceFlags::default();
    assert!(Channel::iter().all(|c| check_flag(&flags, c).is_ok()));
  }

  #[test]
  fn disabled_channel_is_suppressed() {
    let mut flags = ServiceFlags::default();
    flags.set(Channel::Email, true);

    let err = check_flag(&flags, Channel::Email).unwrap_err();
    assert!(err.is_suppression());
    assert!(err.to_string().contains("disabled"));
    assert!(check_flag(&flags, Channel::Slack).is_ok());
  }
}
