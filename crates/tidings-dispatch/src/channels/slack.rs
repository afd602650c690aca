//! Slack `chat.postMessage`.
//!
//! Slack answers most failures with HTTP 200 and `"ok": false`. Those are
//! reported through the error handler; the attempt itself still concludes.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tidings_core::{notification::Payload, subscription::SubscriberKind};

use super::check_status;
use crate::{
  Error, Result,
  registry::{ErrorHandler, Message, Sender, report},
  settings::SlackSettings,
};

#[derive(Deserialize)]
struct SlackReply {
  ok:    bool,
  #[serde(default)]
  error: Option<String>,
}

pub struct SlackSender {
  client:   Client,
  settings: SlackSettings,
  channel:  String,
  on_error: Option<Arc<dyn ErrorHandler>>,
}

impl SlackSender {
  pub fn new(
    client: Client,
    settings: Option<&SlackSettings>,
    channel: &str,
  ) -> Result<Self> {
    let settings =
      settings.ok_or(Error::Configuration("slack settings are empty"))?;
    if channel.is_empty() {
      return Err(Error::InvalidTarget {
        kind:   SubscriberKind::Slack,
        reason: "empty channel".to_string(),
      });
    }
    Ok(Self {
      client,
      settings: settings.clone(),
      channel: channel.to_string(),
      on_error: None,
    })
  }
}

#[async_trait]
impl Sender for SlackSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::Slack(payload) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::Slack));
    };

    let url = format!(
      "{}/chat.postMessage",
      self.settings.api_url.trim_end_matches('/')
    );
    let response = self
      .client
      .post(url)
      .bearer_auth(&self.settings.token)
      .json(&json!({
        "channel":     self.channel,
        "text":        payload.body,
        "attachments": payload.attachments,
      }))
      .send()
      .await?;
    let reply: SlackReply = check_status("slack", response).await?.json().await?;

    if !reply.ok {
      let reason = reply.error.unwrap_or_else(|| "unknown error".to_string());
      report(self.on_error.as_ref(), &message.notification_id, Error::Rejected {
        service: "slack",
        reason,
      })
      .await;
    }
    Ok(())
  }

  fn set_error_handler(&mut self, handler: Arc<dyn ErrorHandler>) {
    self.on_error = Some(handler);
  }
}
