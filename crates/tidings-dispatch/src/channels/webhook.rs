//! Signed HTTP POST to a subscriber-owned endpoint.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, header::CONTENT_TYPE};
use sha2::Sha256;
use tidings_core::{
  notification::Payload,
  subscription::{SubscriberKind, WebhookSubscriber},
};
use url::Url;

use crate::{
  Error, Result,
  registry::{Message, Sender},
};

pub const NOTIFICATION_ID_HEADER: &str = "X-Evergreen-Notification-ID";
pub const SIGNATURE_HEADER: &str = "X-Evergreen-Signature";

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
  let mut mac = Hmac::<Sha256>::new_from_slice(secret)
    .map_err(|_| Error::Configuration("webhook secret is not a valid hmac key"))?;
  mac.update(body);
  Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub struct WebhookSender {
  client:  Client,
  url:     Url,
  secret:  Vec<u8>,
  timeout: Duration,
}

impl WebhookSender {
  pub fn new(
    client: Client,
    target: &WebhookSubscriber,
    timeout: Duration,
  ) -> Result<Self> {
    let invalid = |reason: String| Error::InvalidTarget {
      kind: SubscriberKind::Webhook,
      reason,
    };
    let url = Url::parse(&target.url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if target.secret.is_empty() {
      return Err(invalid("empty secret".to_string()));
    }

    Ok(Self {
      client,
      url,
      secret: target.secret.as_bytes().to_vec(),
      timeout,
    })
  }
}

#[async_trait]
impl Sender for WebhookSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::Webhook(payload) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::Webhook));
    };

    let mut request = self
      .client
      .post(self.url.clone())
      .timeout(self.timeout)
      .header(CONTENT_TYPE, "application/json")
      .header(NOTIFICATION_ID_HEADER, &message.notification_id)
      .header(SIGNATURE_HEADER, sign(&self.secret, payload.body.as_bytes())?);
    for (name, value) in &payload.headers {
      request = request.header(name, value);
    }

    // Wall-clock bound on the whole attempt.
    let response = tokio::time::timeout(
      self.timeout,
      request.body(payload.body.clone()).send(),
    )
    .await
    .map_err(|_| Error::Timeout(self.timeout))??;

    let status = response.status();
    if !status.is_success() {
      return Err(Error::WebhookStatus(status.as_u16()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signature_format() {
    let sig = sign(b"secret", b"{}").unwrap();
    assert!(sig.starts_with("sha256="));
    assert_eq!(sig.len(), "sha256=".len() + 64);
    assert_ne!(sig, sign(b"other", b"{}").unwrap());
  }

  #[test]
  fn rejects_non_http_urls() {
    let target = WebhookSubscriber {
      url:    "ftp://example.com/hook".into(),
      secret: "s".into(),
    };
    let result = WebhookSender::new(Client::new(), &target, Duration::from_secs(5));
    assert!(matches!(result, Err(Error::InvalidTarget { .. })));
  }
}
