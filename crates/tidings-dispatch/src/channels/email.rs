//! SMTP delivery through `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
  AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};
use tidings_core::{notification::Payload, subscription::SubscriberKind};

use crate::{
  Error, Result,
  registry::{Message, Sender},
  settings::SmtpSettings,
};

pub struct EmailSender {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from:      Mailbox,
  to:        Mailbox,
}

impl EmailSender {
  pub fn new(
    settings: Option<&SmtpSettings>,
    address: &str,
    timeout: Duration,
  ) -> Result<Self> {
    let settings =
      settings.ok_or(Error::Configuration("email smtp settings are empty"))?;

    let from = settings.from.parse::<Mailbox>().map_err(Error::smtp)?;
    let to = address
      .parse::<Mailbox>()
      .map_err(|e| Error::InvalidTarget {
        kind:   SubscriberKind::Email,
        reason: e.to_string(),
      })?;

    let builder = if settings.use_tls {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
        .map_err(Error::smtp)?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
        settings.server.as_str(),
      )
    };
    let mut builder = builder.port(settings.port).timeout(Some(timeout));
    if let (Some(user), Some(password)) = (&settings.username, &settings.password)
    {
      builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
    }

    Ok(Self {
      transport: builder.build(),
      from,
      to,
    })
  }
}

#[async_trait]
impl Sender for EmailSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::Email(payload) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::Email));
    };

    let email = lettre::Message::builder()
      .from(self.from.clone())
      .to(self.to.clone())
      .subject(payload.subject.as_str())
      .header(ContentType::TEXT_HTML)
      .body(payload.body.clone())
      .map_err(Error::smtp)?;

    self.transport.send(email).await.map_err(Error::smtp)?;
    Ok(())
  }
}
