//! Channel adapters, one per delivery transport.

mod email;
mod github;
mod jira;
mod slack;
mod webhook;

pub use email::EmailSender;
pub use github::GithubStatusSender;
pub use jira::{JiraCommentSender, JiraIssueSender};
pub use slack::SlackSender;
pub use webhook::{NOTIFICATION_ID_HEADER, SIGNATURE_HEADER, WebhookSender, sign};

use reqwest::Response;

use crate::{Error, Result};

/// Any non-2xx answer from a third-party API is a delivery error.
async fn check_status(service: &'static str, response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  tracing::debug!(service, status = status.as_u16(), %body, "api call rejected");
  Err(Error::ApiStatus {
    service,
    status: status.as_u16(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_send<T: Send>(_: &T) {}

  #[tokio::test]
  async fn rejected_status_is_an_api_error() {
    let response = axum::http::Response::builder()
      .status(503)
      .body("busy")
      .unwrap();
    let checked = check_status("slack", Response::from(response));
    assert_send(&checked);
    assert!(matches!(
      checked.await,
      Err(Error::ApiStatus {
        service: "slack",
        status:  503,
      })
    ));
  }

  #[tokio::test]
  async fn success_passes_the_response_through() {
    let response = axum::http::Response::builder()
      .status(201)
      .body("{}")
      .unwrap();
    let checked = check_status("github", Response::from(response)).await.unwrap();
    assert_eq!(checked.status().as_u16(), 201);
  }
}
