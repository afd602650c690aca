//! GitHub commit statuses.

use async_trait::async_trait;
use reqwest::{
  Client,
  header::{ACCEPT, USER_AGENT},
};
use tidings_core::{
  notification::Payload,
  subscription::{GithubPullRequestSubscriber, SubscriberKind},
};

use super::check_status;
use crate::{
  Error, Result,
  registry::{Message, Sender},
  settings::GithubSettings,
};

pub struct GithubStatusSender {
  client:   Client,
  settings: GithubSettings,
  target:   GithubPullRequestSubscriber,
}

impl GithubStatusSender {
  pub fn new(
    client: Client,
    settings: Option<&GithubSettings>,
    target: &GithubPullRequestSubscriber,
  ) -> Result<Self> {
    let settings =
      settings.ok_or(Error::Configuration("github settings are empty"))?;
    if target.owner.is_empty() || target.repo.is_empty() || target.git_ref.is_empty()
    {
      return Err(Error::InvalidTarget {
        kind:   SubscriberKind::GithubPullRequest,
        reason: "owner, repo and ref are required".to_string(),
      });
    }
    Ok(Self {
      client,
      settings: settings.clone(),
      target: target.clone(),
    })
  }

  fn url(&self) -> String {
    format!(
      "{}/repos/{}/{}/statuses/{}",
      self.settings.api_url.trim_end_matches('/'),
      self.target.owner,
      self.target.repo,
      self.target.git_ref
    )
  }
}

#[async_trait]
impl Sender for GithubStatusSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::GithubStatus(status) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::GithubPullRequest));
    };
    let response = self
      .client
      .post(self.url())
      .bearer_auth(&self.settings.token)
      .header(USER_AGENT, "tidings")
      .header(ACCEPT, "application/vnd.github+json")
      .json(status)
      .send()
      .await?;
    check_status("github", response).await?;
    Ok(())
  }
}
