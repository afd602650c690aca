//! JIRA REST v2: comment on an existing issue, or file a new one.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tidings_core::{
  notification::Payload,
  subscription::{JiraIssueSubscriber, SubscriberKind},
};

use super::check_status;
use crate::{
  Error, Result,
  registry::{Message, Sender},
  settings::JiraSettings,
};

#[derive(Clone)]
struct JiraClient {
  client:   Client,
  settings: JiraSettings,
}

impl JiraClient {
  fn new(client: Client, settings: Option<&JiraSettings>) -> Result<Self> {
    let settings =
      settings.ok_or(Error::Configuration("jira settings are empty"))?;
    Ok(Self {
      client,
      settings: settings.clone(),
    })
  }

  async fn post(&self, path: &str, body: &Value) -> Result<()> {
    let url = format!(
      "{}/rest/api/2/{path}",
      self.settings.url.trim_end_matches('/')
    );
    let response = self
      .client
      .post(url)
      .basic_auth(&self.settings.username, Some(&self.settings.password))
      .json(body)
      .send()
      .await?;
    check_status("jira", response).await?;
    Ok(())
  }
}

// ─── Comment ─────────────────────────────────────────────────────────────────

pub struct JiraCommentSender {
  jira:  JiraClient,
  issue: String,
}

impl JiraCommentSender {
  pub fn new(
    client: Client,
    settings: Option<&JiraSettings>,
    issue: &str,
  ) -> Result<Self> {
    if issue.is_empty() {
      return Err(Error::InvalidTarget {
        kind:   SubscriberKind::JiraComment,
        reason: "empty issue key".to_string(),
      });
    }
    Ok(Self {
      jira:  JiraClient::new(client, settings)?,
      issue: issue.to_string(),
    })
  }
}

#[async_trait]
impl Sender for JiraCommentSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::JiraComment(text) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::JiraComment));
    };
    self
      .jira
      .post(&format!("issue/{}/comment", self.issue), &json!({ "body": text }))
      .await
  }
}

// ─── Issue ───────────────────────────────────────────────────────────────────

pub struct JiraIssueSender {
  jira:   JiraClient,
  target: JiraIssueSubscriber,
}

impl JiraIssueSender {
  pub fn new(
    client: Client,
    settings: Option<&JiraSettings>,
    target: &JiraIssueSubscriber,
  ) -> Result<Self> {
    if target.project.is_empty() {
      return Err(Error::InvalidTarget {
        kind:   SubscriberKind::JiraIssue,
        reason: "empty project".to_string(),
      });
    }
    Ok(Self {
      jira:   JiraClient::new(client, settings)?,
      target: target.clone(),
    })
  }
}

#[async_trait]
impl Sender for JiraIssueSender {
  async fn send(&self, message: &Message) -> Result<()> {
    let Payload::JiraIssue(issue) = &message.payload else {
      return Err(Error::MismatchedPayload(SubscriberKind::JiraIssue));
    };
    let body = json!({
      "fields": {
        "project":     { "key": self.target.project },
        "issuetype":   { "name": self.target.issue_type },
        "summary":     issue.summary,
        "description": issue.description,
      }
    });
    self.jira.post("issue", &body).await
  }
}
