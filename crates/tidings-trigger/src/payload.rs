//! The composer: renders the channel-specific payload for a fired trigger.

use std::collections::BTreeMap;

use tidings_core::{
  event::{Event, EventData},
  notification::{
    EmailPayload, GithubStatusPayload, JiraIssuePayload, Payload, SlackPayload,
    WebhookPayload,
  },
  resource::{BuildStatus, TaskStatus},
  subscription::{Subscriber, Subscription},
};

use crate::{Error, Result, engine::Resource};

/// Stand-in test name for a failed execution that reported no failing tests.
pub const NO_TESTS_MARKER: &str = "(no failing tests)";

const HEADER_PREFIX: &str = "X-Evergreen-";

/// Everything a renderer may use.
pub(crate) struct Template<'a> {
  pub object:   &'static str,
  pub id:       String,
  pub project:  String,
  pub url:      String,
  /// Past-tense wording, e.g. "failed".
  pub status:   &'static str,
  pub state:    StatusState,
  pub headers:  BTreeMap<String, String>,
  pub resource: &'a Resource,
}

/// Coarse outcome used where a channel wants a fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusState {
  Success,
  Failure,
  Pending,
}

impl<'a> Template<'a> {
  pub(crate) fn new(
    ui_url: &str,
    event: &Event,
    resource: &'a Resource,
    sub: &Subscription,
  ) -> Self {
    let (object, id, project) = match resource {
      Resource::Task(t) => ("task", t.task_id.clone(), t.project.clone()),
      Resource::Build(b) => ("build", b.build_id.clone(), b.project.clone()),
      Resource::Version(v) => {
        ("version", v.version_id.clone(), v.project.clone())
      }
    };

    let (raw_status, status, state) = match &event.data {
      EventData::Task { status, .. } => {
        let state = match status {
          TaskStatus::Succeeded => StatusState::Success,
          s if s.is_failure() => StatusState::Failure,
          _ => StatusState::Pending,
        };
        (status.to_string(), status.past_tense(), state)
      }
      EventData::Build { status } | EventData::Version { status } => {
        let state = match status {
          BuildStatus::Success => StatusState::Success,
          BuildStatus::Failed => StatusState::Failure,
          _ => StatusState::Pending,
        };
        (status.to_string(), status.past_tense(), state)
      }
    };

    let mut headers = BTreeMap::new();
    let mut header = |name: &str, value: String| {
      headers.entry(format!("{HEADER_PREFIX}{name}")).or_insert(value);
    };
    header("Object", object.to_string());
    header("Id", id.clone());
    header("Project", project.clone());
    header("Status", raw_status);
    header("Trigger", sub.trigger.to_string());
    header("Owner", sub.owner.clone());
    for selector in &sub.selectors {
      header(&header_case(&selector.kind), selector.data.clone());
    }

    Self {
      object,
      url: format!("{}/{object}/{id}", ui_url.trim_end_matches('/')),
      id,
      project,
      status,
      state,
      headers,
      resource,
    }
  }
}

/// `build-variant` becomes `Build-Variant`.
fn header_case(kind: &str) -> String {
  kind
    .split('-')
    .map(|part| {
      let mut chars = part.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join("-")
}

/// Render the payload for `sub`'s subscriber type.
pub(crate) fn render(t: &Template<'_>, sub: &Subscription) -> Result<Payload> {
  if t.url.starts_with('/') {
    return Err(Error::Render("ui url is not configured".to_string()));
  }

  let payload = match &sub.subscriber {
    Subscriber::Email(_) => Payload::Email(email(t)),
    Subscriber::Webhook(_) => Payload::Webhook(webhook(t)?),
    Subscriber::Slack(_) => Payload::Slack(slack(t)),
    Subscriber::JiraComment(_) => Payload::JiraComment(jira_comment(t)),
    Subscriber::JiraIssue(_) => Payload::JiraIssue(jira_issue(t)),
    Subscriber::GithubPullRequest(_) => Payload::GithubStatus(github_status(t)),
  };
  Ok(payload)
}

fn email(t: &Template<'_>) -> EmailPayload {
  let header_lines = t
    .headers
    .iter()
    .map(|(k, v)| format!("{k}:{v}"))
    .collect::<Vec<_>>()
    .join("\n");

  let body = format!(
    "<html>\n<head>\n</head>\n<body>\n<p>Hi,</p>\n\n\
     <p>Your Evergreen {object} <a href=\"{url}\">'{id}'</a> has {status}.</p>\n\n\
     <span style=\"overflow:hidden; line-height:0; font-size:0; height:0; \
     max-height:0; max-width:0; width:0; display:none\">\n{header_lines}\n</span>\n\
     </body>\n</html>\n",
    object = t.object,
    url = t.url,
    id = t.id,
    status = t.status,
  );

  EmailPayload {
    subject: format!("Evergreen {} has {}!", t.object, t.status),
    body,
    headers: t.headers.clone(),
  }
}

fn webhook(t: &Template<'_>) -> Result<WebhookPayload> {
  let body = match t.resource {
    Resource::Task(task) => serde_json::to_string(task),
    Resource::Build(build) => serde_json::to_string(build),
    Resource::Version(version) => serde_json::to_string(version),
  }
  .map_err(|e| Error::Render(e.to_string()))?;

  Ok(WebhookPayload {
    body,
    headers: t.headers.clone(),
  })
}

fn slack(t: &Template<'_>) -> SlackPayload {
  SlackPayload {
    body:        format!(
      "Evergreen {} <{}|{}> in '{}' has {}!",
      t.object, t.url, t.id, t.project, t.status
    ),
    attachments: Vec::new(),
  }
}

fn jira_comment(t: &Template<'_>) -> String {
  format!(
    "Evergreen {} [{}|{}] in '{}' has {}!",
    t.object, t.id, t.url, t.project, t.status
  )
}

fn jira_issue(t: &Template<'_>) -> JiraIssuePayload {
  JiraIssuePayload {
    summary:     format!(
      "Evergreen {} '{}' in '{}' has {}",
      t.object, t.id, t.project, t.status
    ),
    description: jira_comment(t),
  }
}

fn github_status(t: &Template<'_>) -> GithubStatusPayload {
  let state = match t.state {
    StatusState::Success => "success",
    StatusState::Failure => "failure",
    StatusState::Pending => "pending",
  };
  GithubStatusPayload {
    state:       state.to_string(),
    target_url:  t.url.clone(),
    description: format!("{} '{}' has {}", t.object, t.id, t.status),
    context:     format!("evergreen/{}", t.object),
  }
}
