//! Domain events emitted by the upstream task, build and version state
//! machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::resource::{BuildStatus, TaskStatus};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ResourceType {
  Task,
  Build,
  Version,
}

impl ResourceType {
  /// Lower-case noun used in rendered messages and UI paths.
  pub fn object(self) -> &'static str {
    match self {
      Self::Task => "task",
      Self::Build => "build",
      Self::Version => "version",
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
  TaskStarted,
  TaskFinished,
  BuildStateChange,
  VersionStateChange,
}

/// Typed payload carried by an event. The tag doubles as the resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource_type", content = "data", rename_all = "UPPERCASE")]
pub enum EventData {
  Task { status: TaskStatus, execution: u32 },
  Build { status: BuildStatus },
  Version { status: BuildStatus },
}

impl EventData {
  pub fn resource_type(&self) -> ResourceType {
    match self {
      Self::Task { .. } => ResourceType::Task,
      Self::Build { .. } => ResourceType::Build,
      Self::Version { .. } => ResourceType::Version,
    }
  }
}

/// An immutable record of one state change. `processed_at` is bookkeeping for
/// the event log and is never part of the event's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
  pub event_id:     Uuid,
  pub event_type:   EventType,
  pub resource_id:  String,
  pub timestamp:    DateTime<Utc>,
  pub data:         EventData,
  pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
  pub fn new(
    event_type: EventType,
    resource_id: impl Into<String>,
    data: EventData,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      event_type,
      resource_id: resource_id.into(),
      timestamp: Utc::now(),
      data,
      processed_at: None,
    }
  }

  pub fn resource_type(&self) -> ResourceType { self.data.resource_type() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_data_is_tagged_by_resource_type() {
    let data = EventData::Task {
      status:    TaskStatus::Failed,
      execution: 2,
    };
    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json["resource_type"], "TASK");
    assert_eq!(json["data"]["status"], "failed");
    assert_eq!(json["data"]["execution"], 2);

    let back: EventData = serde_json::from_value(json).unwrap();
    assert_eq!(back.resource_type(), ResourceType::Task);
  }

  #[test]
  fn wire_names() {
    assert_eq!(EventType::TaskFinished.as_ref(), "TASK_FINISHED");
    assert_eq!("VERSION".parse::<ResourceType>().ok(), Some(ResourceType::Version));
    assert_eq!(ResourceType::Build.object(), "build");
  }
}
