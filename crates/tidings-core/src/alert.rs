//! Alert records: durable markers that a trigger already fired for a scope.
//!
//! A record's `dedup_key` is unique in storage. Inserting a record is the
//! suppression gate; a conflicting insert means another evaluation already
//! alerted and the caller must stay quiet.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  resource::{HistoryScope, Task, TaskStatus},
  subscription::Trigger,
};

/// The identity an alert is deduplicated over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertScope {
  Version(String),
  Build(String),
  VersionWithName { version: String, display_name: String },
  /// One execution of one task.
  Execution { task_id: String, execution: u32 },
}

impl fmt::Display for AlertScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Version(v) => write!(f, "version:{v}"),
      Self::Build(b) => write!(f, "build:{b}"),
      Self::VersionWithName {
        version,
        display_name,
      } => write!(f, "version:{version}:name:{display_name}"),
      Self::Execution { task_id, execution } => {
        write!(f, "task:{task_id}:{execution}")
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
  pub alert_id:        Uuid,
  pub dedup_key:       String,
  pub subscription_id: Uuid,
  pub trigger:         Trigger,
  pub task_id:         Option<String>,
  pub execution:       Option<u32>,
  /// Set for alerts that later evaluations look back on (regressions).
  pub history:         Option<HistoryScope>,
  pub revision_order:  Option<i64>,
  pub task_status:     Option<TaskStatus>,
  /// Sorted failing test files at the time of the alert.
  pub failing_tests:   Vec<String>,
  pub alerted_at:      DateTime<Utc>,
}

impl AlertRecord {
  pub fn dedup_key(
    subscription_id: Uuid,
    trigger: Trigger,
    scope: &AlertScope,
  ) -> String {
    format!("{trigger}|{subscription_id}|{scope}")
  }

  pub fn new(subscription_id: Uuid, trigger: Trigger, scope: &AlertScope) -> Self {
    Self {
      alert_id: Uuid::new_v4(),
      dedup_key: Self::dedup_key(subscription_id, trigger, scope),
      subscription_id,
      trigger,
      task_id: None,
      execution: None,
      history: None,
      revision_order: None,
      task_status: None,
      failing_tests: Vec::new(),
      alerted_at: Utc::now(),
    }
  }

  /// An execution-scoped record carrying enough of `task` for later
  /// regression checks to use it as a baseline.
  pub fn for_task(subscription_id: Uuid, trigger: Trigger, task: &Task) -> Self {
    let scope = AlertScope::Execution {
      task_id:   task.task_id.clone(),
      execution: task.execution,
    };
    Self {
      task_id: Some(task.task_id.clone()),
      execution: Some(task.execution),
      history: Some(task.history_scope()),
      revision_order: Some(task.revision_order),
      task_status: Some(task.status),
      ..Self::new(subscription_id, trigger, &scope)
    }
  }

  pub fn with_failing_tests(mut self, mut tests: Vec<String>) -> Self {
    tests.sort();
    tests.dedup();
    self.failing_tests = tests;
    self
  }

  pub fn alerted_at(mut self, at: DateTime<Utc>) -> Self {
    self.alerted_at = at;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dedup_key_separates_triggers_and_scopes() {
    let sub = Uuid::new_v4();
    let v = AlertScope::Version("v1".into());
    let b = AlertScope::Build("v1".into());

    let a = AlertRecord::dedup_key(sub, Trigger::FirstFailureInVersion, &v);
    assert_ne!(a, AlertRecord::dedup_key(sub, Trigger::FirstFailureInBuild, &v));
    assert_ne!(a, AlertRecord::dedup_key(sub, Trigger::FirstFailureInVersion, &b));
    assert_ne!(
      a,
      AlertRecord::dedup_key(Uuid::new_v4(), Trigger::FirstFailureInVersion, &v)
    );
  }

  #[test]
  fn failing_tests_are_normalised() {
    let rec = AlertRecord::new(
      Uuid::new_v4(),
      Trigger::RegressionByTest,
      &AlertScope::Build("b".into()),
    )
    .with_failing_tests(vec!["b".into(), "a".into(), "b".into()]);
    assert_eq!(rec.failing_tests, vec!["a".to_string(), "b".to_string()]);
  }
}
