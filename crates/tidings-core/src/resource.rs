//! Read models for the resources events describe: tasks, builds, versions and
//! the test results attached to a task execution.
//!
//! These are owned by upstream state machines. The notification pipeline only
//! reads them, so every type here is a plain snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ─── Requesters ──────────────────────────────────────────────────────────────

/// Requesters whose tasks make up the mainline history that regression
/// triggers compare against. Patch and ad-hoc runs never regress anything.
pub const MAINLINE_REQUESTERS: &[&str] = &["gitter_request", "trigger_request"];

pub fn is_mainline_requester(requester: &str) -> bool {
  MAINLINE_REQUESTERS.contains(&requester)
}

// ─── Task status ─────────────────────────────────────────────────────────────

/// Lifecycle status of a single task execution.
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
  Undispatched,
  Dispatched,
  Started,
  #[serde(rename = "success")]
  #[strum(serialize = "success")]
  Succeeded,
  Failed,
  SystemFailed,
  TestTimedOut,
}

/// The two kinds of failure that regression-by-test tells apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  Task,
  System,
}

impl TaskStatus {
  /// `true` once the execution has reached a terminal state.
  pub fn is_finished(self) -> bool {
    matches!(
      self,
      Self::Succeeded | Self::Failed | Self::SystemFailed | Self::TestTimedOut
    )
  }

  pub fn is_failure(self) -> bool {
    matches!(self, Self::Failed | Self::SystemFailed | Self::TestTimedOut)
  }

  pub fn failure_class(self) -> Option<FailureClass> {
    match self {
      Self::Failed | Self::TestTimedOut => Some(FailureClass::Task),
      Self::SystemFailed => Some(FailureClass::System),
      _ => None,
    }
  }

  /// Past-tense wording used in rendered notifications.
  pub fn past_tense(self) -> &'static str {
    match self {
      Self::Succeeded => "succeeded",
      Self::Failed | Self::SystemFailed | Self::TestTimedOut => "failed",
      Self::Started => "started",
      Self::Undispatched | Self::Dispatched => "been scheduled",
    }
  }
}

/// Whether moving from `old` to `new` counts as a regression.
///
/// Repeating the same failure is never a regression, and nothing regresses out
/// of a test timeout.
pub fn is_task_status_regression(old: TaskStatus, new: TaskStatus) -> bool {
  match old {
    TaskStatus::Succeeded => new.is_failure(),
    TaskStatus::Failed => {
      matches!(new, TaskStatus::SystemFailed | TaskStatus::TestTimedOut)
    }
    TaskStatus::SystemFailed => {
      matches!(new, TaskStatus::Failed | TaskStatus::TestTimedOut)
    }
    _ => false,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

/// Outcome of a single test within a task execution.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TestStatus {
  Pass,
  Fail,
  #[serde(rename = "silentfail")]
  #[strum(serialize = "silentfail")]
  SilentFail,
  Skip,
}

impl TestStatus {
  /// Ordering used when one execution reports the same test more than once:
  /// the highest severity wins.
  fn severity(self) -> u8 {
    match self {
      Self::Pass => 0,
      Self::Skip => 1,
      Self::SilentFail => 2,
      Self::Fail => 3,
    }
  }
}

pub fn is_test_status_regression(old: TestStatus, new: TestStatus) -> bool {
  new == TestStatus::Fail && old != TestStatus::Fail
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
  pub task_id:   String,
  pub execution: u32,
  pub test_file: String,
  pub status:    TestStatus,
}

/// Collapse results by test file, keeping the worst status per file.
pub fn worst_status_by_file(
  results: &[TestResult],
) -> BTreeMap<String, TestStatus> {
  let mut map: BTreeMap<String, TestStatus> = BTreeMap::new();
  for result in results {
    map
      .entry(result.test_file.clone())
      .and_modify(|current| {
        if result.status.severity() > current.severity() {
          *current = result.status;
        }
      })
      .or_insert(result.status);
  }
  map
}

// ─── Task ────────────────────────────────────────────────────────────────────

/// The (project, build-variant, task-name) tuple that identifies "the same
/// task" across revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryScope {
  pub project:       String,
  pub build_variant: String,
  pub display_name:  String,
}

/// One execution of a task. Reruns share `task_id` and bump `execution`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub task_id:        String,
  pub execution:      u32,
  pub display_name:   String,
  pub project:        String,
  pub version:        String,
  pub build_id:       String,
  pub build_variant:  String,
  pub requester:      String,
  pub status:         TaskStatus,
  pub start_time:     Option<DateTime<Utc>>,
  pub finish_time:    Option<DateTime<Utc>>,
  /// Position of the task's revision in the project's mainline history.
  pub revision_order: i64,
}

impl Task {
  /// Wall-clock runtime; `None` until both timestamps are known.
  pub fn duration(&self) -> Option<Duration> {
    Some(self.finish_time? - self.start_time?)
  }

  pub fn history_scope(&self) -> HistoryScope {
    HistoryScope {
      project:       self.project.clone(),
      build_variant: self.build_variant.clone(),
      display_name:  self.display_name.clone(),
    }
  }
}

// ─── Builds and versions ─────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildStatus {
  Created,
  Started,
  Success,
  Failed,
}

impl BuildStatus {
  pub fn is_finished(self) -> bool { matches!(self, Self::Success | Self::Failed) }

  pub fn past_tense(self) -> &'static str {
    match self {
      Self::Success => "succeeded",
      Self::Failed => "failed",
      Self::Started => "started",
      Self::Created => "been created",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
  pub build_id:      String,
  pub version:       String,
  pub project:       String,
  pub build_variant: String,
  pub display_name:  String,
  pub requester:     String,
  pub status:        BuildStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
  pub version_id: String,
  pub project:    String,
  pub revision:   String,
  pub author:     String,
  pub requester:  String,
  pub status:     BuildStatus,
}

#[cfg(test)]
mod tests {
  use super::*;

  use TaskStatus::*;

  #[test]
  fn task_regression_table() {
    assert!(!is_task_status_regression(Succeeded, Succeeded));
    assert!(is_task_status_regression(Succeeded, SystemFailed));
    assert!(is_task_status_regression(Succeeded, Failed));
    assert!(is_task_status_regression(Succeeded, TestTimedOut));

    assert!(!is_task_status_regression(SystemFailed, Succeeded));
    assert!(!is_task_status_regression(SystemFailed, SystemFailed));
    assert!(is_task_status_regression(SystemFailed, Failed));
    assert!(is_task_status_regression(SystemFailed, TestTimedOut));

    assert!(!is_task_status_regression(Failed, Succeeded));
    assert!(is_task_status_regression(Failed, SystemFailed));
    assert!(!is_task_status_regression(Failed, Failed));
    assert!(is_task_status_regression(Failed, TestTimedOut));

    assert!(!is_task_status_regression(TestTimedOut, TestTimedOut));
    assert!(!is_task_status_regression(Started, Failed));
  }

  #[test]
  fn test_regression_table() {
    use TestStatus::*;

    assert!(is_test_status_regression(Skip, Fail));
    assert!(!is_test_status_regression(Skip, SilentFail));
    assert!(!is_test_status_regression(Skip, Skip));
    assert!(!is_test_status_regression(Skip, Pass));

    assert!(!is_test_status_regression(Fail, Fail));
    assert!(!is_test_status_regression(Fail, SilentFail));
    assert!(!is_test_status_regression(Fail, Skip));
    assert!(!is_test_status_regression(Fail, Pass));

    assert!(is_test_status_regression(Pass, Fail));
    assert!(!is_test_status_regression(Pass, SilentFail));

    assert!(is_test_status_regression(SilentFail, Fail));
    assert!(!is_test_status_regression(SilentFail, Pass));
  }

  #[test]
  fn worst_status_wins_per_file() {
    let statuses = [
      TestStatus::Pass,
      TestStatus::Fail,
      TestStatus::SilentFail,
      TestStatus::Skip,
    ];
    let mut results = Vec::new();
    for (i, status) in statuses.iter().enumerate() {
      let file = format!("file{i}");
      // Alternate which of the pair comes first.
      let (first, second) = if i % 2 == 0 {
        (TestStatus::Fail, *status)
      } else {
        (*status, TestStatus::Fail)
      };
      for s in [first, second] {
        results.push(TestResult {
          task_id:   "t".into(),
          execution: 0,
          test_file: file.clone(),
          status:    s,
        });
      }
    }

    let map = worst_status_by_file(&results);
    assert_eq!(map.len(), 4);
    assert!(map.values().all(|s| *s == TestStatus::Fail));
  }

  #[test]
  fn status_wire_names() {
    assert_eq!(TaskStatus::Succeeded.as_ref(), "success");
    assert_eq!(TaskStatus::SystemFailed.as_ref(), "system-failed");
    assert_eq!("test-timed-out".parse::<TaskStatus>().ok(), Some(TestTimedOut));
    assert_eq!(
      serde_json::to_string(&TestStatus::SilentFail).unwrap(),
      "\"silentfail\""
    );
  }

  #[test]
  fn duration_needs_both_timestamps() {
    let start = Utc::now();
    let mut task = Task {
      task_id:        "t".into(),
      execution:      0,
      display_name:   "compile".into(),
      project:        "p".into(),
      version:        "v".into(),
      build_id:       "b".into(),
      build_variant:  "bv".into(),
      requester:      "gitter_request".into(),
      status:         Succeeded,
      start_time:     Some(start),
      finish_time:    None,
      revision_order: 1,
    };
    assert!(task.duration().is_none());
    task.finish_time = Some(start + Duration::minutes(3));
    assert_eq!(task.duration(), Some(Duration::minutes(3)));
  }
}
