//! Task trigger predicates.
//!
//! Each predicate decides whether `sub` fires for the current task state.
//! The only side effect allowed is inserting an alert record, and only as the
//! final step: a `false` from the insert means another evaluation already
//! alerted, so the trigger stays quiet.

use chrono::Utc;
use tidings_core::{
  alert::{AlertRecord, AlertScope},
  event::{Event, EventType},
  resource::{
    Task, TaskStatus, TestStatus, is_mainline_requester,
    is_task_status_regression, worst_status_by_file,
  },
  store::{AlertStore, SubscriptionStore, TaskHistory},
  subscription::{
    Subscription, TRIGGER_DATA_DURATION_SECS, TRIGGER_DATA_PERCENT_CHANGE,
    Trigger,
  },
};

use crate::{Error, Result, TriggerEngine, payload::NO_TESTS_MARKER};

impl<S> TriggerEngine<S>
where
  S: SubscriptionStore + AlertStore + TaskHistory,
{
  /// `status` comes from the event; `task` is the execution it refers to.
  pub(crate) async fn task_trigger(
    &self,
    event: &Event,
    task: &Task,
    status: TaskStatus,
    sub: &Subscription,
  ) -> Result<bool> {
    match sub.trigger {
      Trigger::Outcome => Ok(status.is_finished()),
      Trigger::Success => Ok(status == TaskStatus::Succeeded),
      Trigger::Failure => Ok(status.is_failure()),
      Trigger::FirstFailureInVersion => {
        let scope = AlertScope::Version(task.version.clone());
        self.first_failure(sub, task, status, scope).await
      }
      Trigger::FirstFailureInBuild => {
        let scope = AlertScope::Build(task.build_id.clone());
        self.first_failure(sub, task, status, scope).await
      }
      Trigger::FirstFailureInVersionWithName => {
        let scope = AlertScope::VersionWithName {
          version:      task.version.clone(),
          display_name: task.display_name.clone(),
        };
        self.first_failure(sub, task, status, scope).await
      }
      Trigger::Regression => self.regression(sub, task, status).await,
      Trigger::RegressionByTest => {
        self.regression_by_test(sub, task, status).await
      }
      Trigger::ExceedsDuration => exceeds_duration(event, task, sub),
      Trigger::RuntimeChange => self.runtime_change(event, task, sub).await,
    }
  }

  async fn record_alert(&self, record: AlertRecord) -> Result<bool> {
    self.store.insert_alert(record).await.map_err(Error::store)
  }

  async fn first_failure(
    &self,
    sub: &Subscription,
    task: &Task,
    status: TaskStatus,
    scope: AlertScope,
  ) -> Result<bool> {
    if !status.is_failure() {
      return Ok(false);
    }
    let mut record = AlertRecord::new(sub.subscription_id, sub.trigger, &scope);
    record.task_id = Some(task.task_id.clone());
    record.execution = Some(task.execution);
    record.task_status = Some(status);
    self.record_alert(record).await
  }

  async fn regression(
    &self,
    sub: &Subscription,
    task: &Task,
    status: TaskStatus,
  ) -> Result<bool> {
    if !status.is_failure() || !is_mainline_requester(&task.requester) {
      return Ok(false);
    }

    let scope = task.history_scope();
    let previous = self
      .store
      .previous_completed_task(&scope, task.revision_order)
      .await
      .map_err(Error::store)?;

    let should_send = match previous {
      None => true,
      Some(prev) => {
        let last = self
          .store
          .last_alert(
            sub.subscription_id,
            Trigger::Regression,
            &scope,
            task.revision_order,
          )
          .await
          .map_err(Error::store)?;

        if prev.status == TaskStatus::Succeeded {
          // Alert again only if the last alert was for a transition from an
          // older success.
          last.is_none_or(|a| {
            a.revision_order.unwrap_or(i64::MIN) < prev.revision_order
          })
        } else if is_task_status_regression(prev.status, status) {
          // Failing differently than before, e.g. system-failed to failed.
          true
        } else {
          // Still failing; renotify once the last alert has aged out.
          let interval = self.config.renotify_interval;
          last.is_none_or(|a| Utc::now() - a.alerted_at >= interval)
        }
      }
    };
    if !should_send {
      return Ok(false);
    }

    let mut record =
      AlertRecord::for_task(sub.subscription_id, Trigger::Regression, task);
    record.task_status = Some(status);
    self.record_alert(record).await
  }

  async fn regression_by_test(
    &self,
    sub: &Subscription,
    task: &Task,
    status: TaskStatus,
  ) -> Result<bool> {
    if !status.is_failure() || !is_mainline_requester(&task.requester) {
      return Ok(false);
    }

    let results = self
      .store
      .test_results(&task.task_id, task.execution)
      .await
      .map_err(Error::store)?;
    let mut failing: Vec<String> = worst_status_by_file(&results)
      .into_iter()
      .filter(|(_, s)| *s == TestStatus::Fail)
      .map(|(file, _)| file)
      .collect();
    if failing.is_empty() {
      failing.push(NO_TESTS_MARKER.to_string());
    }

    let scope = task.history_scope();
    let mut baseline = self
      .store
      .last_alert(
        sub.subscription_id,
        Trigger::RegressionByTest,
        &scope,
        task.revision_order,
      )
      .await
      .map_err(Error::store)?;

    // A green run after the baseline starts a fresh streak.
    if let Some(base) = &baseline {
      let green = self
        .store
        .last_successful_task(&scope, task.revision_order)
        .await
        .map_err(Error::store)?;
      let base_revision = base.revision_order.unwrap_or(i64::MIN);
      if green.is_some_and(|g| g.revision_order > base_revision) {
        baseline = None;
      }
    }

    let record =
      AlertRecord::for_task(sub.subscription_id, Trigger::RegressionByTest, task)
        .with_failing_tests(failing);

    let changed = match &baseline {
      None => true,
      Some(base) => {
        base.failing_tests != record.failing_tests
          || base.task_status.and_then(TaskStatus::failure_class)
            != status.failure_class()
      }
    };
    if !changed {
      return Ok(false);
    }

    let record = AlertRecord {
      task_status: Some(status),
      ..record
    };
    self.record_alert(record).await
  }

  async fn runtime_change(
    &self,
    event: &Event,
    task: &Task,
    sub: &Subscription,
  ) -> Result<bool> {
    if event.event_type != EventType::TaskFinished {
      return Ok(false);
    }
    let threshold = required_threshold(sub, TRIGGER_DATA_PERCENT_CHANGE)?;
    let Some(current) = task.duration() else {
      return Ok(false);
    };

    let Some(previous) = self
      .store
      .last_successful_task(&task.history_scope(), task.revision_order)
      .await
      .map_err(Error::store)?
      .and_then(|t| t.duration())
    else {
      return Ok(false);
    };

    let previous_ms = previous.num_milliseconds() as f64;
    if previous_ms <= 0.0 {
      return Ok(false);
    }
    let current_ms = current.num_milliseconds() as f64;
    let percent = (current_ms - previous_ms).abs() / previous_ms * 100.0;
    Ok(percent >= threshold)
  }
}

fn exceeds_duration(event: &Event, task: &Task, sub: &Subscription) -> Result<bool> {
  if event.event_type != EventType::TaskFinished {
    return Ok(false);
  }
  let threshold = required_threshold(sub, TRIGGER_DATA_DURATION_SECS)?;
  let Some(duration) = task.duration() else {
    return Ok(false);
  };
  Ok(duration.num_milliseconds() as f64 / 1000.0 >= threshold)
}

fn required_threshold(sub: &Subscription, key: &'static str) -> Result<f64> {
  sub.threshold(key)?.ok_or(Error::MissingTriggerData {
    trigger: sub.trigger,
    key,
  })
}
