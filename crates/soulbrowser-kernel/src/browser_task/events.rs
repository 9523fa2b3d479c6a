//! Execution state machine and the wire event vocabulary broadcast to
//! clients over a tab's port.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbrowser_core_types::TaskId;

use super::model::TabId;

/// Lifecycle state of a task executor bound to a tab.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    Paused,
    Cancelled,
    Succeeded,
    Failed,
}

impl ExecutionState {
    /// Whether a `new_task` or `follow_up_task` message may be accepted
    /// given the current state.
    pub fn accepts_new_task(self) -> bool {
        matches!(
            self,
            ExecutionState::Idle
                | ExecutionState::Succeeded
                | ExecutionState::Failed
                | ExecutionState::Cancelled
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, ExecutionState::Running | ExecutionState::Paused)
    }
}

/// Which role produced or is responsible for an event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Planner,
    Navigator,
    Validator,
    User,
}

/// The fixed vocabulary of event kinds emitted for a task's lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "TASK_START")]
    TaskStart,
    #[serde(rename = "STEP_OK")]
    StepOk,
    #[serde(rename = "STEP_FAIL")]
    StepFail,
    #[serde(rename = "STEP_MAX")]
    StepMax,
    #[serde(rename = "ACT_START")]
    ActStart,
    #[serde(rename = "ACT_OK")]
    ActOk,
    #[serde(rename = "ACT_FAIL")]
    ActFail,
    #[serde(rename = "TASK_OK")]
    TaskOk,
    #[serde(rename = "TASK_FAIL")]
    TaskFail,
    #[serde(rename = "TASK_CANCEL")]
    TaskCancel,
}

/// A single event in a task's execution timeline, broadcast to every
/// listener subscribed to the owning tab.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub tab_id: TabId,
    pub task_id: TaskId,
    pub kind: EventKind,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(tab_id: TabId, task_id: TaskId, kind: EventKind, actor: Actor) -> Self {
        Self {
            tab_id,
            task_id,
            kind,
            actor,
            step: None,
            message: None,
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_serializes_to_fixed_vocabulary() {
        assert_eq!(
            serde_json::to_string(&EventKind::TaskStart).unwrap(),
            "\"TASK_START\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::TaskCancel).unwrap(),
            "\"TASK_CANCEL\""
        );
    }

    #[test]
    fn execution_state_transitions() {
        assert!(ExecutionState::Idle.accepts_new_task());
        assert!(!ExecutionState::Running.accepts_new_task());
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::Paused.is_active());
    }
}
