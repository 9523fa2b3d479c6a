//! Core data model for per-tab task execution.

use agent_core::ConversationTurn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::TaskId;
use uuid::Uuid;

use super::events::{Actor, ExecutionState};

/// Identifies a single browser tab under the background controller's
/// supervision. One tab runs at most one task at a time.
///
/// Reuses `soulbrowser_core_types::TabId` (host-assigned `i64`) rather than
/// an agent-generated newtype: a tab identity is an integer assigned by the
/// browser host, which is exactly what that type already models (it just
/// had no caller before this module).
pub use soulbrowser_core_types::TabId;

/// A conversational turn exchanged with the user over a tab's port, reusing
/// the agent core's conversation model so history feeds straight into
/// `AgentRequest::conversation`.
pub type ChatTurn = ConversationTurn;

/// Record of a task run (or queued follow-up) on a tab.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tab_id: TabId,
    pub goal: String,
    pub status: ExecutionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The task this one follows up on, if it was submitted as a follow-up
    /// to an already-running or completed task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_of: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskOutcome>,
}

impl Task {
    pub fn new(tab_id: TabId, goal: impl Into<String>) -> Self {
        Self {
            id: TaskId(Uuid::new_v4().to_string()),
            tab_id,
            goal: goal.into(),
            status: ExecutionState::Idle,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            follow_up_of: None,
            result: None,
        }
    }

    pub fn as_follow_up_of(mut self, parent: TaskId) -> Self {
        self.follow_up_of = Some(parent);
        self
    }

    /// Override the generated id with one the client supplied.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }
}

/// Final outcome of a finished task, produced by the validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One entry in the thinking-step buffer surfaced to clients via
/// `get_thinking_steps`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub step: u32,
    pub actor: Actor,
    pub thinking: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_goal: Option<String>,
    pub created_at: DateTime<Utc>,
}
