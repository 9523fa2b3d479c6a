//! Per-tab chat history: an ordered list of sessions, each holding the
//! persisted message transcript for a task and its follow-ups.
//!
//! Grounded in `storage::FileStorage` (one JSON document per entity under a
//! tenant-scoped directory, written with `tokio::fs`), generalized from a
//! flat event log to the nested session/message tree `ExecutionEvent`s feed
//! when a tab's port is disconnected and the controller falls back to
//! persistence instead of live delivery.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::TaskId;
use tracing::warn;
use uuid::Uuid;

use super::events::Actor;
use super::model::{TabId, ThinkingStep};

/// The `messageType` vocabulary for a persisted chat turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Thinking,
    Progress,
}

/// One entry in a session's transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub actor: Actor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_steps: Option<Vec<ThinkingStep>>,
}

impl Message {
    pub fn user(content: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            actor: Actor::User,
            content: content.into(),
            timestamp: Utc::now(),
            message_type: MessageType::User,
            task_id: Some(task_id),
            thinking_steps: None,
        }
    }
}

/// A chat grouping containing a task and its follow-ups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TabHistory {
    sessions: Vec<Session>,
}

/// File-backed chat history, one JSON document per tab at
/// `<root>/chat_history/<tab_id>.json`, a `<prefix>:<tabId>` logical
/// namespace per tab.
pub struct ChatHistoryStore {
    root: PathBuf,
    cache: Mutex<HashMap<TabId, TabHistory>>,
}

impl ChatHistoryStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: root.join("chat_history"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, tab_id: &TabId) -> PathBuf {
        self.root.join(format!("{}.json", tab_id.0))
    }

    async fn load(&self, tab_id: &TabId) -> TabHistory {
        if let Some(cached) = self.cache.lock().get(tab_id).cloned() {
            return cached;
        }
        let path = self.path_for(tab_id);
        let history = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => TabHistory::default(),
        };
        self.cache.lock().insert(tab_id.clone(), history.clone());
        history
    }

    async fn save(&self, tab_id: &TabId, history: TabHistory) {
        if let Err(err) = tokio::fs::create_dir_all(&self.root).await {
            warn!(?err, "failed to create chat history directory");
            return;
        }
        match serde_json::to_string_pretty(&history) {
            Ok(json) => {
                if let Err(err) = tokio::fs::write(self.path_for(tab_id), json).await {
                    warn!(?err, tab_id = %tab_id, "failed to persist chat history");
                }
            }
            Err(err) => warn!(?err, "failed to serialize chat history"),
        }
        self.cache.lock().insert(tab_id.clone(), history);
    }

    /// Start a new session for a fresh top-level user task. Follow-ups
    /// append to the session already open for the tab via
    /// [`ChatHistoryStore::append_message`].
    pub async fn start_session(&self, tab_id: &TabId, title: impl Into<String>) -> String {
        let mut history = self.load(tab_id).await;
        let id = Uuid::new_v4().to_string();
        history.sessions.push(Session {
            id: id.clone(),
            title: title.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        });
        self.save(tab_id, history).await;
        id
    }

    /// Append a message to the most recently opened session for this tab,
    /// opening one implicitly if the tab has none yet.
    pub async fn append_message(&self, tab_id: &TabId, message: Message) {
        let mut history = self.load(tab_id).await;
        if history.sessions.is_empty() {
            let title: String = message.content.chars().take(60).collect();
            history.sessions.push(Session {
                id: Uuid::new_v4().to_string(),
                title,
                created_at: Utc::now(),
                messages: Vec::new(),
            });
        }
        history
            .sessions
            .last_mut()
            .expect("non-empty by construction above")
            .messages
            .push(message);
        self.save(tab_id, history).await;
    }

    pub async fn list_sessions(&self, tab_id: &TabId) -> Vec<Session> {
        self.load(tab_id).await.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_message_opens_a_session_implicitly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::new(dir.path().to_path_buf());
        let tab = TabId(101);

        store
            .append_message(&tab, Message::user("open example.com", TaskId::new()))
            .await;

        let sessions = store.list_sessions(&tab).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn follow_up_messages_append_to_the_latest_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::new(dir.path().to_path_buf());
        let tab = TabId(102);

        let session_id = store.start_session(&tab, "book a flight").await;
        store
            .append_message(&tab, Message::user("book a flight", TaskId::new()))
            .await;
        store
            .append_message(&tab, Message::user("now change the date", TaskId::new()))
            .await;

        let sessions = store.list_sessions(&tab).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, session_id);
        assert_eq!(sessions[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn history_survives_a_fresh_store_over_the_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tab = TabId(103);
        {
            let store = ChatHistoryStore::new(dir.path().to_path_buf());
            store
                .append_message(&tab, Message::user("hello", TaskId::new()))
                .await;
        }
        let reopened = ChatHistoryStore::new(dir.path().to_path_buf());
        let sessions = reopened.list_sessions(&tab).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages.len(), 1);
    }
}
