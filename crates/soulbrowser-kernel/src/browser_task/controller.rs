//! Single process-wide broker between UI ports and per-tab executors.
//!
//! Grounded in `soulbrowser-kernel::sessions::{live, service}` for the
//! per-tab registry/bookkeeping pattern, and in the existing
//! `server::router::ws` route, which accepts the websocket connections that
//! stand in for the extension's named ports (a `hello` frame declares the
//! tab binding in place of the port-name convention).

use std::sync::Arc;
use std::time::Duration;

use agent_core::LlmProvider;
use anyhow::{anyhow, Result};
use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{RoutePrefer, RoutingHint, TaskId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::app_context::AppContext;
use crate::chat_support::{self, LlmProviderConfig, LlmProviderSelection};

use super::chat_history::{ChatHistoryStore, Message, MessageType};
use super::events::{EventKind, ExecutionEvent};
use super::executor::{ExecutorSettings, ExecutorStatus, TaskExecutor};
use super::firewall::FirewallConfig;
use super::model::{TabId, ThinkingStep};

/// Inbound control messages accepted on a tab's port, per the side-panel
/// port protocol this crate's `/ws` route stands in for.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortMessage {
    Hello { tab_id: TabId },
    Heartbeat,
    NewTask {
        tab_id: TabId,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    FollowUpTask {
        tab_id: TabId,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },
    CancelTask { tab_id: TabId },
    PauseTask { tab_id: TabId },
    ResumeTask { tab_id: TabId },
    Screenshot { tab_id: TabId },
    GetThinkingSteps { tab_id: TabId },
    CheckExecutorStatus { tab_id: TabId },
    State,
    NoHighlight,
    /// Replay a stored chat-history session. `task_id`/`task` let the client
    /// pin the replay to a specific task and goal rather than replaying the
    /// session's own recorded goal.
    Replay {
        tab_id: TabId,
        history_session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },
}

/// Outbound replies and broadcast events delivered over a tab's port.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortResponse {
    /// Sent once, immediately on connect, before any `hello` frame binds
    /// the port to a tab.
    Connected {
        session_id: String,
        server_version: &'static str,
    },
    HeartbeatAck,
    TaskAccepted { task_id: TaskId },
    Warning { message: String },
    ThinkingSteps { steps: Vec<ThinkingStep> },
    Status(ExecutorStatus),
    ScreenshotResult { data_base64: String },
    Error { message: String },
    Execution(ExecutionEvent),
}

/// Settings governing the controller's own housekeeping, independent of any
/// single executor's task settings.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// An idle executor is dropped from the registry once it has been quiet
    /// for at least this long. Spec default: 5 minutes.
    pub idle_executor_ttl: Duration,
    /// How often the cleanup sweep runs.
    pub cleanup_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            idle_executor_ttl: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Per-process broker: one [`TaskExecutor`] per tab, reused across the
/// tab's lifetime so follow-ups keep their history and browser context.
pub struct BackgroundController {
    context: Arc<AppContext>,
    llm_config: LlmProviderConfig,
    provider: Option<LlmProviderSelection>,
    settings: ExecutorSettings,
    firewall: FirewallConfig,
    controller_settings: ControllerSettings,
    executors: DashMap<TabId, Arc<TaskExecutor>>,
    ports: DashMap<String, TabId>,
    /// The live sender for each tab's currently bound port, if any. Events
    /// for a tab with no entry here fall back to the chat history store:
    /// events route to the originating tab's port only, never broadcast to
    /// other tabs.
    senders: Arc<DashMap<TabId, mpsc::UnboundedSender<PortResponse>>>,
    chat_history: Arc<ChatHistoryStore>,
}

impl BackgroundController {
    pub fn new(
        context: Arc<AppContext>,
        provider: Option<LlmProviderSelection>,
        llm_config: LlmProviderConfig,
        settings: ExecutorSettings,
        firewall: FirewallConfig,
    ) -> Self {
        Self::with_controller_settings(
            context,
            provider,
            llm_config,
            settings,
            firewall,
            ControllerSettings::default(),
        )
    }

    pub fn with_controller_settings(
        context: Arc<AppContext>,
        provider: Option<LlmProviderSelection>,
        llm_config: LlmProviderConfig,
        settings: ExecutorSettings,
        firewall: FirewallConfig,
        controller_settings: ControllerSettings,
    ) -> Self {
        let chat_history = Arc::new(ChatHistoryStore::new(context.execution_output_root()));
        Self {
            context,
            llm_config,
            provider,
            settings,
            firewall,
            controller_settings,
            executors: DashMap::new(),
            ports: DashMap::new(),
            senders: Arc::new(DashMap::new()),
            chat_history,
        }
    }

    /// Spawn the periodic idle-executor sweep. Must be called once by the
    /// composition root (the controller itself never self-spawns, so tests
    /// can drive `sweep_idle_executors` deterministically instead).
    pub fn spawn_idle_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let interval = controller.controller_settings.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                controller.sweep_idle_executors().await;
            }
        })
    }

    /// Remove executors that have been idle for at least the configured
    /// TTL. Returns the tabs that were dropped.
    pub async fn sweep_idle_executors(&self) -> Vec<TabId> {
        let ttl = chrono::Duration::from_std(self.controller_settings.idle_executor_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let candidates: Vec<TabId> = self
            .executors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = Vec::new();
        for tab_id in candidates {
            let Some(executor) = self.executors.get(&tab_id).map(|e| e.clone()) else {
                continue;
            };
            if executor.idle_for_at_least(ttl).await {
                self.executors.remove(&tab_id);
                self.senders.remove(&tab_id);
                removed.push(tab_id);
            }
        }
        removed
    }

    /// Bind a connection id to a tab and register its outbound sender, per
    /// the `hello` frame convention. Installs the event pump on first bind
    /// for a tab so execution events forward live while the port stays up.
    pub fn bind_port(
        &self,
        connection_id: impl Into<String>,
        tab_id: TabId,
        sender: mpsc::UnboundedSender<PortResponse>,
    ) {
        self.ports.insert(connection_id.into(), tab_id);
        self.senders.insert(tab_id, sender);
        // Ensure the executor (and its event pump) exists even if the tab
        // binds its port before submitting a first task.
        self.executor_for(&tab_id);
    }

    /// Drop the port; the executor is left running. The UI reconnects by
    /// opening a new port and querying status. Events that arrive with no
    /// sender registered fall back to the chat history store.
    pub fn unbind_port(&self, connection_id: &str) {
        if let Some((_, tab_id)) = self.ports.remove(connection_id) {
            self.senders.remove(&tab_id);
        }
    }

    /// Cancel the tab's executor and drop all its bookkeeping. Called when
    /// the owning tab is closed.
    pub async fn remove_tab(&self, tab_id: &TabId) {
        if let Some((_, executor)) = self.executors.remove(tab_id) {
            executor.cancel().await;
        }
        self.ports.retain(|_, bound| bound != tab_id);
        self.senders.remove(tab_id);
    }

    fn llm(&self) -> Arc<dyn LlmProvider> {
        chat_support::resolve_llm_provider(self.provider, &self.llm_config)
    }

    fn executor_for(&self, tab_id: &TabId) -> Arc<TaskExecutor> {
        if let Some(existing) = self.executors.get(tab_id) {
            return existing.clone();
        }
        let executor = Arc::new(TaskExecutor::new(
            *tab_id,
            Arc::clone(&self.context),
            self.llm(),
            self.settings.clone(),
            self.firewall.clone(),
        ));
        self.executors.insert(*tab_id, executor.clone());
        self.spawn_event_forwarder(*tab_id, &executor);
        executor
    }

    /// Subscribe a background task to the executor's event stream for the
    /// lifetime of the process: forward to the bound port's sender when one
    /// exists, otherwise persist into the tab's chat history. A single
    /// long-lived task over the broadcast channel subscribes to the
    /// executor's events exactly once, with no need to re-subscribe per
    /// connection.
    fn spawn_event_forwarder(&self, tab_id: TabId, executor: &Arc<TaskExecutor>) {
        let mut rx = executor.subscribe();
        let senders = Arc::clone(&self.senders);
        let chat_history = Arc::clone(&self.chat_history);
        let executor = Arc::clone(executor);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Some(sender) = senders.get(&tab_id) {
                    if sender.send(PortResponse::Execution(event.clone())).is_ok() {
                        continue;
                    }
                }
                persist_event(&chat_history, &tab_id, &event, &executor).await;
            }
        });
    }

    /// Subscribe to a tab's execution event stream, creating the executor
    /// if it does not exist yet (the controller "subscribes to each
    /// executor's events once").
    pub fn subscribe(&self, tab_id: &TabId) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.executor_for(tab_id).subscribe()
    }

    pub async fn dispatch(&self, message: PortMessage) -> PortResponse {
        match message {
            PortMessage::Hello { .. } | PortMessage::State | PortMessage::NoHighlight => {
                PortResponse::HeartbeatAck
            }
            PortMessage::Heartbeat => PortResponse::HeartbeatAck,
            PortMessage::NewTask { tab_id, task, task_id } => {
                let executor = self.executor_for(&tab_id);
                self.chat_history.start_session(&tab_id, task.clone()).await;
                let created = executor.submit(task.clone(), task_id).await;
                self.chat_history
                    .append_message(&tab_id, Message::user(task, created.id.clone()))
                    .await;
                PortResponse::TaskAccepted { task_id: created.id }
            }
            PortMessage::FollowUpTask { tab_id, task, task_id } => {
                let executor = self.executor_for(&tab_id);
                let busy = executor.state().await.is_active();
                let parent = executor
                    .status()
                    .await
                    .current_task
                    .map(|t| t.id)
                    .unwrap_or_else(TaskId::new);
                let created = executor.submit_follow_up(task.clone(), parent, task_id).await;
                self.chat_history
                    .append_message(&tab_id, Message::user(task, created.id.clone()))
                    .await;
                if busy {
                    PortResponse::Warning {
                        message: format!(
                            "tab {} is busy; follow-up {} queued",
                            tab_id, created.id.0
                        ),
                    }
                } else {
                    PortResponse::TaskAccepted { task_id: created.id }
                }
            }
            PortMessage::CancelTask { tab_id } => {
                self.executor_for(&tab_id).cancel().await;
                PortResponse::HeartbeatAck
            }
            PortMessage::PauseTask { tab_id } => {
                self.executor_for(&tab_id).pause();
                PortResponse::HeartbeatAck
            }
            PortMessage::ResumeTask { tab_id } => {
                self.executor_for(&tab_id).resume();
                PortResponse::HeartbeatAck
            }
            PortMessage::GetThinkingSteps { tab_id } => PortResponse::ThinkingSteps {
                steps: self.executor_for(&tab_id).thinking_steps(),
            },
            PortMessage::CheckExecutorStatus { tab_id } => {
                PortResponse::Status(self.executor_for(&tab_id).status().await)
            }
            PortMessage::Screenshot { tab_id } => match self.capture_screenshot().await {
                Ok(data_base64) => PortResponse::ScreenshotResult { data_base64 },
                Err(err) => {
                    warn!(tab_id = %tab_id, error = %err, "screenshot capture failed");
                    PortResponse::Error {
                        message: err.to_string(),
                    }
                }
            },
            PortMessage::Replay {
                tab_id,
                history_session_id,
                task_id,
                task,
            } => {
                debug!(
                    tab_id = %tab_id,
                    history_session_id = %history_session_id,
                    task_id = ?task_id,
                    "replay requested; delegating to the replay module"
                );
                let replayer = crate::replay::SessionReplayer::with_context(
                    Arc::clone(&self.context),
                    crate::replay::ReplayConfig::default(),
                );
                let overrides = task.map(|task| {
                    let mut overrides = std::collections::HashMap::new();
                    overrides.insert("task".to_string(), task);
                    overrides
                });
                match replayer
                    .replay_session(&history_session_id, overrides.as_ref(), false)
                    .await
                {
                    Ok(results) => {
                        debug!(
                            tab_id = %tab_id,
                            success = results.success,
                            events_replayed = results.events_replayed,
                            "replay finished"
                        );
                        PortResponse::HeartbeatAck
                    }
                    Err(err) => PortResponse::Error {
                        message: err.to_string(),
                    },
                }
            }
        }
    }

    /// Silent attach + screenshot, independent of any running executor.
    async fn capture_screenshot(&self) -> Result<String> {
        let adapter = self
            .context
            .tool_manager()
            .cdp_adapter()
            .ok_or_else(|| anyhow!("CDP adapter not available"))?;
        Arc::clone(&adapter)
            .start()
            .await
            .map_err(|err| anyhow!("failed to start CDP adapter: {err:?}"))?;

        let registry = self.context.registry();
        let sessions = registry.session_list().await;
        let target = sessions
            .iter()
            .find(|ctx| ctx.focused_page.is_some())
            .ok_or_else(|| anyhow!("no focused page to screenshot"))?;

        let hint = RoutingHint {
            session: Some(target.id.clone()),
            page: target.focused_page.clone(),
            frame: None,
            prefer: Some(RoutePrefer::Focused),
        };
        let route = registry
            .route_resolve(Some(hint))
            .await
            .map_err(|err| anyhow!("failed to resolve route: {err}"))?;

        let resolved_ctx = adapter
            .resolve_execution_context(&route)
            .await
            .map_err(|err| anyhow!("failed to resolve execution context: {err:?}"))?;

        let bytes = adapter
            .screenshot(resolved_ctx.page, Default::default())
            .await
            .map_err(|err| anyhow!("screenshot failed: {err:?}"))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Turn a broadcast event into a persisted chat message when no port is
/// listening live. Step/act events become `Thinking` entries carrying the
/// executor's current thinking-step buffer; terminal events become the
/// `Assistant` turn with the event's own message as the answer.
async fn persist_event(
    chat_history: &ChatHistoryStore,
    tab_id: &TabId,
    event: &ExecutionEvent,
    executor: &TaskExecutor,
) {
    let message_type = match event.kind {
        EventKind::TaskOk | EventKind::TaskFail | EventKind::TaskCancel => MessageType::Assistant,
        _ => MessageType::Thinking,
    };
    let content = event
        .message
        .clone()
        .unwrap_or_else(|| format!("{:?}", event.kind));
    let thinking_steps = matches!(message_type, MessageType::Thinking)
        .then(|| executor.thinking_steps())
        .filter(|steps| !steps.is_empty());
    let message = Message {
        actor: event.actor,
        content,
        timestamp: event.timestamp,
        message_type,
        task_id: Some(event.task_id.clone()),
        thinking_steps,
    };
    chat_history.append_message(tab_id, message).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_settings_default_matches_spec_five_minute_ttl() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.idle_executor_ttl, Duration::from_secs(300));
    }

    #[test]
    fn hello_message_deserializes_with_snake_case_tag() {
        let msg: PortMessage = serde_json::from_str(r#"{"type":"hello","tab_id":7}"#).unwrap();
        match msg {
            PortMessage::Hello { tab_id } => assert_eq!(tab_id, TabId(7)),
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn port_response_connected_serializes_with_type_tag() {
        let response = PortResponse::Connected {
            session_id: "abc".into(),
            server_version: "1.0",
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"session_id\":\"abc\""));
    }

    #[test]
    fn new_task_message_round_trips_through_json() {
        let msg = PortMessage::NewTask {
            tab_id: TabId(1),
            task: "open example.com".to_string(),
            task_id: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: PortMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            PortMessage::NewTask { tab_id, task, task_id } => {
                assert_eq!(tab_id, TabId(1));
                assert_eq!(task, "open example.com");
                assert!(task_id.is_none());
            }
            other => panic!("expected new_task, got {other:?}"),
        }
    }

    #[test]
    fn new_task_message_accepts_a_client_supplied_task_id() {
        let msg: PortMessage = serde_json::from_str(
            r#"{"type":"new_task","tab_id":1,"task":"open example.com","task_id":"abc-123"}"#,
        )
        .unwrap();
        match msg {
            PortMessage::NewTask { task_id, .. } => {
                assert_eq!(task_id, Some(TaskId("abc-123".to_string())));
            }
            other => panic!("expected new_task, got {other:?}"),
        }
    }

    async fn mock_controller() -> BackgroundController {
        let context = Arc::new(
            AppContext::new("controller-tests".into(), None, &[])
                .await
                .expect("app context"),
        );
        BackgroundController::new(
            context,
            Some(LlmProviderSelection::Mock),
            LlmProviderConfig::default(),
            ExecutorSettings::default(),
            FirewallConfig::disabled(),
        )
    }

    #[tokio::test]
    async fn follow_up_task_for_an_idle_executor_starts_immediately() {
        let controller = mock_controller().await;
        let tab_id = TabId(100);

        let response = controller
            .dispatch(PortMessage::FollowUpTask {
                tab_id,
                task: "book a flight".to_string(),
                task_id: None,
            })
            .await;

        assert!(matches!(response, PortResponse::TaskAccepted { .. }));
    }

    #[tokio::test]
    async fn check_executor_status_reports_the_tab_it_was_asked_about() {
        let controller = mock_controller().await;
        let tab_id = TabId(101);

        let response = controller
            .dispatch(PortMessage::CheckExecutorStatus { tab_id })
            .await;

        match response {
            PortResponse::Status(status) => assert_eq!(status.tab_id, tab_id),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_thinking_steps_on_a_fresh_tab_is_empty() {
        let controller = mock_controller().await;
        let tab_id = TabId(102);

        let response = controller
            .dispatch(PortMessage::GetThinkingSteps { tab_id })
            .await;

        match response {
            PortResponse::ThinkingSteps { steps } => assert!(steps.is_empty()),
            other => panic!("expected thinking_steps, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hello_and_heartbeat_are_acknowledged_without_creating_work() {
        let controller = mock_controller().await;
        let tab_id = TabId(103);

        let hello = controller.dispatch(PortMessage::Hello { tab_id }).await;
        assert!(matches!(hello, PortResponse::HeartbeatAck));

        let heartbeat = controller.dispatch(PortMessage::Heartbeat).await;
        assert!(matches!(heartbeat, PortResponse::HeartbeatAck));
    }
}
