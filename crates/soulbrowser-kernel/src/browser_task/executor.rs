//! Per-tab task state machine: drives Planner → Navigator → Validator for
//! one task at a time, queues follow-ups, and broadcasts execution events.
//!
//! Grounded in `agent_core::agent_loop::AgentLoopController` (the
//! observe-think-act step loop this generalizes) and
//! `agent::agent_loop_executor::execute_agent_loop_with_hook`, which already
//! implements the Navigator's per-step dispatch against the real page; this
//! module adds the IDLE/RUNNING/PAUSED/CANCELLED/SUCCEEDED/FAILED envelope,
//! cooperative cancellation, pause/resume, and the follow-up queue around it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_core::{AgentRequest, ConversationRole, LlmProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::agent::agent_loop_executor::{
    execute_agent_loop_with_hooks, AgentLoopExecutionOptions, PlanCheckFuture, PlanCheckOutcome,
};
use crate::app_context::AppContext;

use super::agents;
use super::events::{Actor, EventKind, ExecutionEvent, ExecutionState};
use super::firewall::FirewallConfig;
use super::model::{ChatTurn, TabId, Task, TaskOutcome, ThinkingStep};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_THINKING_STEPS: usize = 200;

/// Whether Navigator step `step_number` (1-based) lands on a Planner
/// re-invocation — every `planning_interval` navigator steps. Step 0 never
/// recurs here since the Planner already ran once at task start.
fn is_planning_checkpoint(step_number: u32, planning_interval: u32) -> bool {
    planning_interval > 0 && step_number > 0 && step_number % planning_interval == 0
}

/// Read-only settings snapshot taken at executor setup; changes to the
/// underlying config take effect only for the next task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorSettings {
    pub max_steps: u32,
    pub max_failures: u32,
    pub max_actions_per_step: u32,
    pub use_vision: bool,
    pub use_vision_for_planner: bool,
    pub planning_interval: u32,
    pub min_wait_page_load_ms: u64,
    pub display_highlights: bool,
    pub replay_historical_tasks: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_failures: 3,
            max_actions_per_step: 3,
            use_vision: false,
            use_vision_for_planner: false,
            planning_interval: 3,
            min_wait_page_load_ms: 500,
            display_highlights: true,
            replay_historical_tasks: true,
        }
    }
}

/// Snapshot returned by `check_executor_status`.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutorStatus {
    pub tab_id: TabId,
    pub state: ExecutionState,
    pub is_running: bool,
    pub current_task: Option<Task>,
    pub queued_follow_ups: usize,
}

/// Owns the lifecycle of tasks run against a single tab.
pub struct TaskExecutor {
    tab_id: TabId,
    context: Arc<AppContext>,
    llm: Arc<dyn LlmProvider>,
    settings: ExecutorSettings,
    firewall: FirewallConfig,

    state: Arc<RwLock<ExecutionState>>,
    current_task: Arc<RwLock<Option<Task>>>,
    follow_ups: Arc<Mutex<VecDeque<Task>>>,
    thinking_steps: Arc<Mutex<Vec<ThinkingStep>>>,
    conversation: Arc<Mutex<Vec<ChatTurn>>>,

    cancel_token: Arc<Mutex<CancellationToken>>,
    paused: Arc<AtomicBool>,
    resume_notify: Arc<Notify>,

    events_tx: broadcast::Sender<ExecutionEvent>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TaskExecutor {
    pub fn new(
        tab_id: TabId,
        context: Arc<AppContext>,
        llm: Arc<dyn LlmProvider>,
        settings: ExecutorSettings,
        firewall: FirewallConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tab_id,
            context,
            llm,
            settings,
            firewall,
            state: Arc::new(RwLock::new(ExecutionState::Idle)),
            current_task: Arc::new(RwLock::new(None)),
            follow_ups: Arc::new(Mutex::new(VecDeque::new())),
            thinking_steps: Arc::new(Mutex::new(Vec::new())),
            conversation: Arc::new(Mutex::new(Vec::new())),
            cancel_token: Arc::new(Mutex::new(CancellationToken::new())),
            paused: Arc::new(AtomicBool::new(false)),
            resume_notify: Arc::new(Notify::new()),
            events_tx,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Whether this executor is safe to drop from the controller's registry:
    /// idle/terminal, nothing queued, and quiet for at least `min_idle`.
    /// Backs the background timer that deletes an idle executor after a
    /// configured quiet period.
    pub async fn idle_for_at_least(&self, min_idle: chrono::Duration) -> bool {
        if self.state().await.is_active() {
            return false;
        }
        if !self.follow_ups.lock().is_empty() {
            return false;
        }
        let quiet_since = self
            .current_task
            .read()
            .await
            .as_ref()
            .and_then(|task| task.finished_at)
            .unwrap_or(self.created_at);
        chrono::Utc::now() - quiet_since >= min_idle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn state(&self) -> ExecutionState {
        *self.state.read().await
    }

    pub fn thinking_steps(&self) -> Vec<ThinkingStep> {
        self.thinking_steps.lock().clone()
    }

    pub async fn status(&self) -> ExecutorStatus {
        let state = self.state().await;
        ExecutorStatus {
            tab_id: self.tab_id.clone(),
            state,
            is_running: state.is_active(),
            current_task: self.current_task.read().await.clone(),
            queued_follow_ups: self.follow_ups.lock().len(),
        }
    }

    /// Submit a new task. If the executor is idle (or terminal), it starts
    /// immediately on a background tokio task; otherwise it is appended to
    /// the follow-up queue and picked up once the running task finishes.
    ///
    /// `task_id` lets a client pin its own id (e.g. for replay correlation);
    /// when absent one is generated.
    pub async fn submit(
        self: &Arc<Self>,
        goal: impl Into<String>,
        task_id: Option<soulbrowser_core_types::TaskId>,
    ) -> Task {
        let mut task = Task::new(self.tab_id.clone(), goal);
        if let Some(id) = task_id {
            task = task.with_id(id);
        }
        self.enqueue_or_start(task.clone()).await;
        task
    }

    /// Submit a follow-up explicitly tied to a parent task. Per the port
    /// protocol, this always enqueues even when the executor is busy.
    pub async fn submit_follow_up(
        self: &Arc<Self>,
        goal: impl Into<String>,
        parent: soulbrowser_core_types::TaskId,
        task_id: Option<soulbrowser_core_types::TaskId>,
    ) -> Task {
        let mut task = Task::new(self.tab_id.clone(), goal).as_follow_up_of(parent);
        if let Some(id) = task_id {
            task = task.with_id(id);
        }
        self.enqueue_or_start(task.clone()).await;
        task
    }

    async fn enqueue_or_start(self: &Arc<Self>, task: Task) {
        let state = self.state().await;
        if state.accepts_new_task() {
            self.start(task);
        } else {
            self.follow_ups.lock().push_back(task);
        }
    }

    /// Cooperatively cancel the running task, if any. Idempotent.
    pub async fn cancel(&self) {
        let state = self.state().await;
        if !state.is_active() {
            return;
        }
        self.cancel_token.lock().cancel();
        self.paused.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    /// Set the pause flag, checked at the same points as cancellation.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clear the pause flag and wake the parked loop.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    fn start(self: &Arc<Self>, task: Task) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.run(task).await;
        });
    }

    fn emit(&self, event: ExecutionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn push_thinking(&self, step: ThinkingStep) {
        let mut steps = self.thinking_steps.lock();
        steps.push(step);
        if steps.len() > MAX_THINKING_STEPS {
            let overflow = steps.len() - MAX_THINKING_STEPS;
            steps.drain(0..overflow);
        }
    }

    async fn wait_if_paused(&self) -> bool {
        while self.paused.load(Ordering::SeqCst) {
            if self.cancel_token.lock().is_cancelled() {
                return true;
            }
            self.resume_notify.notified().await;
        }
        self.cancel_token.lock().is_cancelled()
    }

    async fn run(self: Arc<Self>, mut task: Task) {
        let token = CancellationToken::new();
        *self.cancel_token.lock() = token.clone();
        self.paused.store(false, Ordering::SeqCst);

        *self.state.write().await = ExecutionState::Running;
        task.status = ExecutionState::Running;
        task.started_at = Some(chrono::Utc::now());
        *self.current_task.write().await = Some(task.clone());

        self.emit(
            ExecutionEvent::new(self.tab_id.clone(), task.id.clone(), EventKind::TaskStart, Actor::System)
                .with_message(format!("task started: {}", task.goal))
                .with_data(serde_json::json!({
                    "taskId": task.id.0,
                    "maxSteps": self.settings.max_steps,
                    "details": { "goal": task.goal },
                })),
        );

        let outcome = self.run_task_body(&task, &token).await;

        let (final_state, kind) = match &outcome {
            Ok(result) if result.success => (ExecutionState::Succeeded, EventKind::TaskOk),
            Ok(_) if token.is_cancelled() => (ExecutionState::Cancelled, EventKind::TaskCancel),
            Ok(_) => (ExecutionState::Failed, EventKind::TaskFail),
            Err(_) if token.is_cancelled() => (ExecutionState::Cancelled, EventKind::TaskCancel),
            Err(_) => (ExecutionState::Failed, EventKind::TaskFail),
        };

        let outcome_record = match outcome {
            Ok(result) => result,
            Err(err) => TaskOutcome {
                success: false,
                answer: None,
                reason: Some(err.to_string()),
            },
        };

        task.status = final_state;
        task.finished_at = Some(chrono::Utc::now());
        task.result = Some(outcome_record.clone());
        *self.current_task.write().await = Some(task.clone());

        self.emit(
            ExecutionEvent::new(self.tab_id.clone(), task.id.clone(), kind, Actor::System)
                .with_message(
                    outcome_record
                        .reason
                        .clone()
                        .unwrap_or_else(|| "task finished".to_string()),
                )
                .with_data(serde_json::json!({
                    "taskId": task.id.0,
                    "maxSteps": self.settings.max_steps,
                    "details": { "success": outcome_record.success, "answer": outcome_record.answer },
                })),
        );

        *self.state.write().await = final_state;

        self.advance_queue().await;
    }

    async fn advance_queue(self: &Arc<Self>) {
        let next = self.follow_ups.lock().pop_front();
        if let Some(task) = next {
            self.start(task);
        }
    }

    async fn run_task_body(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> anyhow::Result<TaskOutcome> {
        if self.settings.max_steps == 0 {
            self.emit(
                ExecutionEvent::new(self.tab_id.clone(), task.id.clone(), EventKind::StepMax, Actor::System)
                    .with_step(0)
                    .with_message("max steps is zero; no agent call made")
                    .with_data(serde_json::json!({
                        "taskId": task.id.0,
                        "step": 0,
                        "maxSteps": self.settings.max_steps,
                    })),
            );
            return Ok(TaskOutcome {
                success: false,
                answer: None,
                reason: Some("max steps reached before any step ran".to_string()),
            });
        }

        let mut request = AgentRequest::new(task.id.clone(), task.goal.clone());
        request.conversation = self.conversation.lock().clone();
        request.conversation.push(agent_core::ConversationTurn::new(
            ConversationRole::User,
            task.goal.clone(),
        ));

        let reflection = agents::reflect(&self.llm, &request, "about:blank", None, &[]).await?;
        self.push_thinking(ThinkingStep {
            step: 0,
            actor: Actor::Planner,
            thinking: reflection.reasoning.clone(),
            next_goal: Some(reflection.next_steps.clone()),
            created_at: chrono::Utc::now(),
        });
        self.emit(
            ExecutionEvent::new(self.tab_id.clone(), task.id.clone(), EventKind::StepOk, Actor::Planner)
                .with_step(0)
                .with_message(reflection.observation.clone())
                .with_data(serde_json::json!({
                    "taskId": task.id.0,
                    "step": 0,
                    "maxSteps": self.settings.max_steps,
                    "messageType": "planner_reflection",
                })),
        );

        if !reflection.web_task || reflection.done {
            return Ok(TaskOutcome {
                success: true,
                answer: Some(reflection.next_steps),
                reason: None,
            });
        }

        if token.is_cancelled() {
            return Ok(TaskOutcome {
                success: false,
                answer: None,
                reason: Some("cancelled before navigator started".to_string()),
            });
        }
        if self.wait_if_paused().await {
            return Ok(TaskOutcome {
                success: false,
                answer: None,
                reason: Some("cancelled while paused".to_string()),
            });
        }

        let tab_id = self.tab_id.clone();
        let task_id = task.id.clone();
        let max_steps = self.settings.max_steps;
        let events_tx = self.events_tx.clone();
        let thinking = Arc::clone(&self.thinking_steps);
        let last_url = Arc::new(parking_lot::Mutex::new("about:blank".to_string()));

        // Firewall checks now run before navigation/tab actions reach CDP,
        // inside `convert_action_to_tool`; a blocked action surfaces as an
        // `Err` from `execute_actions` rather than a step report here.
        let hook: Arc<dyn Fn(&crate::agent::agent_loop_executor::AgentLoopStepReport) + Send + Sync> = {
            let last_url = Arc::clone(&last_url);
            Arc::new(move |report| {
                *last_url.lock() = report.url.clone();
                let mut steps = thinking.lock();
                steps.push(ThinkingStep {
                    step: report.step_number,
                    actor: Actor::Navigator,
                    thinking: report.thinking.clone().unwrap_or_default(),
                    next_goal: report.next_goal.clone(),
                    created_at: chrono::Utc::now(),
                });
                if steps.len() > MAX_THINKING_STEPS {
                    let overflow = steps.len() - MAX_THINKING_STEPS;
                    steps.drain(0..overflow);
                }
                drop(steps);

                let kind = if report.result.success {
                    EventKind::ActOk
                } else {
                    EventKind::ActFail
                };
                let message = report
                    .result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| report.next_goal.clone().unwrap_or_default());
                let data = serde_json::json!({
                    "taskId": task_id.0,
                    "step": report.step_number,
                    "maxSteps": max_steps,
                    "details": {
                        "url": report.url,
                        "actions": report.actions.len(),
                    },
                });
                let _ = events_tx.send(
                    ExecutionEvent::new(tab_id.clone(), task_id.clone(), kind, Actor::Navigator)
                        .with_step(report.step_number)
                        .with_message(message)
                        .with_data(data),
                );
            })
        };

        // Re-invoke the Planner every `planning_interval` Navigator steps,
        // rather than only at task start/end: the Navigator loop itself has
        // no notion of the Planner, so the check lives in this hook, reusing
        // the same `reflect` call the task-start check above made.
        let plan_check: Option<crate::agent::agent_loop_executor::PlanCheckHook> =
            if self.settings.planning_interval > 0 {
                let llm = Arc::clone(&self.llm);
                let request_template = request.clone();
                let planning_interval = self.settings.planning_interval;
                let thinking = Arc::clone(&self.thinking_steps);
                let events_tx = self.events_tx.clone();
                let tab_id = self.tab_id.clone();
                let task_id = task.id.clone();
                let max_steps = self.settings.max_steps;
                let last_url = Arc::clone(&last_url);
                Some(Arc::new(move |step_number: u32| -> PlanCheckFuture {
                    let llm = Arc::clone(&llm);
                    let request_template = request_template.clone();
                    let thinking = Arc::clone(&thinking);
                    let events_tx = events_tx.clone();
                    let tab_id = tab_id.clone();
                    let task_id = task_id.clone();
                    let url = last_url.lock().clone();
                    Box::pin(async move {
                        if !is_planning_checkpoint(step_number, planning_interval) {
                            return Ok(PlanCheckOutcome::default());
                        }
                        let reflection =
                            agents::reflect(&llm, &request_template, &url, None, &[]).await?;
                        {
                            let mut steps = thinking.lock();
                            steps.push(ThinkingStep {
                                step: step_number,
                                actor: Actor::Planner,
                                thinking: reflection.reasoning.clone(),
                                next_goal: Some(reflection.next_steps.clone()),
                                created_at: chrono::Utc::now(),
                            });
                            if steps.len() > MAX_THINKING_STEPS {
                                let overflow = steps.len() - MAX_THINKING_STEPS;
                                steps.drain(0..overflow);
                            }
                        }
                        let _ = events_tx.send(
                            ExecutionEvent::new(
                                tab_id.clone(),
                                task_id.clone(),
                                EventKind::StepOk,
                                Actor::Planner,
                            )
                            .with_step(step_number)
                            .with_message(reflection.observation.clone())
                            .with_data(serde_json::json!({
                                "taskId": task_id.0,
                                "step": step_number,
                                "maxSteps": max_steps,
                                "messageType": "planner_reflection",
                            })),
                        );
                        if !reflection.web_task || reflection.done {
                            Ok(PlanCheckOutcome {
                                stop: true,
                                success: true,
                                result_text: Some(reflection.next_steps),
                            })
                        } else {
                            Ok(PlanCheckOutcome::default())
                        }
                    })
                }))
            } else {
                None
            };

        let options = AgentLoopExecutionOptions {
            max_steps: self.settings.max_steps,
            max_actions_per_step: self.settings.max_actions_per_step,
            enable_vision: self.settings.use_vision,
            step_timeout_ms: 30_000,
            cancel_token: Some(token.clone()),
            tab_id: Some(self.tab_id),
            firewall: Some(self.firewall.clone()),
            max_failures: self.settings.max_failures,
        };

        let report = execute_agent_loop_with_hooks(
            Arc::clone(&self.context),
            Arc::clone(&self.llm),
            &request,
            options,
            Some(hook),
            plan_check,
        )
        .await?;

        if report.cancelled {
            return Ok(TaskOutcome {
                success: false,
                answer: None,
                reason: Some("cancelled".to_string()),
            });
        }

        if report.steps_executed as u32 >= self.settings.max_steps && report.error.is_some() {
            self.emit(
                ExecutionEvent::new(self.tab_id.clone(), task.id.clone(), EventKind::StepMax, Actor::System)
                    .with_step(report.steps_executed)
                    .with_message("max navigator steps reached")
                    .with_data(serde_json::json!({
                        "taskId": task.id.0,
                        "step": report.steps_executed,
                        "maxSteps": self.settings.max_steps,
                        "details": { "error": report.error },
                    })),
            );
        }

        if !report.success {
            return Ok(TaskOutcome {
                success: false,
                answer: report.result_text,
                reason: report.error,
            });
        }

        // A mid-loop Planner stop (no Navigator step pushed for the final
        // `steps_executed` count) short-circuits straight to completion, the
        // same as the task-start reflection above — step-loop item 2 says
        // "transition to SUCCEEDED", skipping items 3-8 (including the
        // Validator) for that iteration. A Navigator `done` action, by
        // contrast, always leaves a matching history entry.
        let stopped_via_planner = report
            .history
            .last()
            .map(|entry| entry.step_number != report.steps_executed)
            .unwrap_or(true);
        if stopped_via_planner {
            return Ok(TaskOutcome {
                success: true,
                answer: report.result_text,
                reason: None,
            });
        }

        let final_text = report.result_text.clone().unwrap_or_default();
        let verdict = agents::validate(&self.llm, &request, "about:blank", &final_text).await?;
        self.push_thinking(ThinkingStep {
            step: report.steps_executed,
            actor: Actor::Validator,
            thinking: verdict.reason.clone(),
            next_goal: None,
            created_at: chrono::Utc::now(),
        });

        Ok(TaskOutcome {
            success: verdict.is_valid,
            answer: verdict.answer.or(Some(final_text)),
            reason: if verdict.is_valid {
                None
            } else {
                Some(verdict.reason)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_settings_defaults_match_spec_snapshot() {
        let settings = ExecutorSettings::default();
        assert_eq!(settings.max_steps, 50);
        assert_eq!(settings.planning_interval, 3);
        assert!(settings.replay_historical_tasks);
    }

    #[test]
    fn planning_checkpoint_lands_every_interval_steps() {
        assert!(!is_planning_checkpoint(0, 3));
        assert!(!is_planning_checkpoint(1, 3));
        assert!(!is_planning_checkpoint(2, 3));
        assert!(is_planning_checkpoint(3, 3));
        assert!(!is_planning_checkpoint(4, 3));
        assert!(is_planning_checkpoint(6, 3));
    }

    #[test]
    fn planning_checkpoint_disabled_when_interval_is_zero() {
        for step in 0..10 {
            assert!(!is_planning_checkpoint(step, 0));
        }
    }
}
