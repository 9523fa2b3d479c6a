//! Thin glue around the three roles the executor drives each task through.
//!
//! The Navigator is the existing `agent::agent_loop_executor` step loop
//! verbatim (it already produces `current_state{evaluation_previous_goal,
//! memory, next_goal} + action[]`); Planner and Validator are new calls
//! against the same `agent_core::LlmProvider` trait (`reflect`/`validate`),
//! following the same request/state/history shape the Navigator already
//! uses.

use std::sync::Arc;

use agent_core::{
    AgentHistoryEntry, AgentRequest, BrowserStateSummary, LlmProvider, PlannerReflection,
    ScrollPosition, ValidatorVerdict,
};
use anyhow::{anyhow, Result};
use tracing::debug;

/// Ask the Planner whether the task is done and, if not, what the Navigator
/// should focus on next. Invoked at task start and every `planning_interval`
/// navigator steps.
pub async fn reflect(
    llm: &Arc<dyn LlmProvider>,
    request: &AgentRequest,
    current_url: &str,
    current_title: Option<&str>,
    history: &[AgentHistoryEntry],
) -> Result<PlannerReflection> {
    let state = minimal_state(current_url, current_title);
    let verdict = llm
        .reflect(request, &state, history)
        .await
        .map_err(|err| anyhow!("planner reflection failed: {err}"))?;
    debug!(
        task_id = %request.task_id.0,
        done = verdict.done,
        web_task = verdict.web_task,
        "planner reflection"
    );
    Ok(verdict)
}

/// Ask the Validator whether a proposed result actually satisfies the goal.
pub async fn validate(
    llm: &Arc<dyn LlmProvider>,
    request: &AgentRequest,
    current_url: &str,
    result_text: &str,
) -> Result<ValidatorVerdict> {
    let state = minimal_state(current_url, None);
    let verdict = llm
        .validate(request, &state, result_text)
        .await
        .map_err(|err| anyhow!("validator check failed: {err}"))?;
    debug!(
        task_id = %request.task_id.0,
        is_valid = verdict.is_valid,
        "validator verdict"
    );
    Ok(verdict)
}

/// Build the minimal `BrowserStateSummary` the Planner/Validator calls need.
/// Unlike the Navigator, neither role needs the indexed element tree, so
/// this skips DOM sampling entirely rather than re-observing the page.
fn minimal_state(url: &str, title: Option<&str>) -> BrowserStateSummary {
    BrowserStateSummary {
        url: url.to_string(),
        title: title.map(|t| t.to_string()),
        element_tree: String::new(),
        selector_map: Default::default(),
        screenshot_base64: None,
        scroll_position: ScrollPosition::default(),
        focused_element: None,
        element_count: 0,
    }
}
