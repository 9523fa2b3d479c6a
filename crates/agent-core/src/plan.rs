//! Plan model produced by planners and consumed by the flow converter.
//!
//! An `AgentPlan` is an ordered list of `AgentPlanStep`s, each wrapping a single
//! `AgentTool` invocation plus optional post-condition `AgentValidation`s. This
//! is the intermediate representation between planning (LLM or rule-based) and
//! execution (`convert::plan_to_flow` lowers it into an `action_flow::Flow`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbrowser_core_types::TaskId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPlanMeta {
    #[serde(default)]
    pub rationale: Vec<String>,
    #[serde(default)]
    pub risk_assessment: Vec<String>,
    #[serde(default)]
    pub vendor_context: HashMap<String, Value>,
    #[serde(default)]
    pub overlays: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub task_id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<AgentPlanStep>,
    #[serde(default)]
    pub meta: AgentPlanMeta,
}

impl AgentPlan {
    pub fn new(task_id: TaskId, title: impl Into<String>) -> Self {
        Self {
            task_id,
            title: title.into(),
            description: String::new(),
            steps: Vec::new(),
            meta: AgentPlanMeta::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_meta(mut self, meta: AgentPlanMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn push_step(&mut self, step: AgentPlanStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlanStep {
    pub id: String,
    pub title: String,
    pub tool: AgentTool,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub validations: Vec<AgentValidation>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AgentPlanStep {
    pub fn new(id: impl Into<String>, title: impl Into<String>, tool: AgentTool) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tool,
            detail: None,
            validations: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_validation(mut self, validation: AgentValidation) -> Self {
        self.validations.push(validation);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitMode {
    None,
    DomReady,
    Idle,
}

impl Default for WaitMode {
    fn default() -> Self {
        WaitMode::DomReady
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTool {
    pub kind: AgentToolKind,
    #[serde(default)]
    pub wait: WaitMode,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl AgentTool {
    pub fn new(kind: AgentToolKind) -> Self {
        Self {
            kind,
            wait: WaitMode::default(),
            timeout_ms: None,
        }
    }

    pub fn with_wait(mut self, wait: WaitMode) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AgentToolKind {
    Navigate {
        url: String,
    },
    Click {
        locator: AgentLocator,
    },
    TypeText {
        locator: AgentLocator,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    Select {
        locator: AgentLocator,
        value: String,
        #[serde(default)]
        method: Option<String>,
    },
    Scroll {
        target: AgentScrollTarget,
    },
    Wait {
        condition: AgentWaitCondition,
    },
    SendKeys {
        keys: String,
    },
    ScrollToText {
        text: String,
    },
    ExtractContent {
        goal: String,
    },
    GetDropdownOptions {
        locator: AgentLocator,
    },
    SelectDropdownOption {
        locator: AgentLocator,
        text: String,
    },
    SwitchTab {
        tab_index: usize,
    },
    OpenTab {
        url: Option<String>,
    },
    CloseTab {
        tab_index: usize,
    },
    SearchGoogle {
        query: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentLocator {
    Css(String),
    Aria { role: String, name: String },
    Text { content: String, exact: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentScrollTarget {
    Top,
    Bottom,
    Selector(AgentLocator),
    Pixels(i32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentWaitCondition {
    ElementVisible(AgentLocator),
    ElementHidden(AgentLocator),
    UrlMatches(String),
    UrlEquals(String),
    TitleMatches(String),
    NetworkIdle(u64),
    Duration(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentValidation {
    pub description: String,
    pub condition: AgentWaitCondition,
}

impl AgentValidation {
    pub fn new(description: impl Into<String>, condition: AgentWaitCondition) -> Self {
        Self {
            description: description.into(),
            condition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_builder_collects_steps() {
        let mut plan = AgentPlan::new(TaskId::new(), "demo").with_description("demo plan");
        plan.push_step(AgentPlanStep::new(
            "step-1",
            "go to url",
            AgentTool::new(AgentToolKind::Navigate {
                url: "https://example.com".into(),
            }),
        ));

        assert_eq!(plan.steps.len(), 1);
        assert!(!plan.is_empty());
    }

    #[test]
    fn wait_mode_defaults_to_dom_ready() {
        assert_eq!(WaitMode::default(), WaitMode::DomReady);
    }
}
