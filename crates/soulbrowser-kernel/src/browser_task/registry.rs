//! Typed catalog of the atomic page actions the Navigator may call.
//!
//! A specialization of the `tool_registry::ToolDescriptor` pattern (name →
//! description → required/optional fields) for the fixed set of actions
//! `agent_core::agent_loop::AgentActionType` already defines, rather than a
//! new open-ended registry abstraction.

use agent_core::{AgentAction, AgentActionType};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::tool_registry::ToolDescriptor;

/// The fixed catalog of actions the Navigator's structured output may
/// reference, exposed as a JSON tool-schema document for the model prompt.
pub static ACTION_CATALOG: Lazy<Vec<ToolDescriptor>> = Lazy::new(|| {
    vec![
        ToolDescriptor::new(
            "navigate",
            "Navigate",
            "Navigate the current tab to a URL.",
            "Use when the goal requires visiting a new page.",
            &["url"],
            &[],
            None,
            None,
            10,
        ),
        ToolDescriptor::new(
            "click",
            "Click",
            "Click an indexed interactive element.",
            "Use to activate buttons, links, or other clickable elements.",
            &["element_index"],
            &[],
            None,
            None,
            9,
        ),
        ToolDescriptor::new(
            "type_text",
            "Type text",
            "Type text into an indexed input element.",
            "Use to fill in form fields.",
            &["element_index", "text"],
            &["submit"],
            None,
            None,
            9,
        ),
        ToolDescriptor::new(
            "select",
            "Select option",
            "Choose an option from an indexed select element.",
            "Use for dropdown/select controls.",
            &["element_index", "value"],
            &[],
            None,
            None,
            7,
        ),
        ToolDescriptor::new(
            "scroll",
            "Scroll",
            "Scroll the page or to an indexed element.",
            "Use to bring off-screen content into view.",
            &[],
            &["direction", "amount", "element_index"],
            None,
            None,
            5,
        ),
        ToolDescriptor::new(
            "wait",
            "Wait",
            "Pause for a fixed duration.",
            "Use sparingly, only when a page needs time to settle.",
            &[],
            &["ms"],
            None,
            None,
            3,
        ),
        ToolDescriptor::new(
            "done",
            "Done",
            "Signal that the task is finished.",
            "Use once the goal has been satisfied or is unreachable.",
            &["done_success"],
            &["done_text"],
            None,
            None,
            10,
        ),
        ToolDescriptor::new(
            "search_google",
            "Search Google",
            "Navigate to a Google search results page for a query.",
            "Use to find information or a starting URL before navigating further.",
            &["query"],
            &[],
            None,
            None,
            8,
        ),
        ToolDescriptor::new(
            "send_keys",
            "Send keys",
            "Dispatch a key combo (e.g. 'Enter', 'ctrl+a') to the focused element.",
            "Use for keyboard shortcuts or submitting a form without a clickable button.",
            &["keys"],
            &[],
            None,
            None,
            6,
        ),
        ToolDescriptor::new(
            "scroll_to_text",
            "Scroll to text",
            "Scroll until an element containing the given text is visible.",
            "Use when the target content's position on the page is unknown.",
            &["text"],
            &[],
            None,
            None,
            5,
        ),
        ToolDescriptor::new(
            "extract_content",
            "Extract content",
            "Extract readable page content relevant to a goal.",
            "Use to pull structured or summarized text out of the current page.",
            &["goal"],
            &[],
            None,
            None,
            6,
        ),
        ToolDescriptor::new(
            "get_dropdown_options",
            "List dropdown options",
            "List the options of an indexed dropdown/listbox element.",
            "Use before selecting an option to discover what is available.",
            &["element_index"],
            &[],
            None,
            None,
            4,
        ),
        ToolDescriptor::new(
            "select_dropdown_option",
            "Select dropdown option",
            "Select a dropdown option by its visible text.",
            "Use for custom dropdown widgets that aren't native <select> elements.",
            &["element_index", "value"],
            &[],
            None,
            None,
            7,
        ),
        ToolDescriptor::new(
            "switch_tab",
            "Switch tab",
            "Switch the active tab to the one at the given index.",
            "Use when the task requires acting on a different already-open tab.",
            &["tab_index"],
            &[],
            None,
            None,
            6,
        ),
        ToolDescriptor::new(
            "open_tab",
            "Open tab",
            "Open a new tab, optionally navigating it to a URL.",
            "Use when the task needs a fresh tab alongside the current one.",
            &[],
            &["url"],
            None,
            None,
            6,
        ),
        ToolDescriptor::new(
            "close_tab",
            "Close tab",
            "Close the tab at the given index.",
            "Use to clean up tabs that are no longer needed.",
            &["tab_index"],
            &[],
            None,
            None,
            4,
        ),
    ]
});

/// Result of validating an `AgentAction` against the catalog before it is
/// dispatched to the page.
#[derive(Debug, Clone, Serialize)]
pub struct ActionValidationError {
    pub action: String,
    pub reason: String,
}

impl std::fmt::Display for ActionValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid action '{}': {}", self.action, self.reason)
    }
}

impl std::error::Error for ActionValidationError {}

/// Validate an action's parameters against its catalog entry. Unknown
/// actions and out-of-range parameters are rejected here, before the page is
/// ever touched.
pub fn validate_action(action: &AgentAction) -> Result<(), ActionValidationError> {
    let name = catalog_name(action.action_type);
    let err = |reason: &str| ActionValidationError {
        action: name.to_string(),
        reason: reason.to_string(),
    };

    match action.action_type {
        AgentActionType::Navigate => {
            if action.params.url.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'url'"));
            }
        }
        AgentActionType::Click => {
            if action.element_index.is_none() {
                return Err(err("missing required field 'element_index'"));
            }
        }
        AgentActionType::TypeText => {
            if action.element_index.is_none() {
                return Err(err("missing required field 'element_index'"));
            }
            if action.params.text.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'text'"));
            }
        }
        AgentActionType::Select => {
            if action.element_index.is_none() {
                return Err(err("missing required field 'element_index'"));
            }
            if action.params.value.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'value'"));
            }
        }
        AgentActionType::Scroll | AgentActionType::Wait => {}
        AgentActionType::Done => {
            if action.params.done_success.or(action.params.success).is_none() {
                return Err(err("missing required field 'done_success'"));
            }
        }
        AgentActionType::SearchGoogle => {
            if action.params.query.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'query'"));
            }
        }
        AgentActionType::SendKeys => {
            if action.params.keys.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'keys'"));
            }
        }
        AgentActionType::ScrollToText => {
            if action.params.text.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'text'"));
            }
        }
        AgentActionType::ExtractContent => {
            if action.params.goal.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'goal'"));
            }
        }
        AgentActionType::GetDropdownOptions => {
            if action.element_index.is_none() {
                return Err(err("missing required field 'element_index'"));
            }
        }
        AgentActionType::SelectDropdownOption => {
            if action.element_index.is_none() {
                return Err(err("missing required field 'element_index'"));
            }
            if action.params.value.as_deref().unwrap_or("").is_empty() {
                return Err(err("missing required field 'value'"));
            }
        }
        AgentActionType::SwitchTab => {
            if action.params.tab_index.is_none() {
                return Err(err("missing required field 'tab_index'"));
            }
        }
        AgentActionType::OpenTab => {}
        AgentActionType::CloseTab => {
            if action.params.tab_index.is_none() {
                return Err(err("missing required field 'tab_index'"));
            }
        }
    }

    Ok(())
}

fn catalog_name(action_type: AgentActionType) -> &'static str {
    match action_type {
        AgentActionType::Navigate => "navigate",
        AgentActionType::Click => "click",
        AgentActionType::TypeText => "type_text",
        AgentActionType::Select => "select",
        AgentActionType::Scroll => "scroll",
        AgentActionType::Wait => "wait",
        AgentActionType::Done => "done",
        AgentActionType::SearchGoogle => "search_google",
        AgentActionType::SendKeys => "send_keys",
        AgentActionType::ScrollToText => "scroll_to_text",
        AgentActionType::ExtractContent => "extract_content",
        AgentActionType::GetDropdownOptions => "get_dropdown_options",
        AgentActionType::SelectDropdownOption => "select_dropdown_option",
        AgentActionType::SwitchTab => "switch_tab",
        AgentActionType::OpenTab => "open_tab",
        AgentActionType::CloseTab => "close_tab",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::AgentActionParams;

    #[test]
    fn navigate_without_url_is_rejected() {
        let action = AgentAction {
            action_type: AgentActionType::Navigate,
            element_index: None,
            params: AgentActionParams::default(),
        };
        assert!(validate_action(&action).is_err());
    }

    #[test]
    fn click_with_index_is_accepted() {
        let action = AgentAction {
            action_type: AgentActionType::Click,
            element_index: Some(3),
            params: AgentActionParams::default(),
        };
        assert!(validate_action(&action).is_ok());
    }

    #[test]
    fn catalog_lists_every_action_type() {
        assert_eq!(ACTION_CATALOG.len(), 16);
    }
}
