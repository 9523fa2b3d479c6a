//! Guardrail keyword/domain derivation, delegated to `agent-core`'s implementation
//! so the planner-stage auditor and the agent loop controller stay in sync.

pub use agent_core::guardrails::{derive_guardrail_domains, derive_guardrail_keywords};
