//! Per-tab autonomous task execution: Planner/Navigator/Validator loop,
//! background controller, and the WebSocket port protocol that drives it.
//!
//! This module sits above `agent::agent_loop_executor` (the Navigator) and
//! `agent_core::LlmProvider::{reflect,validate}` (Planner/Validator), adding
//! the per-tab lifecycle, cooperative cancellation, follow-up queueing and
//! event stream that the extension-style control surface in
//! `server::router::ws` exposes to clients.

pub mod agents;
pub mod browser_context;
pub mod chat_history;
pub mod controller;
pub mod events;
pub mod executor;
pub mod firewall;
pub mod model;
pub mod registry;

pub use browser_context::{BrowserContext, BrowserContextRegistry};
pub use chat_history::{ChatHistoryStore, Message, MessageType, Session};
pub use controller::{BackgroundController, ControllerSettings, PortMessage, PortResponse};
pub use events::{Actor, ExecutionEvent, ExecutionState};
pub use executor::{ExecutorSettings, TaskExecutor};
pub use firewall::FirewallConfig;
pub use model::{ChatTurn, TabId, Task, ThinkingStep};
