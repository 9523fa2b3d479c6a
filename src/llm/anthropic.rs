//! Re-export of the Anthropic LLM provider backend.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::anthropic`.

pub use soulbrowser_kernel::llm::anthropic::*;
