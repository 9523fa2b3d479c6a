//! Re-export of the OpenAI LLM provider backend.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::openai`.

pub use soulbrowser_kernel::llm::openai::*;
