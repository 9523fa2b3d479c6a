//! Re-export of the LLM JSON plan schema parser.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::schema`.

pub use soulbrowser_kernel::llm::schema::*;
