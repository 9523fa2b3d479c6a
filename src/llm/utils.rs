//! Re-export of shared LLM response parsing helpers.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::utils`.

pub use soulbrowser_kernel::llm::utils::*;
