//! Re-export of the on-disk LLM plan cache.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::cache`.

pub use soulbrowser_kernel::llm::cache::*;
