//! Re-export of the upfront plan-generation prompt builder.
//!
//! Canonical implementation lives in `soulbrowser-kernel::llm::prompt`.

pub use soulbrowser_kernel::llm::prompt::*;
