//! Re-exports of structured-output schema validation helpers.
//!
//! Canonical implementation lives in `soulbrowser-kernel::structured_output`.

pub use soulbrowser_kernel::structured_output::*;
