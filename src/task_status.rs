//! Re-exports of task status/history tracking types.
//!
//! Canonical implementation lives in `soulbrowser-kernel::task_status`.

pub use soulbrowser_kernel::task_status::*;
