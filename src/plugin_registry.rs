//! Re-exports of the browser extension/plugin registry.
//!
//! Canonical implementation lives in `soulbrowser-kernel::plugin_registry`.

pub use soulbrowser_kernel::plugin_registry::*;
