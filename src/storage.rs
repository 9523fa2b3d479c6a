//! Re-exports of the browser event/session storage backends.
//!
//! Canonical implementation lives in `soulbrowser-kernel::storage`.

pub use soulbrowser_kernel::storage::*;
