//! Re-exports of the core browser data types.
//!
//! The canonical definitions live in the `soulbrowser-kernel` engine crate;
//! this module keeps the historical `soulbrowser_cli::types` path alive for
//! the integration test suite and external embedders of this library crate.

pub use soulbrowser_kernel::types::*;
