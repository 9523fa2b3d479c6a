//! Re-exports of the request/response interceptor pipeline.
//!
//! Canonical implementation lives in `soulbrowser-kernel::interceptors`.

pub use soulbrowser_kernel::interceptors::*;
