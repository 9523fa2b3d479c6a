use crate::errors::{AdapterError, AdapterResult};

#[allow(dead_code)]
pub async fn serve_mcp() -> AdapterResult<()> {
    Err(AdapterError::NotImplemented("mcp"))
}
