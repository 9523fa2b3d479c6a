//! Search-google primitive - Navigate to a Google search results page

use crate::{
    errors::ActionError,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, ExecCtx, WaitTier},
};

/// Execute search_google primitive
///
/// Builds a Google search results URL for `query` and delegates to
/// [`crate::primitives::navigate::execute_navigate`], waiting for the
/// results page to reach DOM-ready the same way a direct `go_to_url` would.
pub async fn execute_search_google(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    query: &str,
) -> Result<ActionReport, ActionError> {
    if query.trim().is_empty() {
        return Err(ActionError::Internal(
            "search_google needs a non-empty query".to_string(),
        ));
    }

    let encoded = url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>();
    let search_url = format!("https://www.google.com/search?q={}", encoded);

    crate::primitives::navigate::execute_navigate(primitives, ctx, &search_url, WaitTier::DomReady)
        .await
}
