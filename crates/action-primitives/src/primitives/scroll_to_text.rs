//! Scroll-to-text primitive - Scroll the page so a text snippet is visible

use crate::{
    errors::ActionError,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, ExecCtx, PostSignals},
};
use cdp_adapter::Cdp;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Execute scroll_to_text primitive
///
/// Finds the first element (including inside iframes of the same origin)
/// whose text content contains `text` and scrolls it into view. Fails with
/// [`ActionError::AnchorNotFound`] when no match exists anywhere on the page.
///
/// Steps:
/// 1. Validate context and text
/// 2. Walk the DOM for the first matching text node's element
/// 3. Scroll it into view
/// 4. Capture post-signals
/// 5. Generate action report
pub async fn execute_scroll_to_text(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    text: &str,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, text = %text, "Executing scroll_to_text primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }
    if text.trim().is_empty() {
        return Err(ActionError::Internal(
            "scroll_to_text needs a non-empty text snippet".to_string(),
        ));
    }

    primitives.ensure_adapter_ready().await?;
    let context = primitives.resolve_context(ctx).await?;

    let needle = serde_json::to_string(text)
        .map_err(|err| ActionError::Internal(format!("invalid text encoding: {}", err)))?;

    let expression = format!(
        "(() => {{\n            const needle = {needle}.toLowerCase();\n            const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null);\n            let node;\n            while ((node = walker.nextNode())) {{\n                const value = (node.nodeValue || '').trim();\n                if (value && value.toLowerCase().includes(needle)) {{\n                    const el = node.parentElement;\n                    if (el) {{\n                        el.scrollIntoView({{ behavior: 'smooth', block: 'center', inline: 'nearest' }});\n                        return {{ status: 'ok' }};\n                    }}\n                }}\n            }}\n            return {{ status: 'missing' }};\n        }})()",
        needle = needle,
    );

    let value = primitives
        .adapter()
        .evaluate_script_in_context(&context, &expression)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    match value
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
    {
        "ok" => {}
        "missing" => {
            return Err(ActionError::AnchorNotFound(format!(
                "no element containing text '{}' was found",
                text
            )))
        }
        other => {
            return Err(ActionError::Internal(format!(
                "unexpected scroll_to_text status: {}",
                other
            )))
        }
    }

    debug!("Waiting for smooth scroll animation");
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let post_signals = capture_post_signals(primitives, ctx).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(action_id = %ctx.action_id, latency_ms = latency_ms, "Scroll to text completed successfully");

    Ok(ActionReport::success(started_at, latency_ms).with_signals(post_signals))
}

async fn capture_post_signals(primitives: &DefaultActionPrimitives, ctx: &ExecCtx) -> PostSignals {
    match primitives.capture_page_signals(ctx).await {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to capture scroll_to_text signals: {}", err);
            PostSignals::default()
        }
    }
}
