//! Extract-content primitive - Pull readable text content off the current page

use crate::{
    errors::ActionError,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, ExecCtx, PostSignals},
};
use cdp_adapter::Cdp;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

const MAX_EXTRACTED_CHARS: usize = 8_000;

/// Execute extract_content primitive
///
/// Pulls the page's visible text (scripts, styles, and hidden elements
/// stripped) and returns it as `extracted_content` on the report. `goal`
/// is carried through for the caller's downstream summarization; this
/// primitive itself does no goal-directed filtering, matching the rest of
/// the action layer's "mechanical primitive, judgment lives in the agent"
/// split.
///
/// Steps:
/// 1. Validate context
/// 2. Serialize the page's visible text via script evaluation
/// 3. Truncate to a bounded size
/// 4. Capture post-signals
/// 5. Generate action report
pub async fn execute_extract_content(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    goal: &str,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, goal = %goal, "Executing extract_content primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    primitives.ensure_adapter_ready().await?;
    let context = primitives.resolve_context(ctx).await?;

    let expression = r#"(() => {
        const skip = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE']);
        const isVisible = (el) => {
            const style = window.getComputedStyle(el);
            return style.visibility !== 'hidden' && style.display !== 'none';
        };
        const lines = [];
        const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null);
        let node;
        while ((node = walker.nextNode())) {
            const parent = node.parentElement;
            if (!parent || skip.has(parent.tagName) || !isVisible(parent)) {
                continue;
            }
            const value = (node.nodeValue || '').trim();
            if (value) {
                lines.push(value);
            }
        }
        return lines.join('\n');
    })()"#;

    let value = primitives
        .adapter()
        .evaluate_script_in_context(&context, expression)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    let mut text = value.as_str().unwrap_or_default().to_string();
    if text.len() > MAX_EXTRACTED_CHARS {
        text.truncate(MAX_EXTRACTED_CHARS);
        text.push_str("... [truncated]");
    }

    let post_signals = capture_post_signals(primitives, ctx).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(
        action_id = %ctx.action_id,
        latency_ms = latency_ms,
        extracted_len = text.len(),
        "Extract content completed successfully"
    );

    Ok(ActionReport::success(started_at, latency_ms)
        .with_signals(post_signals)
        .with_extracted_content(text))
}

async fn capture_post_signals(primitives: &DefaultActionPrimitives, ctx: &ExecCtx) -> PostSignals {
    match primitives.capture_page_signals(ctx).await {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to capture extract_content signals: {}", err);
            PostSignals::default()
        }
    }
}
