//! Dropdown primitives - Inspect and choose options on a `<select>`/listbox

use crate::{
    errors::ActionError,
    locator::apply_resolution_metadata,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, AnchorDescriptor, ExecCtx, PostSignals, SelectMethod, WaitTier},
};
use cdp_adapter::Cdp;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Execute get_dropdown_options primitive
///
/// Resolves `anchor` to a `<select>`/listbox element and returns its options
/// (label and value, in document order) as JSON in `extracted_content`.
///
/// Steps:
/// 1. Validate anchor and context
/// 2. Resolve element via locator
/// 3. Read its options via script evaluation
/// 4. Capture post-signals
/// 5. Generate action report
pub async fn execute_get_dropdown_options(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    anchor: &AnchorDescriptor,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(
        action_id = %ctx.action_id,
        anchor = %anchor.to_string(),
        "Executing get_dropdown_options primitive"
    );

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    debug!("Resolving select element via anchor: {}", anchor.to_string());
    let resolved = primitives.resolve_anchor_selector(ctx, anchor).await?;
    let selector = resolved.selector.clone();
    let context = resolved.context.clone();

    let selector_literal = serde_json::to_string(&selector)
        .map_err(|err| ActionError::Internal(format!("invalid selector encoding: {}", err)))?;

    let expression = format!(
        "(() => {{\n            const root = document.querySelector({selector});\n            if (!root) {{ return {{ status: 'missing' }}; }}\n            const options = Array.from(root.options || []).map(opt => ({{ text: opt.text, value: opt.value, selected: !!opt.selected }}));\n            return {{ status: 'ok', options }};\n        }})()",
        selector = selector_literal,
    );

    let value = primitives
        .adapter()
        .evaluate_script_in_context(&context, &expression)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    let options = match value
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
    {
        "ok" => value.get("options").cloned().unwrap_or(serde_json::json!([])),
        "missing" => {
            return Err(ActionError::AnchorNotFound(
                "dropdown element not found".to_string(),
            ))
        }
        other => {
            return Err(ActionError::Internal(format!(
                "unexpected get_dropdown_options status: {}",
                other
            )))
        }
    };

    let extracted = serde_json::to_string(&options)
        .map_err(|err| ActionError::Internal(format!("failed to encode options: {}", err)))?;

    let post_signals = capture_post_signals(primitives, ctx).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(action_id = %ctx.action_id, latency_ms = latency_ms, "Get dropdown options completed successfully");

    let report = ActionReport::success(started_at, latency_ms)
        .with_signals(post_signals)
        .with_extracted_content(extracted);
    Ok(apply_resolution_metadata(report, &resolved))
}

/// Execute select_dropdown_option primitive
///
/// Thin wrapper over [`crate::primitives::select::execute_select`] that
/// always selects by visible text: the element is addressed by index via
/// `anchor`, the option by its visible text in `text`.
pub async fn execute_select_dropdown_option(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    anchor: &AnchorDescriptor,
    text: &str,
) -> Result<ActionReport, ActionError> {
    crate::primitives::select::execute_select(
        primitives,
        ctx,
        anchor,
        SelectMethod::Text,
        text,
        WaitTier::DomReady,
    )
    .await
}

async fn capture_post_signals(primitives: &DefaultActionPrimitives, ctx: &ExecCtx) -> PostSignals {
    match primitives.capture_page_signals(ctx).await {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to capture get_dropdown_options signals: {}", err);
            PostSignals::default()
        }
    }
}
