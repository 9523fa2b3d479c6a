//! Tab primitives - Open, activate, and close browser tabs (CDP targets)
//!
//! Tab index here means "position in the current CDP target listing",
//! resolved fresh on every call rather than a stable id the agent tracks
//! across steps, mirroring how `browser-use`-style agents enumerate tabs.

use crate::{
    errors::ActionError,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, PostSignals},
    ExecCtx,
};
use cdp_adapter::PageId;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Execute switch_tab primitive
///
/// Activates the CDP target at `tab_index` (0-based, ordered by page id) so
/// it becomes the foreground tab. Does not change which page subsequent
/// actions in this step target; callers that need that must re-resolve
/// their route against the returned page.
pub async fn execute_switch_tab(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    tab_index: usize,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, tab_index = tab_index, "Executing switch_tab primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    primitives.ensure_adapter_ready().await?;
    let page = nth_page(primitives, tab_index)?;

    primitives
        .adapter()
        .activate_page(page)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    let post_signals = capture_post_signals_for_page(primitives, ctx, page).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(action_id = %ctx.action_id, latency_ms = latency_ms, "Switch tab completed successfully");

    Ok(ActionReport::success(started_at, latency_ms).with_signals(post_signals))
}

/// Execute open_tab primitive
///
/// Opens a new CDP target, navigating it to `url` if given (otherwise
/// `about:blank`), and returns the new page's id as `extracted_content`.
pub async fn execute_open_tab(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    url: Option<&str>,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, url = ?url, "Executing open_tab primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    primitives.ensure_adapter_ready().await?;
    let target_url = url.unwrap_or("about:blank");
    let page = primitives
        .adapter()
        .create_page(target_url)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    let post_signals = capture_post_signals_for_page(primitives, ctx, page).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(action_id = %ctx.action_id, latency_ms = latency_ms, page = ?page, "Open tab completed successfully");

    Ok(ActionReport::success(started_at, latency_ms)
        .with_signals(post_signals)
        .with_extracted_content(page.0.to_string()))
}

/// Execute close_tab primitive
///
/// Closes the CDP target at `tab_index` (0-based, ordered by page id).
pub async fn execute_close_tab(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    tab_index: usize,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, tab_index = tab_index, "Executing close_tab primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    primitives.ensure_adapter_ready().await?;
    let page = nth_page(primitives, tab_index)?;

    primitives
        .adapter()
        .close_page(page)
        .await
        .map_err(|err| ActionError::CdpIo(err.to_string()))?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    info!(action_id = %ctx.action_id, latency_ms = latency_ms, "Close tab completed successfully");

    Ok(ActionReport::success(started_at, latency_ms))
}

fn nth_page(primitives: &DefaultActionPrimitives, index: usize) -> Result<PageId, ActionError> {
    let mut pages: Vec<PageId> = primitives
        .adapter()
        .registry()
        .iter()
        .into_iter()
        .map(|(page, _)| page)
        .collect();
    pages.sort_by_key(|page| page.0);

    pages.get(index).copied().ok_or_else(|| {
        ActionError::AnchorNotFound(format!(
            "tab index {} out of range ({} tabs open)",
            index,
            pages.len()
        ))
    })
}

async fn capture_post_signals_for_page(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    page: PageId,
) -> PostSignals {
    let route = soulbrowser_core_types::ExecRoute::new(
        ctx.route.session.clone(),
        soulbrowser_core_types::PageId(page.0.to_string()),
        ctx.route.frame.clone(),
    );
    let page_ctx = ExecCtx::new(
        route,
        ctx.deadline,
        ctx.cancel_token.clone(),
        ctx.policy_view.clone(),
    );
    match primitives.capture_page_signals(&page_ctx).await {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to capture tab signals: {}", err);
            PostSignals::default()
        }
    }
}
