//! Send keys primitive - Dispatch a key combo to the focused element

use crate::{
    errors::ActionError,
    primitives::DefaultActionPrimitives,
    types::{ActionReport, ExecCtx, PostSignals},
};
use cdp_adapter::Cdp;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Execute send_keys primitive
///
/// Dispatches a single key or a modifier combo (e.g. `"Enter"`, `"Escape"`,
/// `"ctrl+a"`) to `document.activeElement` via synthetic keyboard events.
/// There is no built-in waiting; callers that expect navigation as a result
/// should follow up with an explicit wait.
///
/// Steps:
/// 1. Validate context and key spec
/// 2. Parse modifiers and key name
/// 3. Dispatch keydown/keyup on the active element
/// 4. Capture post-signals
/// 5. Generate action report
pub async fn execute_send_keys(
    primitives: &DefaultActionPrimitives,
    ctx: &ExecCtx,
    keys: &str,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(action_id = %ctx.action_id, keys = %keys, "Executing send_keys primitive");

    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted("Context cancelled".to_string()));
    }
    if ctx.is_timeout() {
        return Err(ActionError::WaitTimeout(
            "Context deadline exceeded".to_string(),
        ));
    }

    let (key, modifiers) = parse_key_spec(keys)?;

    primitives.ensure_adapter_ready().await?;
    let context = primitives.resolve_context(ctx).await?;

    let key_literal = serde_json::to_string(&key)
        .map_err(|err| ActionError::Internal(format!("invalid key encoding: {}", err)))?;
    let expression = format!(
        "(() => {{\n            const el = document.activeElement || document.body;\n            if (!el) {{ return {{ status: 'no-target' }}; }}\n            const key = {key};\n            const opts = {{ key, bubbles: true, cancelable: true, ctrlKey: {ctrl}, shiftKey: {shift}, altKey: {alt}, metaKey: {meta} }};\n            el.dispatchEvent(new KeyboardEvent('keydown', opts));\n            el.dispatchEvent(new KeyboardEvent('keypress', opts));\n            el.dispatchEvent(new KeyboardEvent('keyup', opts));\n            return {{ status: 'ok' }};\n        }})()",
        key = key_literal,
        ctrl = modifiers.ctrl,
        shift = modifiers.shift,
        alt = modifiers.alt,
        meta = modifiers.meta,
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
        "no-target" => {
            return Err(ActionError::AnchorNotFound(
                "no focused element to receive keys".to_string(),
            ))
        }
        other => {
            return Err(ActionError::Internal(format!(
                "unexpected send_keys status: {}",
                other
            )))
        }
    }

    let post_signals = capture_post_signals(primitives, ctx).await;
    let latency_ms = start_instant.elapsed().as_millis() as u64;

    info!(action_id = %ctx.action_id, latency_ms = latency_ms, "Send keys completed successfully");

    Ok(ActionReport::success(started_at, latency_ms).with_signals(post_signals))
}

struct KeyModifiers {
    ctrl: bool,
    shift: bool,
    alt: bool,
    meta: bool,
}

/// Parse a key spec like `"ctrl+shift+k"` into a canonical key name and modifiers.
fn parse_key_spec(spec: &str) -> Result<(String, KeyModifiers), ActionError> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(ActionError::Internal("key spec cannot be empty".to_string()));
    }

    let mut modifiers = KeyModifiers {
        ctrl: false,
        shift: false,
        alt: false,
        meta: false,
    };
    let mut parts = trimmed.split('+').peekable();
    let mut key = String::new();

    while let Some(part) = parts.next() {
        let is_last = parts.peek().is_none();
        if is_last {
            key = canonical_key_name(part);
        } else {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "alt" | "option" => modifiers.alt = true,
                "meta" | "cmd" | "command" => modifiers.meta = true,
                other => {
                    return Err(ActionError::Internal(format!(
                        "unknown key modifier: {}",
                        other
                    )))
                }
            }
        }
    }

    if key.is_empty() {
        return Err(ActionError::Internal("missing key name".to_string()));
    }

    Ok((key, modifiers))
}

fn canonical_key_name(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter".to_string(),
        "esc" | "escape" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => " ".to_string(),
        "backspace" => "Backspace".to_string(),
        "delete" | "del" => "Delete".to_string(),
        "up" | "arrowup" => "ArrowUp".to_string(),
        "down" | "arrowdown" => "ArrowDown".to_string(),
        "left" | "arrowleft" => "ArrowLeft".to_string(),
        "right" | "arrowright" => "ArrowRight".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        "pageup" => "PageUp".to_string(),
        "pagedown" => "PageDown".to_string(),
        other if other.len() == 1 => other.to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => other.to_string(),
            }
        }
    }
}

/// Capture post-keypress signals
async fn capture_post_signals(primitives: &DefaultActionPrimitives, ctx: &ExecCtx) -> PostSignals {
    match primitives.capture_page_signals(ctx).await {
        Ok(signals) => signals,
        Err(err) => {
            warn!("failed to capture send_keys signals: {}", err);
            PostSignals::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_key() {
        let (key, modifiers) = parse_key_spec("Enter").unwrap();
        assert_eq!(key, "Enter");
        assert!(!modifiers.ctrl && !modifiers.shift && !modifiers.alt && !modifiers.meta);
    }

    #[test]
    fn parses_modifier_combo() {
        let (key, modifiers) = parse_key_spec("ctrl+shift+k").unwrap();
        assert_eq!(key, "K");
        assert!(modifiers.ctrl);
        assert!(modifiers.shift);
        assert!(!modifiers.alt);
    }

    #[test]
    fn rejects_empty_spec() {
        assert!(parse_key_spec("").is_err());
        assert!(parse_key_spec("ctrl+").is_err());
    }
}
