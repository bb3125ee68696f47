//! Named transformation passes over finished wire messages.
//!
//! Vendor quirks (role renames, field stripping, turn fixups, tool-choice
//! degradation) are expressed as small composable functions selected by the
//! capability descriptor and applied in a fixed order, instead of per-vendor
//! rewrites of the formatting core. Each pass is independently testable.
//!
//! Pipeline order: `ensure_user_final` runs first, against canonical role
//! names; `rewrite_roles` and `strip_fields` run after.

use crosstalk_core::tool::ToolChoice;
use serde_json::Value;
use tracing::warn;

use crate::caps::{ProviderCaps, ToolChoiceSupport};

/// Rename roles on every wire message ("assistant" -> "model", ...).
pub fn rewrite_roles(messages: &mut [Value], rewrites: &[(&str, &str)]) {
    if rewrites.is_empty() {
        return;
    }
    for msg in messages.iter_mut() {
        let Some(role) = msg.get("role").and_then(Value::as_str) else {
            continue;
        };
        if let Some((_, to)) = rewrites.iter().find(|(from, _)| *from == role) {
            msg["role"] = Value::String((*to).to_string());
        }
    }
}

/// Remove fields the target rejects from every wire message.
pub fn strip_fields(messages: &mut [Value], fields: &[&str]) {
    if fields.is_empty() {
        return;
    }
    for msg in messages.iter_mut() {
        if let Some(obj) = msg.as_object_mut() {
            for field in fields {
                obj.remove(*field);
            }
        }
    }
}

/// Append a synthetic continuation when the conversation ends on an
/// assistant turn and the dialect forbids that. Returns true when a message
/// was appended.
pub fn ensure_user_final(messages: &mut Vec<Value>, continuation: impl FnOnce() -> Value) -> bool {
    let assistant_final = messages
        .last()
        .and_then(|m| m.get("role"))
        .and_then(Value::as_str)
        == Some("assistant");
    if assistant_final {
        messages.push(continuation());
    }
    assistant_final
}

/// Degrade an unsupported tool choice to the nearest supported one.
///
/// The degradation is silent apart from a warning signal; callers keep the
/// request flowing with automatic selection.
pub fn degrade_tool_choice(choice: &ToolChoice, caps: &ProviderCaps) -> ToolChoice {
    match caps.tool_choice {
        ToolChoiceSupport::Full => choice.clone(),
        ToolChoiceSupport::AutoOnly => match choice {
            ToolChoice::Auto => ToolChoice::Auto,
            other => {
                warn!(
                    provider = caps.name,
                    requested = ?other,
                    "Tool choice not supported by provider, degrading to auto"
                );
                ToolChoice::Auto
            }
        },
    }
}

/// Run the caps-selected passes in their fixed order.
pub fn apply_all(
    caps: &ProviderCaps,
    messages: &mut Vec<Value>,
    continuation: impl FnOnce() -> Value,
) {
    if caps.requires_user_final {
        ensure_user_final(messages, continuation);
    }
    rewrite_roles(messages, caps.role_rewrites);
    strip_fields(messages, caps.strip_fields);
}
