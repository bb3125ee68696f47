//! The bidirectional formatter contract.
//!
//! A formatter translates the provider-agnostic conversation into one
//! dialect's wire shape and parses that dialect's responses back into
//! content blocks. Formatting is pure and synchronous: no I/O, no state
//! shared across calls. The only mutable state in the response path is the
//! caller-owned [`StreamAccumulator`].

use std::time::Instant;

use crosstalk_core::error::FormatError;
use crosstalk_core::message::{ContentBlock, Message};
use crosstalk_core::options::GenerateOptions;
use crosstalk_core::response::ChatResponse;
use crosstalk_core::tool::{ToolChoice, ToolDefinition};
use serde_json::Value;
use tracing::warn;

use crate::caps::ProviderCaps;
use crate::request::RequestBody;
use crate::stream::StreamAccumulator;

/// A raw provider response, tagged once at the transport boundary.
///
/// Downstream code dispatches on this union exactly once; nothing re-tests
/// the payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// A complete, non-streaming response object.
    Terminal(Value),
    /// One incremental unit of a streamed response.
    Chunk(Value),
}

/// The formatted request surface: wire messages plus the system-instruction
/// channel for dialects that carry one outside the message list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WirePayload {
    pub messages: Vec<Value>,
    pub system: Option<String>,
}

/// One wire dialect, bidirectionally.
pub trait Formatter: Send + Sync {
    /// The capability descriptor driving quirk passes and media handling.
    fn caps(&self) -> &ProviderCaps;

    /// Turn generic messages into provider wire messages.
    ///
    /// Pure and deterministic. Only structural invariant violations fail;
    /// everything else degrades in place.
    fn format(&self, messages: &[Message]) -> Result<WirePayload, FormatError>;

    /// Project generic options onto the request. Unset fields fall back to
    /// `defaults`; unset in both stays off the wire unless the dialect
    /// mandates a value.
    fn apply_options(
        &self,
        request: &mut RequestBody,
        options: &GenerateOptions,
        defaults: &GenerateOptions,
    );

    /// Attach tool definitions in the dialect's schema shape.
    fn apply_tools(&self, request: &mut RequestBody, tools: &[ToolDefinition]);

    /// Attach the tool-choice directive, degrading unsupported choices.
    fn apply_tool_choice(&self, request: &mut RequestBody, choice: &ToolChoice);

    /// Parse a complete response object. Never fails: malformed input
    /// yields a diagnostic text block so the caller always receives a
    /// well-formed response.
    fn parse_terminal(&self, raw: &Value, started: Instant) -> ChatResponse;

    /// Fold one stream chunk into the accumulator. Returns false to
    /// discard the chunk (malformed envelope, keep-alive) — never a fatal
    /// error.
    fn parse_chunk(&self, raw: &Value, acc: &mut StreamAccumulator) -> bool;

    /// Dispatch a tagged raw response. Terminal input always yields a
    /// response; absence only ever signals a discarded chunk.
    fn parse_response(
        &self,
        raw: &RawResponse,
        acc: &mut StreamAccumulator,
        started: Instant,
    ) -> Option<ChatResponse> {
        match raw {
            RawResponse::Terminal(value) => Some(self.parse_terminal(value, started)),
            RawResponse::Chunk(value) => {
                if self.parse_chunk(value, acc) {
                    Some(acc.snapshot(started))
                } else {
                    None
                }
            }
        }
    }
}

/// Diagnostic response for a terminal payload that does not match the
/// dialect's shape.
pub(crate) fn malformed_terminal(provider: &str, raw: &Value, started: Instant) -> ChatResponse {
    let mut rendered = raw.to_string();
    if rendered.len() > 500 {
        rendered.truncate(500);
        rendered.push('…');
    }
    warn!(provider, "Terminal response did not match the expected shape");
    let mut resp = ChatResponse::new(
        uuid::Uuid::new_v4().to_string(),
        vec![ContentBlock::text(format!(
            "[{provider} returned a response that could not be interpreted: {rendered}]"
        ))],
    );
    resp.usage.elapsed_secs = started.elapsed().as_secs_f64();
    resp
}

/// Placeholder line substituted for a media block the dialect cannot carry.
pub(crate) fn media_placeholder(provider: &str, block: &ContentBlock) -> String {
    let kind = match block {
        ContentBlock::Image { .. } => "image",
        ContentBlock::Audio { .. } => "audio",
        ContentBlock::Video { .. } => "video",
        _ => "attachment",
    };
    warn!(provider, kind, "Dropping unsupported media block");
    format!("[{kind} omitted: not supported by this provider]")
}
