//! The provider-agnostic chat response surfaced to the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ContentBlock;

/// Token usage and latency accounting for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    /// Prompt tokens, when the provider reports them
    pub input_tokens: Option<u32>,

    /// Completion tokens, when the provider reports them
    pub output_tokens: Option<u32>,

    /// Wall-clock seconds from request start to this response
    pub elapsed_secs: f64,
}

impl ChatUsage {
    pub fn new(input_tokens: Option<u32>, output_tokens: Option<u32>, elapsed_secs: f64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            elapsed_secs,
        }
    }
}

/// One complete model response, terminal or a snapshot of an in-flight stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider-assigned response ID (generated locally when absent)
    pub id: String,

    /// Ordered content blocks: thinking, then text, then tool calls
    pub content: Vec<ContentBlock>,

    /// Usage statistics
    pub usage: ChatUsage,

    /// Why generation stopped ("stop", "tool_calls", "length", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Provider-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl ChatResponse {
    pub fn new(id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self {
            id: id.into(),
            content,
            usage: ChatUsage::default(),
            finish_reason: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Concatenated text of all Text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-use blocks, in emission order.
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .collect()
    }
}
