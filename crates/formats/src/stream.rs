//! Streaming response reconstruction.
//!
//! One logical tool invocation arrives split across many deltas, addressed
//! by positional index rather than a stable id: some deltas carry only
//! `{index, id, name}`, others only an argument fragment. The accumulator
//! folds them back into complete content blocks.
//!
//! One accumulator per in-flight stream, owned by the caller, discarded on
//! completion, error, or cancellation. A retried request starts from a
//! fresh accumulator; partial tool-call state is never resumed across
//! connections.

use std::collections::BTreeMap;
use std::time::Instant;

use crosstalk_core::message::ContentBlock;
use crosstalk_core::response::{ChatResponse, ChatUsage};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// One tool-call fragment extracted from a stream chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Positional index of the invocation this fragment belongs to.
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Argument fragment, appended verbatim in arrival order.
    pub arguments: Option<String>,
}

/// A tool call being reassembled.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PartialToolCall {
    /// Structural well-formedness heuristic; full JSON validity is only
    /// checked at finalization.
    fn is_complete(&self) -> bool {
        let trimmed = self.arguments.trim();
        self.id.is_some()
            && self.name.is_some()
            && !trimmed.is_empty()
            && trimmed.starts_with('{')
            && trimmed.ends_with('}')
    }

    fn finish(&self) -> ContentBlock {
        let input = parse_tool_input(self.name.as_deref().unwrap_or(""), &self.arguments);

        ContentBlock::ToolUse {
            id: self.id.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            input,
            raw_arguments: self.arguments.clone(),
        }
    }
}

/// Parse a tool argument string into its input object.
///
/// A buffer that is not a JSON object yields an empty input map; callers
/// keep the raw string alongside so nothing is lost. Tool calls are never
/// dropped over bad arguments.
pub(crate) fn parse_tool_input(name: &str, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            warn!(name, "Tool arguments parsed to non-object {other}, emitting empty input");
            Value::Object(serde_json::Map::new())
        }
        Err(e) => {
            warn!(name, error = %e, "Tool arguments failed to parse, emitting empty input");
            Value::Object(serde_json::Map::new())
        }
    }
}

/// Per-stream working state, folding deltas into complete content.
///
/// Intermediate state is mutable; the snapshots it produces are not.
#[derive(Debug)]
pub struct StreamAccumulator {
    /// Local id used until the provider assigns one.
    local_id: String,
    response_id: Option<String>,
    thinking: String,
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            response_id: None,
            thinking: String::new(),
            text: String::new(),
            tool_calls: BTreeMap::new(),
            input_tokens: None,
            output_tokens: None,
            finish_reason: None,
        }
    }

    /// Record the provider-assigned response id.
    pub fn set_response_id(&mut self, id: impl Into<String>) {
        self.response_id = Some(id.into());
    }

    /// Append a text fragment in arrival order.
    pub fn push_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Append a reasoning fragment in arrival order.
    pub fn push_thinking(&mut self, fragment: &str) {
        self.thinking.push_str(fragment);
    }

    /// Fold one tool-call fragment into the per-index state.
    ///
    /// Ids and names record/overwrite; non-empty argument fragments append
    /// verbatim. A delta carrying none of these is ignored.
    pub fn apply_tool_delta(&mut self, delta: ToolCallDelta) {
        if delta.id.is_none() && delta.name.is_none() && delta.arguments.is_none() {
            return;
        }
        let partial = self.tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            partial.id = Some(id);
        }
        if let Some(name) = delta.name {
            partial.name = Some(name);
        }
        if let Some(fragment) = delta.arguments {
            if !fragment.is_empty() {
                partial.arguments.push_str(&fragment);
            }
        }
    }

    /// Merge usage counters; later reports overwrite earlier ones.
    pub fn set_usage(&mut self, input_tokens: Option<u32>, output_tokens: Option<u32>) {
        if input_tokens.is_some() {
            self.input_tokens = input_tokens;
        }
        if output_tokens.is_some() {
            self.output_tokens = output_tokens;
        }
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// True when the call at `index` has id, name, and a structurally
    /// closed argument buffer.
    pub fn is_complete(&self, index: u32) -> bool {
        self.tool_calls
            .get(&index)
            .is_some_and(PartialToolCall::is_complete)
    }

    /// Number of in-flight tool calls.
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.len()
    }

    /// Produce the response as reconstructed so far.
    ///
    /// Output order is deterministic regardless of delta arrival order:
    /// thinking first, then text, then tool calls ascending by index. A
    /// buffer that fails to parse as a JSON object still yields its call,
    /// with an empty input map and the raw buffer preserved.
    pub fn snapshot(&self, started: Instant) -> ChatResponse {
        let mut content: Vec<ContentBlock> = Vec::new();

        if !self.thinking.is_empty() {
            content.push(ContentBlock::thinking(self.thinking.clone()));
        }
        if !self.text.is_empty() {
            content.push(ContentBlock::text(self.text.clone()));
        }
        for partial in self.tool_calls.values() {
            content.push(partial.finish());
        }

        ChatResponse {
            id: self
                .response_id
                .clone()
                .unwrap_or_else(|| self.local_id.clone()),
            content,
            usage: ChatUsage::new(
                self.input_tokens,
                self.output_tokens,
                started.elapsed().as_secs_f64(),
            ),
            finish_reason: self.finish_reason.clone(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: arguments.map(String::from),
        }
    }

    #[test]
    fn reassembles_split_arguments() {
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(delta(0, Some("c1"), Some("get_weather"), Some("{\"loc")));
        acc.apply_tool_delta(delta(0, None, None, Some("ation\":\"NYC\"}")));

        assert!(acc.is_complete(0));
        let resp = acc.snapshot(Instant::now());
        match &resp.content[0] {
            ContentBlock::ToolUse {
                id,
                name,
                input,
                raw_arguments,
            } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["location"], "NYC");
                assert_eq!(raw_arguments, "{\"location\":\"NYC\"}");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn argument_buffer_equals_fragment_concatenation() {
        let fragments = ["{\"a\":", "[1,", "2],", "\"b\":\"x\"", "}"];
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(delta(0, Some("c1"), Some("f"), None));
        for f in fragments {
            acc.apply_tool_delta(delta(0, None, None, Some(f)));
        }
        let resp = acc.snapshot(Instant::now());
        match &resp.content[0] {
            ContentBlock::ToolUse { raw_arguments, .. } => {
                assert_eq!(raw_arguments, &fragments.concat());
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn interleaved_indices_finalize_ascending() {
        let mut acc = StreamAccumulator::new();
        // Index 1 starts and finishes before index 0 sees any data.
        acc.apply_tool_delta(delta(1, Some("c_b"), Some("second"), Some("{}")));
        acc.apply_tool_delta(delta(0, Some("c_a"), Some("first"), Some("{}")));

        let resp = acc.snapshot(Instant::now());
        let names: Vec<&str> = resp
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolUse { name, .. } => name.as_str(),
                other => panic!("expected tool use, got {other:?}"),
            })
            .collect();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn id_and_name_overwrite_fragments_append() {
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(delta(0, Some("temp"), None, None));
        acc.apply_tool_delta(delta(0, Some("c_final"), Some("tool"), None));
        acc.apply_tool_delta(delta(0, None, None, Some("{\"x\"")));
        acc.apply_tool_delta(delta(0, None, None, Some(":1}")));

        assert!(acc.is_complete(0));
        let resp = acc.snapshot(Instant::now());
        match &resp.content[0] {
            ContentBlock::ToolUse { id, input, .. } => {
                assert_eq!(id, "c_final");
                assert_eq!(input["x"], 1);
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn empty_delta_is_ignored() {
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(ToolCallDelta::default());
        assert_eq!(acc.tool_call_count(), 0);
    }

    #[test]
    fn incomplete_until_id_name_and_closed_buffer() {
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(delta(0, Some("c1"), None, Some("{}")));
        assert!(!acc.is_complete(0)); // name missing
        acc.apply_tool_delta(delta(0, None, Some("f"), None));
        assert!(acc.is_complete(0));

        acc.apply_tool_delta(delta(1, Some("c2"), Some("g"), Some("{\"open\":")));
        assert!(!acc.is_complete(1)); // buffer not closed
    }

    #[test]
    fn unparseable_arguments_still_emit_the_call() {
        let mut acc = StreamAccumulator::new();
        acc.apply_tool_delta(delta(0, Some("c1"), Some("broken"), Some("{\"a\": nope}")));

        let resp = acc.snapshot(Instant::now());
        match &resp.content[0] {
            ContentBlock::ToolUse {
                name,
                input,
                raw_arguments,
                ..
            } => {
                assert_eq!(name, "broken");
                assert_eq!(input, &json!({}));
                assert_eq!(raw_arguments, "{\"a\": nope}");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn thinking_precedes_text_regardless_of_arrival() {
        let mut acc = StreamAccumulator::new();
        acc.push_text("answer ");
        acc.push_thinking("reason ");
        acc.push_text("text");
        acc.push_thinking("more");

        let resp = acc.snapshot(Instant::now());
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.content[0].as_thinking(), Some("reason more"));
        assert_eq!(resp.content[1].as_text(), Some("answer text"));
    }

    #[test]
    fn snapshot_carries_usage_and_finish_reason() {
        let mut acc = StreamAccumulator::new();
        acc.set_response_id("resp_42");
        acc.push_text("done");
        acc.set_usage(Some(10), None);
        acc.set_usage(None, Some(5));
        acc.set_finish_reason("stop");

        let resp = acc.snapshot(Instant::now());
        assert_eq!(resp.id, "resp_42");
        assert_eq!(resp.usage.input_tokens, Some(10));
        assert_eq!(resp.usage.output_tokens, Some(5));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn snapshot_without_provider_id_is_stable() {
        let mut acc = StreamAccumulator::new();
        acc.push_text("a");
        let first = acc.snapshot(Instant::now()).id;
        acc.push_text("b");
        let second = acc.snapshot(Instant::now()).id;
        assert_eq!(first, second);
    }
}
