//! Anthropic Messages dialect.
//!
//! - system prompt as a top-level request field, not a message
//! - native `tool_use` / `tool_result` / `thinking` content blocks
//! - base64 and URL image sources
//! - `max_tokens` is mandatory; a documented default fills the gap
//! - typed SSE events (`content_block_start` / `content_block_delta` /
//!   `message_delta`) carrying the block index the accumulator keys on

use std::collections::HashSet;
use std::time::Instant;

use crosstalk_core::error::FormatError;
use crosstalk_core::message::{ContentBlock, MediaSource, Message};
use crosstalk_core::options::GenerateOptions;
use crosstalk_core::response::{ChatResponse, ChatUsage};
use crosstalk_core::tool::{ToolChoice, ToolDefinition};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::caps::{MediaSupport, ProviderCaps, SystemChannel, ToolChoiceSupport};
use crate::formatter::{malformed_terminal, media_placeholder, Formatter, WirePayload};
use crate::merge::{self, MergedRun, Segment};
use crate::passes;
use crate::request::RequestBody;
use crate::stream::{parse_tool_input, StreamAccumulator, ToolCallDelta};

/// Substituted when neither the caller nor the defaults cap output tokens;
/// the Messages API rejects requests without one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const ANTHROPIC_CAPS: ProviderCaps = ProviderCaps {
    name: "anthropic",
    system_channel: SystemChannel::TopLevelField,
    media: MediaSupport::IMAGES,
    tool_choice: ToolChoiceSupport::Full,
    requires_user_final: false,
    role_rewrites: &[],
    strip_fields: &[],
    mandatory_max_tokens: Some(DEFAULT_MAX_TOKENS),
};

/// Formatter for the Anthropic Messages API.
pub struct AnthropicFormatter {
    caps: ProviderCaps,
    preamble: Option<String>,
}

impl AnthropicFormatter {
    pub fn new() -> Self {
        Self {
            caps: ANTHROPIC_CAPS,
            preamble: None,
        }
    }

    /// Set the preamble prepended to the first merged run.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    fn push_tool_message(
        &self,
        msg: &Message,
        wire: &mut Vec<Value>,
        seen_ids: &mut HashSet<String>,
    ) -> Result<(), FormatError> {
        let mut assistant_blocks: Vec<Value> = Vec::new();
        let mut has_tool_use = false;

        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        assistant_blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                ContentBlock::Thinking { .. } => {}
                ContentBlock::ToolUse {
                    id, name, input, ..
                } => {
                    seen_ids.insert(id.clone());
                    has_tool_use = true;
                    assistant_blocks.push(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }));
                }
                ContentBlock::ToolResult { id, output, .. } => {
                    if !seen_ids.contains(id) {
                        return Err(FormatError::OrphanToolResult { id: id.clone() });
                    }
                    wire.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": self.render_result_blocks(output)?,
                        }],
                    }));
                }
                ContentBlock::Image { .. }
                | ContentBlock::Audio { .. }
                | ContentBlock::Video { .. } => {
                    warn!(
                        provider = self.caps.name,
                        "Dropping media block found in tool sequence"
                    );
                }
            }
        }

        if has_tool_use {
            // Tool calls precede their results on the wire.
            let at = wire
                .iter()
                .position(|m| {
                    m.pointer("/content/0/tool_use_id")
                        .and_then(Value::as_str)
                        .is_some_and(|rid| {
                            assistant_blocks
                                .iter()
                                .any(|b| b["type"] == "tool_use" && b["id"] == rid)
                        })
                })
                .unwrap_or(wire.len());
            wire.insert(at, json!({"role": "assistant", "content": assistant_blocks}));
        }
        Ok(())
    }

    /// Tool result content: text and native image blocks.
    fn render_result_blocks(&self, output: &[ContentBlock]) -> Result<Vec<Value>, FormatError> {
        let mut blocks: Vec<Value> = Vec::new();
        for block in output {
            match block {
                ContentBlock::Text { text } => {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                ContentBlock::Thinking { .. } => {}
                ContentBlock::Image { source } => {
                    blocks.push(image_block(source)?);
                }
                other => {
                    blocks.push(json!({
                        "type": "text",
                        "text": media_placeholder(self.caps.name, other),
                    }));
                }
            }
        }
        Ok(blocks)
    }

    fn agent_run_message(&self, merged: MergedRun) -> Result<Value, FormatError> {
        let mut text = merged.text;
        let mut parts: Vec<Value> = Vec::new();

        for block in &merged.media {
            match block {
                ContentBlock::Image { source } => parts.push(image_block(source)?),
                other => {
                    text.push('\n');
                    text.push_str(&media_placeholder(self.caps.name, other));
                }
            }
        }

        if parts.is_empty() {
            Ok(json!({"role": "user", "content": text}))
        } else {
            let mut content = vec![json!({"type": "text", "text": text})];
            content.append(&mut parts);
            Ok(json!({"role": "user", "content": content}))
        }
    }
}

impl Default for AnthropicFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for AnthropicFormatter {
    fn caps(&self) -> &ProviderCaps {
        &self.caps
    }

    fn format(&self, messages: &[Message]) -> Result<WirePayload, FormatError> {
        let (system, body) = merge::split_leading_system(messages);
        let system_out = system.map(Message::text);

        let mut wire: Vec<Value> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut first_agent_run = true;

        for segment in merge::partition(body) {
            match segment {
                Segment::ToolRun(run) => {
                    for msg in run {
                        self.push_tool_message(msg, &mut wire, &mut seen_ids)?;
                    }
                }
                Segment::AgentRun(run) => {
                    let preamble = first_agent_run
                        .then_some(self.preamble.as_deref())
                        .flatten();
                    first_agent_run = false;
                    wire.push(self.agent_run_message(merge::merge_agent_run(&run, preamble))?);
                }
            }
        }

        passes::apply_all(&self.caps, &mut wire, || {
            json!({"role": "user", "content": "Please continue."})
        });

        Ok(WirePayload {
            messages: wire,
            system: system_out,
        })
    }

    fn apply_options(
        &self,
        request: &mut RequestBody,
        options: &GenerateOptions,
        defaults: &GenerateOptions,
    ) {
        let merged = options.merged(defaults);
        if let Some(t) = merged.temperature {
            request.set("temperature", json!(t));
        }
        if let Some(p) = merged.top_p {
            request.set("top_p", json!(p));
        }
        // The API mandates a cap; fall all the way back to the documented
        // default.
        let max_tokens = merged
            .max_tokens
            .or(self.caps.mandatory_max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        request.set("max_tokens", json!(max_tokens));
        if !merged.stop.is_empty() {
            request.set("stop_sequences", json!(merged.stop));
        }
        if merged.seed.is_some() {
            warn!(provider = self.caps.name, "Seed is not supported, ignoring");
        }
        request.extend_extra(&merged.extra);
    }

    fn apply_tools(&self, request: &mut RequestBody, tools: &[ToolDefinition]) {
        if tools.is_empty() {
            return;
        }
        let specs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        request.set("tools", json!(specs));
    }

    fn apply_tool_choice(&self, request: &mut RequestBody, choice: &ToolChoice) {
        let value = match passes::degrade_tool_choice(choice, &self.caps) {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::None => json!({"type": "none"}),
            ToolChoice::Required => json!({"type": "any"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        };
        request.set("tool_choice", value);
    }

    fn parse_terminal(&self, raw: &Value, started: Instant) -> ChatResponse {
        let parsed: MessagesResponse = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(_) => return malformed_terminal(self.caps.name, raw, started),
        };

        let mut content: Vec<ContentBlock> = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Thinking { thinking } => {
                    content.push(ContentBlock::thinking(thinking));
                }
                ResponseBlock::Text { text } => content.push(ContentBlock::text(text)),
                ResponseBlock::ToolUse { id, name, input } => {
                    let raw_arguments = input.to_string();
                    let input = if input.is_object() {
                        input
                    } else {
                        parse_tool_input(&name, &raw_arguments)
                    };
                    content.push(ContentBlock::ToolUse {
                        id,
                        name,
                        input,
                        raw_arguments,
                    });
                }
                ResponseBlock::Unknown => {}
            }
        }

        let mut resp = ChatResponse::new(parsed.id, content);
        let usage = parsed.usage.unwrap_or_default();
        resp.usage = ChatUsage::new(
            usage.input_tokens,
            usage.output_tokens,
            started.elapsed().as_secs_f64(),
        );
        resp.finish_reason = parsed.stop_reason;
        if let Some(model) = parsed.model {
            resp.metadata.insert("model".into(), json!(model));
        }
        resp
    }

    fn parse_chunk(&self, raw: &Value, acc: &mut StreamAccumulator) -> bool {
        let Some(event_type) = raw.get("type").and_then(Value::as_str) else {
            return false;
        };

        match event_type {
            "message_start" => {
                if let Some(id) = raw.pointer("/message/id").and_then(Value::as_str) {
                    acc.set_response_id(id);
                }
                acc.set_usage(
                    raw.pointer("/message/usage/input_tokens")
                        .and_then(Value::as_u64)
                        .map(|v| v as u32),
                    None,
                );
                true
            }
            "content_block_start" => {
                let index = raw["index"].as_u64().unwrap_or(0) as u32;
                let block = &raw["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    acc.apply_tool_delta(ToolCallDelta {
                        index,
                        id: block.get("id").and_then(Value::as_str).map(String::from),
                        name: block.get("name").and_then(Value::as_str).map(String::from),
                        arguments: None,
                    });
                    true
                } else {
                    false
                }
            }
            "content_block_delta" => {
                let index = raw["index"].as_u64().unwrap_or(0) as u32;
                let delta = &raw["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            acc.push_text(text);
                            return true;
                        }
                        false
                    }
                    Some("thinking_delta") => {
                        if let Some(thinking) = delta["thinking"].as_str() {
                            acc.push_thinking(thinking);
                            return true;
                        }
                        false
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            acc.apply_tool_delta(ToolCallDelta {
                                index,
                                id: None,
                                name: None,
                                arguments: Some(partial.to_string()),
                            });
                            return true;
                        }
                        false
                    }
                    _ => false,
                }
            }
            "message_delta" => {
                let mut consumed = false;
                if let Some(reason) = raw.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    acc.set_finish_reason(reason);
                    consumed = true;
                }
                if let Some(output) = raw.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    acc.set_usage(None, Some(output as u32));
                    consumed = true;
                }
                consumed
            }
            // ping, content_block_stop, message_stop carry no content.
            _ => false,
        }
    }
}

/// A native image content block; both source kinds pass through.
fn image_block(source: &MediaSource) -> Result<Value, FormatError> {
    match source {
        MediaSource::Url { url } => {
            if url.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "image.source.url".into(),
                    reason: "empty url".into(),
                });
            }
            Ok(json!({"type": "image", "source": {"type": "url", "url": url}}))
        }
        MediaSource::Base64 { media_type, data } => {
            if data.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "image.source.data".into(),
                    reason: "empty base64 payload".into(),
                });
            }
            Ok(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }))
        }
    }
}

// --- Messages API response types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    #[serde(default)]
    model: Option<String>,
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<UsageInfo>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_party() -> Vec<Message> {
        vec![
            Message::user().named("Alice").with_text("hi"),
            Message::assistant().named("Bob").with_text("hello"),
        ]
    }

    #[test]
    fn system_surfaces_through_top_level_channel() {
        let mut messages = vec![Message::system("be terse")];
        messages.extend(two_party());
        let payload = AnthropicFormatter::new().format(&messages).unwrap();
        assert_eq!(payload.system.as_deref(), Some("be terse"));
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(
            payload.messages[0]["content"],
            "<history>\nUser Alice: hi\nAssistant Bob: hello\n</history>"
        );
    }

    #[test]
    fn tool_sequence_uses_native_blocks() {
        let messages = vec![
            Message::user().with_text("weather?"),
            Message::assistant()
                .with_text("checking")
                .with_tool_use("toolu_1", "get_weather", json!({"loc": "NYC"})),
            Message::tool_result("toolu_1", "get_weather", vec![ContentBlock::text("72F")]),
        ];
        let payload = AnthropicFormatter::new().format(&messages).unwrap();
        assert_eq!(payload.messages.len(), 3);

        let assistant = &payload.messages[1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "text");
        assert_eq!(assistant["content"][1]["type"], "tool_use");
        assert_eq!(assistant["content"][1]["input"]["loc"], "NYC");

        let result = &payload.messages[2];
        assert_eq!(result["role"], "user");
        assert_eq!(result["content"][0]["type"], "tool_result");
        assert_eq!(result["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn orphan_tool_result_is_fatal() {
        let messages = vec![Message::tool_result(
            "ghost",
            "calc",
            vec![ContentBlock::text("1")],
        )];
        let err = AnthropicFormatter::new().format(&messages).unwrap_err();
        assert!(matches!(err, FormatError::OrphanToolResult { .. }));
    }

    #[test]
    fn images_ride_native_blocks_in_both_source_kinds() {
        let messages = vec![Message::user()
            .with_text("compare")
            .with_image(MediaSource::base64("image/png", "aGk="))
            .with_image(MediaSource::url("https://example.com/b.png"))];
        let payload = AnthropicFormatter::new().format(&messages).unwrap();
        let content = payload.messages[0]["content"].as_array().unwrap();
        assert_eq!(content[1]["source"]["type"], "base64");
        assert_eq!(content[2]["source"]["type"], "url");
    }

    #[test]
    fn audio_becomes_placeholder() {
        let messages = vec![Message::user()
            .with_text("listen")
            .with_content(ContentBlock::audio(MediaSource::url(
                "https://example.com/a.ogg",
            )))];
        let payload = AnthropicFormatter::new().format(&messages).unwrap();
        let text = payload.messages[0]["content"].as_str().unwrap();
        assert!(text.contains("[audio omitted: not supported by this provider]"));
    }

    #[test]
    fn max_tokens_is_always_present() {
        let formatter = AnthropicFormatter::new();
        let mut request = RequestBody::new();
        formatter.apply_options(
            &mut request,
            &GenerateOptions::default(),
            &GenerateOptions::default(),
        );
        assert_eq!(request.get("max_tokens"), Some(&json!(DEFAULT_MAX_TOKENS)));

        let mut request = RequestBody::new();
        formatter.apply_options(
            &mut request,
            &GenerateOptions {
                max_tokens: Some(100),
                stop: vec!["<END>".into()],
                ..Default::default()
            },
            &GenerateOptions::default(),
        );
        assert_eq!(request.get("max_tokens"), Some(&json!(100)));
        assert_eq!(request.get("stop_sequences"), Some(&json!(["<END>"])));
    }

    #[test]
    fn tool_choice_maps_to_typed_objects() {
        let formatter = AnthropicFormatter::new();
        let mut request = RequestBody::new();
        formatter.apply_tool_choice(&mut request, &ToolChoice::Required);
        assert_eq!(request.get("tool_choice"), Some(&json!({"type": "any"})));

        let mut request = RequestBody::new();
        formatter.apply_tool_choice(&mut request, &ToolChoice::Tool("calc".into()));
        assert_eq!(
            request.get("tool_choice"),
            Some(&json!({"type": "tool", "name": "calc"}))
        );
    }

    #[test]
    fn apply_tools_uses_input_schema() {
        let formatter = AnthropicFormatter::new();
        let mut request = RequestBody::new();
        formatter.apply_tools(
            &mut request,
            &[ToolDefinition::new(
                "calculator",
                "Evaluate math",
                json!({"type": "object"}),
            )],
        );
        let specs = request.get("tools").unwrap().as_array().unwrap();
        assert_eq!(specs[0]["name"], "calculator");
        assert_eq!(specs[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn parse_terminal_full_response() {
        let raw = json!({
            "id": "msg_01",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "thinking", "thinking": "I need to consider..."},
                {"type": "text", "text": "Here's my answer."},
                {"type": "tool_use", "id": "toolu_abc", "name": "calculator",
                 "input": {"expression": "2+2"}}
            ],
            "usage": {"input_tokens": 20, "output_tokens": 10},
            "stop_reason": "tool_use"
        });
        let resp = AnthropicFormatter::new().parse_terminal(&raw, Instant::now());
        assert_eq!(resp.id, "msg_01");
        assert_eq!(resp.content[0].as_thinking(), Some("I need to consider..."));
        assert_eq!(resp.content[1].as_text(), Some("Here's my answer."));
        match &resp.content[2] {
            ContentBlock::ToolUse {
                id,
                name,
                input,
                raw_arguments,
            } => {
                assert_eq!(id, "toolu_abc");
                assert_eq!(name, "calculator");
                assert_eq!(input["expression"], "2+2");
                let roundtrip: Value = serde_json::from_str(raw_arguments).unwrap();
                assert_eq!(roundtrip["expression"], "2+2");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
        assert_eq!(resp.usage.input_tokens, Some(20));
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn parse_terminal_malformed_yields_diagnostic() {
        let raw = json!({"type": "error", "error": {"message": "overloaded"}});
        let resp = AnthropicFormatter::new().parse_terminal(&raw, Instant::now());
        assert_eq!(resp.content.len(), 1);
        assert!(resp.content[0].as_text().unwrap().contains("overloaded"));
    }

    #[test]
    fn parse_chunk_folds_typed_events() {
        let formatter = AnthropicFormatter::new();
        let mut acc = StreamAccumulator::new();

        assert!(formatter.parse_chunk(
            &json!({"type": "message_start",
                    "message": {"id": "msg_9", "usage": {"input_tokens": 15}}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "content_block_delta", "index": 0,
                    "delta": {"type": "thinking_delta", "thinking": "let me see"}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "content_block_delta", "index": 1,
                    "delta": {"type": "text_delta", "text": "Sure."}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "content_block_start", "index": 2,
                    "content_block": {"type": "tool_use", "id": "toolu_7", "name": "calc"}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "content_block_delta", "index": 2,
                    "delta": {"type": "input_json_delta", "partial_json": "{\"expr\":"}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "content_block_delta", "index": 2,
                    "delta": {"type": "input_json_delta", "partial_json": "\"2+2\"}"}}),
            &mut acc
        ));
        assert!(formatter.parse_chunk(
            &json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"},
                    "usage": {"output_tokens": 30}}),
            &mut acc
        ));
        // Protocol noise is discarded.
        assert!(!formatter.parse_chunk(&json!({"type": "ping"}), &mut acc));
        assert!(!formatter.parse_chunk(&json!({"type": "message_stop"}), &mut acc));
        assert!(!formatter.parse_chunk(&json!({"no_type": true}), &mut acc));

        assert!(acc.is_complete(2));
        let resp = acc.snapshot(Instant::now());
        assert_eq!(resp.id, "msg_9");
        assert_eq!(resp.content[0].as_thinking(), Some("let me see"));
        assert_eq!(resp.content[1].as_text(), Some("Sure."));
        match &resp.content[2] {
            ContentBlock::ToolUse { id, input, .. } => {
                assert_eq!(id, "toolu_7");
                assert_eq!(input["expr"], "2+2");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
        assert_eq!(resp.usage.input_tokens, Some(15));
        assert_eq!(resp.usage.output_tokens, Some(30));
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_use"));
    }
}
