//! OpenAI Chat Completions dialect.
//!
//! Covers the large family of `/chat/completions`-compatible endpoints.
//! Vendor variants differ only by capability descriptor:
//!
//! - `openai()`   — full tool choice, image parts, system role
//! - `ollama()`   — text-only content, automatic tool selection, `name`
//!                  fields stripped
//! - `deepseek()` — rejects assistant-terminated turns, emits and parses
//!                  `reasoning_content`
//! - `reasoning()` — no system role (instructions fold into the first
//!                  merged run) and a mandated output-token cap

use std::collections::HashSet;
use std::time::Instant;

use crosstalk_core::error::FormatError;
use crosstalk_core::message::{ContentBlock, MediaSource, Message};
use crosstalk_core::options::GenerateOptions;
use crosstalk_core::response::{ChatResponse, ChatUsage};
use crosstalk_core::tool::{ToolChoice, ToolDefinition};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::caps::{MediaSupport, ProviderCaps, SystemChannel, ToolChoiceSupport};
use crate::formatter::{malformed_terminal, media_placeholder, Formatter, WirePayload};
use crate::merge::{self, MergedRun, Segment};
use crate::passes;
use crate::request::RequestBody;
use crate::stream::{parse_tool_input, StreamAccumulator, ToolCallDelta};

/// Synthetic user turn appended when the dialect forbids ending on an
/// assistant message.
const CONTINUATION_PROMPT: &str = "Please continue.";

/// Output-token cap substituted when a reasoning endpoint mandates one and
/// neither the caller nor the defaults set it.
const REASONING_MAX_OUTPUT_TOKENS: u32 = 4096;

const OPENAI_CAPS: ProviderCaps = ProviderCaps {
    name: "openai",
    system_channel: SystemChannel::MessageRole,
    media: MediaSupport::IMAGES,
    tool_choice: ToolChoiceSupport::Full,
    requires_user_final: false,
    role_rewrites: &[],
    strip_fields: &[],
    mandatory_max_tokens: None,
};

const OLLAMA_CAPS: ProviderCaps = ProviderCaps {
    name: "ollama",
    system_channel: SystemChannel::MessageRole,
    media: MediaSupport::NONE,
    tool_choice: ToolChoiceSupport::AutoOnly,
    requires_user_final: false,
    role_rewrites: &[],
    strip_fields: &["name"],
    mandatory_max_tokens: None,
};

const DEEPSEEK_CAPS: ProviderCaps = ProviderCaps {
    name: "deepseek",
    system_channel: SystemChannel::MessageRole,
    media: MediaSupport::NONE,
    tool_choice: ToolChoiceSupport::Full,
    requires_user_final: true,
    role_rewrites: &[],
    strip_fields: &[],
    mandatory_max_tokens: None,
};

const REASONING_CAPS: ProviderCaps = ProviderCaps {
    name: "openai-reasoning",
    system_channel: SystemChannel::Inline,
    media: MediaSupport::IMAGES,
    tool_choice: ToolChoiceSupport::Full,
    requires_user_final: false,
    role_rewrites: &[],
    strip_fields: &[],
    mandatory_max_tokens: Some(REASONING_MAX_OUTPUT_TOKENS),
};

/// Formatter for OpenAI-compatible chat endpoints.
pub struct OpenAiChatFormatter {
    caps: ProviderCaps,
    preamble: Option<String>,
    max_tokens_key: &'static str,
}

impl OpenAiChatFormatter {
    pub fn openai() -> Self {
        Self {
            caps: OPENAI_CAPS,
            preamble: None,
            max_tokens_key: "max_tokens",
        }
    }

    pub fn ollama() -> Self {
        Self {
            caps: OLLAMA_CAPS,
            preamble: None,
            max_tokens_key: "max_tokens",
        }
    }

    pub fn deepseek() -> Self {
        Self {
            caps: DEEPSEEK_CAPS,
            preamble: None,
            max_tokens_key: "max_tokens",
        }
    }

    /// Reasoning endpoints: no system role, `max_completion_tokens` is
    /// required.
    pub fn reasoning() -> Self {
        Self {
            caps: REASONING_CAPS,
            preamble: None,
            max_tokens_key: "max_completion_tokens",
        }
    }

    /// Set the preamble prepended to the first merged run.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Emit a tool-sequence message natively, recording and checking id
    /// correlation.
    fn push_tool_message(
        &self,
        msg: &Message,
        wire: &mut Vec<Value>,
        seen_ids: &mut HashSet<String>,
    ) -> Result<(), FormatError> {
        let mut commentary: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        let mut followups: Vec<Value> = Vec::new();

        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => commentary.push(text),
                ContentBlock::Thinking { .. } => {}
                ContentBlock::ToolUse {
                    id,
                    name,
                    raw_arguments,
                    ..
                } => {
                    seen_ids.insert(id.clone());
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": sanitize_tool_name(name),
                            "arguments": raw_arguments,
                        }
                    }));
                }
                ContentBlock::ToolResult { id, output, .. } => {
                    if !seen_ids.contains(id) {
                        return Err(FormatError::OrphanToolResult { id: id.clone() });
                    }
                    let (text, images) = self.render_tool_output(output)?;
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": id,
                        "content": text,
                    }));
                    // Images from tool output ride a follow-up user message.
                    for image in images {
                        followups.push(json!({
                            "role": "user",
                            "content": [image],
                        }));
                    }
                }
                other => {
                    warn!(
                        provider = self.caps.name,
                        "Unexpected {} block in tool sequence",
                        media_kind(other)
                    );
                }
            }
        }

        if !tool_calls.is_empty() {
            let mut assistant = json!({"role": "assistant"});
            let text = commentary
                .iter()
                .filter(|t| !t.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                assistant["content"] = json!(text);
            }
            assistant["tool_calls"] = json!(tool_calls);
            // Tool calls precede their results on the wire.
            let at = wire
                .iter()
                .position(|m| {
                    m["tool_call_id"]
                        .as_str()
                        .is_some_and(|id| tool_calls.iter().any(|c| c["id"] == id))
                })
                .unwrap_or(wire.len());
            wire.insert(at, assistant);
        }
        wire.append(&mut followups);
        Ok(())
    }

    /// Render tool output blocks into the `content` string plus any image
    /// parts the dialect can carry separately.
    fn render_tool_output(
        &self,
        output: &[ContentBlock],
    ) -> Result<(String, Vec<Value>), FormatError> {
        let mut lines: Vec<String> = Vec::new();
        let mut images: Vec<Value> = Vec::new();

        for block in output {
            match block {
                ContentBlock::Text { text } => lines.push(text.clone()),
                ContentBlock::Thinking { .. } => {}
                ContentBlock::Image { source } if self.caps.media.images => {
                    lines.push(
                        "This tool result included an image that is uploaded in the next message."
                            .to_string(),
                    );
                    images.push(image_part(source)?);
                }
                other => lines.push(media_placeholder(self.caps.name, other)),
            }
        }

        Ok((lines.join("\n"), images))
    }

    /// Render one merged agent run as a wire message.
    fn agent_run_message(&self, merged: MergedRun) -> Result<Value, FormatError> {
        let mut text = merged.text;
        let mut parts: Vec<Value> = Vec::new();

        for block in &merged.media {
            match block {
                ContentBlock::Image { source } if self.caps.media.images => {
                    parts.push(image_part(source)?);
                }
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

impl Formatter for OpenAiChatFormatter {
    fn caps(&self) -> &ProviderCaps {
        &self.caps
    }

    fn format(&self, messages: &[Message]) -> Result<WirePayload, FormatError> {
        let (system, body) = match self.caps.system_channel {
            // No system support: the leading system message stays in the
            // body and merges as a normal participant.
            SystemChannel::Inline => (None, messages),
            _ => merge::split_leading_system(messages),
        };

        let mut wire: Vec<Value> = Vec::new();
        let mut system_out = None;
        match (self.caps.system_channel, system) {
            (SystemChannel::MessageRole, Some(sys)) => {
                wire.push(json!({"role": "system", "content": sys.text()}));
            }
            (SystemChannel::TopLevelField, Some(sys)) => system_out = Some(sys.text()),
            _ => {}
        }

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
            json!({"role": "user", "content": CONTINUATION_PROMPT})
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
        if let Some(m) = merged.max_tokens.or(self.caps.mandatory_max_tokens) {
            request.set(self.max_tokens_key, json!(m));
        }
        if !merged.stop.is_empty() {
            request.set("stop", json!(merged.stop));
        }
        if let Some(seed) = merged.seed {
            request.set("seed", json!(seed));
        }
        request.extend_extra(&merged.extra);
    }

    fn apply_tools(&self, request: &mut RequestBody, tools: &[ToolDefinition]) {
        if tools.is_empty() {
            return;
        }
        let mut names: HashSet<String> = HashSet::new();
        let mut specs: Vec<Value> = Vec::new();
        for tool in tools {
            let name = sanitize_tool_name(&tool.name);
            if !names.insert(name.clone()) {
                warn!(provider = self.caps.name, tool = %tool.name, "Duplicate tool name, keeping first definition");
                continue;
            }
            specs.push(json!({
                "type": "function",
                "function": {
                    "name": name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            }));
        }
        request.set("tools", json!(specs));
    }

    fn apply_tool_choice(&self, request: &mut RequestBody, choice: &ToolChoice) {
        let value = match passes::degrade_tool_choice(choice, &self.caps) {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Tool(name) => json!({
                "type": "function",
                "function": {"name": name},
            }),
        };
        request.set("tool_choice", value);
    }

    fn parse_terminal(&self, raw: &Value, started: Instant) -> ChatResponse {
        let Some(message) = raw.pointer("/choices/0/message") else {
            return malformed_terminal(self.caps.name, raw, started);
        };

        let mut content: Vec<ContentBlock> = Vec::new();

        if let Some(reasoning) = message.get("reasoning_content").and_then(Value::as_str) {
            if !reasoning.is_empty() {
                content.push(ContentBlock::thinking(reasoning));
            }
        }
        if let Some(text) = message.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                content.push(ContentBlock::text(text));
            }
        }
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let raw_arguments = call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input = parse_tool_input(&name, &raw_arguments);
                content.push(ContentBlock::ToolUse {
                    id,
                    name,
                    input,
                    raw_arguments,
                });
            }
        }

        let mut resp = ChatResponse::new(
            raw["id"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            content,
        );
        resp.usage = ChatUsage::new(
            raw.pointer("/usage/prompt_tokens")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            raw.pointer("/usage/completion_tokens")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            started.elapsed().as_secs_f64(),
        );
        resp.finish_reason = raw
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(String::from);
        if let Some(model) = raw.get("model").and_then(Value::as_str) {
            resp.metadata.insert("model".into(), json!(model));
        }
        resp
    }

    fn parse_chunk(&self, raw: &Value, acc: &mut StreamAccumulator) -> bool {
        if !raw.is_object() {
            return false;
        }
        if let Some(id) = raw.get("id").and_then(Value::as_str) {
            acc.set_response_id(id);
        }

        let mut consumed = false;

        if let Some(usage) = raw.get("usage").filter(|u| u.is_object()) {
            acc.set_usage(
                usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
                usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
            );
            consumed = true;
        }

        if let Some(choice) = raw.pointer("/choices/0") {
            if let Some(delta) = choice.get("delta") {
                if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
                    if !reasoning.is_empty() {
                        acc.push_thinking(reasoning);
                        consumed = true;
                    }
                }
                if let Some(text) = delta.get("content").and_then(Value::as_str) {
                    if !text.is_empty() {
                        acc.push_text(text);
                        consumed = true;
                    }
                }
                if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        acc.apply_tool_delta(ToolCallDelta {
                            index: call["index"].as_u64().unwrap_or(0) as u32,
                            id: call.get("id").and_then(Value::as_str).map(String::from),
                            name: call
                                .pointer("/function/name")
                                .and_then(Value::as_str)
                                .map(String::from),
                            arguments: call
                                .pointer("/function/arguments")
                                .and_then(Value::as_str)
                                .map(String::from),
                        });
                    }
                    consumed = true;
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                acc.set_finish_reason(reason);
                consumed = true;
            }
        }

        consumed
    }
}

/// Function names must match `[a-zA-Z0-9_-]+`; anything else becomes `_`.
fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// An `image_url` content part; base64 sources become data URLs.
fn image_part(source: &MediaSource) -> Result<Value, FormatError> {
    let url = match source {
        MediaSource::Url { url } => {
            if url.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "image.source.url".into(),
                    reason: "empty url".into(),
                });
            }
            url.clone()
        }
        MediaSource::Base64 { media_type, data } => {
            if data.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "image.source.data".into(),
                    reason: "empty base64 payload".into(),
                });
            }
            format!("data:{media_type};base64,{data}")
        }
    };
    Ok(json!({"type": "image_url", "image_url": {"url": url}}))
}

fn media_kind(block: &ContentBlock) -> &'static str {
    match block {
        ContentBlock::Image { .. } => "image",
        ContentBlock::Audio { .. } => "audio",
        ContentBlock::Video { .. } => "video",
        _ => "content",
    }
}
