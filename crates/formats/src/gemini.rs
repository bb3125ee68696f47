//! Gemini generateContent dialect.
//!
//! - two wire roles (`user` / `model`): the canonical assistant role is
//!   renamed by the role-rewrite pass, tool results ride user turns
//! - system instructions in the `systemInstruction` channel
//! - `functionCall` / `functionResponse` parts with no call ids: ids are
//!   synthesized at parse time so correlation holds upstream
//! - media as `inlineData` (base64) or `fileData` (URI) parts
//! - streaming chunks are whole `GenerateContentResponse` objects; text
//!   fragments append, function calls arrive complete

use std::collections::HashSet;
use std::time::Instant;

use crosstalk_core::error::FormatError;
use crosstalk_core::message::{ContentBlock, MediaSource, Message};
use crosstalk_core::options::GenerateOptions;
use crosstalk_core::response::{ChatResponse, ChatUsage};
use crosstalk_core::tool::{ToolChoice, ToolDefinition};
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::caps::{MediaSupport, ProviderCaps, SystemChannel, ToolChoiceSupport};
use crate::formatter::{malformed_terminal, Formatter, WirePayload};
use crate::merge::{self, MergedRun, Segment};
use crate::passes;
use crate::request::RequestBody;
use crate::stream::{StreamAccumulator, ToolCallDelta};

const CONTINUATION_PROMPT: &str = "Please continue.";

const GEMINI_CAPS: ProviderCaps = ProviderCaps {
    name: "gemini",
    system_channel: SystemChannel::TopLevelField,
    media: MediaSupport::ALL,
    tool_choice: ToolChoiceSupport::Full,
    requires_user_final: true,
    role_rewrites: &[("assistant", "model")],
    strip_fields: &[],
    mandatory_max_tokens: None,
};

/// Formatter for the Gemini generateContent API.
pub struct GeminiFormatter {
    caps: ProviderCaps,
    preamble: Option<String>,
}

impl GeminiFormatter {
    pub fn new() -> Self {
        Self {
            caps: GEMINI_CAPS,
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
        let mut model_parts: Vec<Value> = Vec::new();
        let mut has_call = false;

        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        model_parts.push(json!({"text": text}));
                    }
                }
                ContentBlock::Thinking { .. } => {}
                ContentBlock::ToolUse {
                    id, name, input, ..
                } => {
                    seen_ids.insert(id.clone());
                    has_call = true;
                    model_parts.push(json!({
                        "functionCall": {"name": name, "args": input},
                    }));
                }
                ContentBlock::ToolResult { id, name, output } => {
                    if !seen_ids.contains(id) {
                        return Err(FormatError::OrphanToolResult { id: id.clone() });
                    }
                    let rendered: Vec<String> = output
                        .iter()
                        .filter_map(ContentBlock::as_text)
                        .map(String::from)
                        .collect();
                    wire.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": name,
                                "response": {"output": rendered.join("\n")},
                            }
                        }],
                    }));
                }
                _ => {
                    warn!(
                        provider = self.caps.name,
                        "Dropping media block found in tool sequence"
                    );
                }
            }
        }

        if has_call {
            wire.push(json!({"role": "assistant", "parts": model_parts}));
        }
        Ok(())
    }

    fn agent_run_message(&self, merged: MergedRun) -> Result<Value, FormatError> {
        let mut parts: Vec<Value> = vec![json!({"text": merged.text})];
        for block in &merged.media {
            parts.push(media_part(block)?);
        }
        Ok(json!({"role": "user", "parts": parts}))
    }
}

impl Default for GeminiFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for GeminiFormatter {
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
            json!({"role": "user", "parts": [{"text": CONTINUATION_PROMPT}]})
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
        let mut config = Map::new();
        if let Some(t) = merged.temperature {
            config.insert("temperature".into(), json!(t));
        }
        if let Some(p) = merged.top_p {
            config.insert("topP".into(), json!(p));
        }
        if let Some(m) = merged.max_tokens {
            config.insert("maxOutputTokens".into(), json!(m));
        }
        if !merged.stop.is_empty() {
            config.insert("stopSequences".into(), json!(merged.stop));
        }
        if let Some(seed) = merged.seed {
            config.insert("seed".into(), json!(seed));
        }
        if !config.is_empty() {
            request.set("generationConfig", Value::Object(config));
        }
        request.extend_extra(&merged.extra);
    }

    fn apply_tools(&self, request: &mut RequestBody, tools: &[ToolDefinition]) {
        if tools.is_empty() {
            return;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        request.set("tools", json!([{"functionDeclarations": declarations}]));
    }

    fn apply_tool_choice(&self, request: &mut RequestBody, choice: &ToolChoice) {
        let config = match passes::degrade_tool_choice(choice, &self.caps) {
            ToolChoice::Auto => json!({"mode": "AUTO"}),
            ToolChoice::None => json!({"mode": "NONE"}),
            ToolChoice::Required => json!({"mode": "ANY"}),
            ToolChoice::Tool(name) => json!({"mode": "ANY", "allowedFunctionNames": [name]}),
        };
        request.set("toolConfig", json!({"functionCallingConfig": config}));
    }

    fn parse_terminal(&self, raw: &Value, started: Instant) -> ChatResponse {
        let Some(parts) = raw
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        else {
            return malformed_terminal(self.caps.name, raw, started);
        };

        let mut content: Vec<ContentBlock> = Vec::new();
        for part in parts {
            append_part(part, &mut content);
        }

        let mut resp = ChatResponse::new(
            raw.get("responseId")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            content,
        );
        resp.usage = ChatUsage::new(
            raw.pointer("/usageMetadata/promptTokenCount")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            raw.pointer("/usageMetadata/candidatesTokenCount")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            started.elapsed().as_secs_f64(),
        );
        resp.finish_reason = raw
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .map(String::from);
        if let Some(model) = raw.get("modelVersion").and_then(Value::as_str) {
            resp.metadata.insert("model".into(), json!(model));
        }
        resp
    }

    fn parse_chunk(&self, raw: &Value, acc: &mut StreamAccumulator) -> bool {
        if !raw.is_object() {
            return false;
        }
        if let Some(id) = raw.get("responseId").and_then(Value::as_str) {
            acc.set_response_id(id);
        }

        let mut consumed = false;

        if let Some(parts) = raw
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if part.get("thought").and_then(Value::as_bool) == Some(true) {
                        acc.push_thinking(text);
                    } else {
                        acc.push_text(text);
                    }
                    consumed = true;
                } else if let Some(call) = part.get("functionCall") {
                    // Calls arrive whole; the next free index keeps output
                    // order aligned with arrival order.
                    acc.apply_tool_delta(ToolCallDelta {
                        index: acc.tool_call_count() as u32,
                        id: Some(format!("call_{}", Uuid::new_v4())),
                        name: call
                            .get("name")
                            .and_then(Value::as_str)
                            .map(String::from),
                        arguments: Some(
                            call.get("args").cloned().unwrap_or(json!({})).to_string(),
                        ),
                    });
                    consumed = true;
                }
            }
        }

        if let Some(reason) = raw
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            acc.set_finish_reason(reason);
            consumed = true;
        }
        if let Some(meta) = raw.get("usageMetadata") {
            acc.set_usage(
                meta.get("promptTokenCount")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
                meta.get("candidatesTokenCount")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
            );
            consumed = true;
        }

        consumed
    }
}

/// Convert one response part into content blocks.
fn append_part(part: &Value, content: &mut Vec<ContentBlock>) {
    if let Some(text) = part.get("text").and_then(Value::as_str) {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            content.push(ContentBlock::thinking(text));
        } else {
            content.push(ContentBlock::text(text));
        }
    } else if let Some(call) = part.get("functionCall") {
        let name = call
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = call.get("args").cloned().unwrap_or(json!({}));
        let raw_arguments = args.to_string();
        let input = if args.is_object() { args } else { json!({}) };
        content.push(ContentBlock::ToolUse {
            // The dialect carries no call ids; synthesize one so result
            // correlation works upstream.
            id: format!("call_{}", Uuid::new_v4()),
            name,
            input,
            raw_arguments,
        });
    }
}

/// A media part: inline base64 or a file URI reference.
fn media_part(block: &ContentBlock) -> Result<Value, FormatError> {
    let source = match block {
        ContentBlock::Image { source }
        | ContentBlock::Audio { source }
        | ContentBlock::Video { source } => source,
        other => {
            return Err(FormatError::InvalidStructure(format!(
                "expected a media block, got {other:?}"
            )))
        }
    };
    match source {
        MediaSource::Base64 { media_type, data } => {
            if data.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "media.source.data".into(),
                    reason: "empty base64 payload".into(),
                });
            }
            Ok(json!({"inlineData": {"mimeType": media_type, "data": data}}))
        }
        MediaSource::Url { url } => {
            if url.is_empty() {
                return Err(FormatError::UnresolvableMedia {
                    field: "media.source.url".into(),
                    reason: "empty url".into(),
                });
            }
            Ok(json!({"fileData": {"fileUri": url}}))
        }
    }
}
