//! Message and content-block domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the agent loop builds messages, a formatter turns them into a provider
//! wire payload, and response parsing turns wire output back into blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (or a named agent speaking as one)
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (identity, rules)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    /// Human-readable label used when transcripts are rendered as text.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
            Role::Tool => "Tool",
        }
    }
}

/// Where the bytes of a media block live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaSource {
    /// A remote reference the provider fetches itself.
    Url { url: String },
    /// Inline payload, base64-encoded.
    Base64 { media_type: String, data: String },
}

impl MediaSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Base64 {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Encode raw bytes into an inline source.
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine as _;
        Self::Base64 {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// The media type, when known. Url sources carry none.
    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Url { .. } => None,
            Self::Base64 { media_type, .. } => Some(media_type),
        }
    }
}

/// An atomic unit of message content.
///
/// `Thinking` is retained in memory for the agent loop but is never
/// serialized into an outbound wire payload by any formatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: MediaSource,
    },
    Audio {
        source: MediaSource,
    },
    Video {
        source: MediaSource,
    },
    Thinking {
        thinking: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        /// Parsed argument object. Empty when `raw_arguments` failed to parse.
        input: Value,
        /// The argument string exactly as the provider produced it.
        raw_arguments: String,
    },
    /// The outcome of a tool invocation, correlated by `id`.
    ToolResult {
        id: String,
        name: String,
        output: Vec<ContentBlock>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(source: MediaSource) -> Self {
        Self::Image { source }
    }

    pub fn audio(source: MediaSource) -> Self {
        Self::Audio { source }
    }

    pub fn video(source: MediaSource) -> Self {
        Self::Video { source }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        let raw = input.to_string();
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
            raw_arguments: raw,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        output: Vec<ContentBlock>,
    ) -> Self {
        Self::ToolResult {
            id: id.into(),
            name: name.into(),
            output,
        }
    }

    /// Get the text if this is a Text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the reasoning text if this is a Thinking block.
    pub fn as_thinking(&self) -> Option<&str> {
        match self {
            Self::Thinking { thinking } => Some(thinking),
            _ => None,
        }
    }

    /// True for Image/Audio/Video blocks.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image { .. } | Self::Audio { .. } | Self::Video { .. }
        )
    }

    /// True for ToolUse/ToolResult blocks.
    pub fn is_tool(&self) -> bool {
        matches!(self, Self::ToolUse { .. } | Self::ToolResult { .. })
    }
}

/// A single message in a conversation.
///
/// Messages are immutable once constructed: builders below are the only
/// sanctioned way to assemble one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Sender identity, for multi-party transcripts (None for anonymous)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Who sent this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Timestamp
    pub created: DateTime<Utc>,

    /// Optional metadata (channel info, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            role,
            content: Vec::new(),
            created: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create an empty user message.
    pub fn user() -> Self {
        Self::with_role(Role::User)
    }

    /// Create an empty assistant message.
    pub fn assistant() -> Self {
        Self::with_role(Role::Assistant)
    }

    /// Create a system message with the given instruction text.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System).with_text(text)
    }

    /// Create a tool-role message carrying one tool result.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: Vec<ContentBlock>,
    ) -> Self {
        Self::with_role(Role::Tool).with_content(ContentBlock::tool_result(
            call_id, tool_name, output,
        ))
    }

    /// Set the sender identity.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append any content block.
    pub fn with_content(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    /// Append a text block.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    /// Append an image block.
    pub fn with_image(self, source: MediaSource) -> Self {
        self.with_content(ContentBlock::image(source))
    }

    /// Append a thinking block.
    pub fn with_thinking(self, thinking: impl Into<String>) -> Self {
        self.with_content(ContentBlock::thinking(thinking))
    }

    /// Append a tool-use block.
    pub fn with_tool_use(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        self.with_content(ContentBlock::tool_use(id, name, input))
    }

    /// Set a metadata key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True when this message belongs to a tool sequence: role Tool, or any
    /// tool-use/tool-result block in its content.
    pub fn is_tool_sequence(&self) -> bool {
        self.role == Role::Tool || self.content.iter().any(ContentBlock::is_tool)
    }

    /// Concatenated text of all Text blocks, joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_assembles_user_message() {
        let msg = Message::user().named("Alice").with_text("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.name.as_deref(), Some("Alice"));
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(!msg.is_tool_sequence());
    }

    #[test]
    fn tool_use_marks_tool_sequence() {
        let msg = Message::assistant().with_tool_use("call_1", "shell", json!({"cmd": "ls"}));
        assert!(msg.is_tool_sequence());
    }

    #[test]
    fn tool_result_message_shape() {
        let msg = Message::tool_result("call_1", "shell", vec![ContentBlock::text("ok")]);
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.is_tool_sequence());
        match &msg.content[0] {
            ContentBlock::ToolResult { id, name, output } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "shell");
                assert_eq!(output[0].as_text(), Some("ok"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn tool_use_preserves_raw_arguments() {
        let block = ContentBlock::tool_use("c1", "calc", json!({"expr": "2+2"}));
        match block {
            ContentBlock::ToolUse { raw_arguments, .. } => {
                let parsed: Value = serde_json::from_str(&raw_arguments).unwrap();
                assert_eq!(parsed["expr"], "2+2");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn media_source_from_bytes_roundtrips() {
        use base64::Engine as _;
        let source = MediaSource::from_bytes("image/png", b"\x89PNG");
        match &source {
            MediaSource::Base64 { media_type, data } => {
                assert_eq!(media_type, "image/png");
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .unwrap();
                assert_eq!(decoded, b"\x89PNG");
            }
            other => panic!("expected base64 source, got {other:?}"),
        }
        assert_eq!(source.media_type(), Some("image/png"));
    }

    #[test]
    fn block_order_is_preserved() {
        let msg = Message::assistant()
            .with_thinking("hmm")
            .with_text("first")
            .with_image(MediaSource::url("https://example.com/cat.png"))
            .with_text("second");
        let kinds: Vec<_> = msg
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::Thinking { .. } => "thinking",
                ContentBlock::Text { .. } => "text",
                ContentBlock::Image { .. } => "image",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["thinking", "text", "image", "text"]);
    }

    #[test]
    fn serialization_roundtrip() {
        let msg = Message::user()
            .named("Bob")
            .with_text("hi")
            .with_image(MediaSource::base64("image/jpeg", "aGVsbG8="));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::User.label(), "User");
        assert_eq!(Role::Assistant.label(), "Assistant");
        assert_eq!(Role::System.label(), "System");
        assert_eq!(Role::Tool.label(), "Tool");
    }
}
