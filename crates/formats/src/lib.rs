//! # crosstalk formats
//!
//! Bidirectional translation between the provider-agnostic conversation
//! model and concrete LLM wire dialects.
//!
//! The moving parts:
//! - [`formatter::Formatter`] — the pure formatting contract each dialect
//!   implements
//! - [`merge`] — collapses N-party transcripts into the 4-role shape chat
//!   APIs expose
//! - [`stream::StreamAccumulator`] — rebuilds complete tool calls and
//!   reasoning/text content from partial deltas, one instance per stream
//! - [`caps`] + [`passes`] — vendor quirks as data plus composable
//!   transformations, not subclass chains

pub mod anthropic;
pub mod caps;
pub mod factory;
pub mod formatter;
pub mod gemini;
pub mod merge;
pub mod openai_chat;
pub mod passes;
pub mod request;
pub mod stream;

pub use anthropic::AnthropicFormatter;
pub use caps::{MediaSupport, ProviderCaps, SystemChannel, ToolChoiceSupport};
pub use factory::formatter_for;
pub use formatter::{Formatter, RawResponse, WirePayload};
pub use gemini::GeminiFormatter;
pub use merge::{Segment, HISTORY_CLOSE, HISTORY_OPEN};
pub use openai_chat::OpenAiChatFormatter;
pub use request::RequestBody;
pub use stream::{StreamAccumulator, ToolCallDelta};
