//! Provider capability descriptors.
//!
//! A `ProviderCaps` is a plain data record describing what a wire dialect
//! can express. The quirk passes in [`crate::passes`] and the shared
//! formatting paths key off this descriptor instead of per-vendor code
//! branches, so adding a vendor variant is a matter of writing one of these.

/// How a dialect accepts system instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemChannel {
    /// A message with role "system" in the message list (OpenAI chat).
    MessageRole,
    /// A dedicated top-level request field (Anthropic, Gemini).
    TopLevelField,
    /// No system support at all: folded into the first merged run as a
    /// normal participant.
    Inline,
}

/// How much of the generic tool-choice directive a dialect honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoiceSupport {
    /// Auto / none / required / specific tool all supported.
    Full,
    /// Only automatic selection; everything else degrades to auto.
    AutoOnly,
}

/// Which media kinds a dialect accepts as message parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaSupport {
    pub images: bool,
    pub audio: bool,
    pub video: bool,
}

impl MediaSupport {
    pub const NONE: MediaSupport = MediaSupport {
        images: false,
        audio: false,
        video: false,
    };

    pub const IMAGES: MediaSupport = MediaSupport {
        images: true,
        audio: false,
        video: false,
    };

    pub const ALL: MediaSupport = MediaSupport {
        images: true,
        audio: true,
        video: true,
    };
}

/// Capability descriptor for one wire dialect variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCaps {
    /// Variant name, used in log signals ("openai", "ollama", ...)
    pub name: &'static str,

    /// Where system instructions go
    pub system_channel: SystemChannel,

    /// Which media kinds survive as native parts
    pub media: MediaSupport,

    /// Tool-choice expressiveness
    pub tool_choice: ToolChoiceSupport,

    /// The dialect rejects conversations ending on an assistant turn
    pub requires_user_final: bool,

    /// Canonical-role renames applied to the finished wire messages
    pub role_rewrites: &'static [(&'static str, &'static str)],

    /// Fields stripped from every wire message as a final pass
    pub strip_fields: &'static [&'static str],

    /// The dialect mandates an output-token cap; used when the caller and
    /// the configured defaults both leave `max_tokens` unset
    pub mandatory_max_tokens: Option<u32>,
}
