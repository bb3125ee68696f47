//! Config-driven formatter selection.

use crosstalk_config::ProviderProfile;
use tracing::warn;

use crate::anthropic::AnthropicFormatter;
use crate::formatter::Formatter;
use crate::gemini::GeminiFormatter;
use crate::openai_chat::OpenAiChatFormatter;

/// Build the formatter a provider profile names.
///
/// Returns None for an unknown format string; config validation normally
/// rejects those before this point.
pub fn formatter_for(profile: &ProviderProfile) -> Option<Box<dyn Formatter>> {
    let formatter: Box<dyn Formatter> = match profile.format.as_str() {
        "openai-chat" => Box::new(with_preamble(OpenAiChatFormatter::openai(), profile)),
        "openai-reasoning" => Box::new(with_preamble(OpenAiChatFormatter::reasoning(), profile)),
        "ollama" => Box::new(with_preamble(OpenAiChatFormatter::ollama(), profile)),
        "deepseek" => Box::new(with_preamble(OpenAiChatFormatter::deepseek(), profile)),
        "anthropic" => {
            let f = AnthropicFormatter::new();
            Box::new(match &profile.preamble {
                Some(p) => f.with_preamble(p.clone()),
                None => f,
            })
        }
        "gemini" => {
            let f = GeminiFormatter::new();
            Box::new(match &profile.preamble {
                Some(p) => f.with_preamble(p.clone()),
                None => f,
            })
        }
        other => {
            warn!(format = other, "Unknown wire format requested");
            return None;
        }
    };
    Some(formatter)
}

fn with_preamble(formatter: OpenAiChatFormatter, profile: &ProviderProfile) -> OpenAiChatFormatter {
    match &profile.preamble {
        Some(p) => formatter.with_preamble(p.clone()),
        None => formatter,
    }
}
