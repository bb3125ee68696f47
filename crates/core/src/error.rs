//! Error types for the crosstalk domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all crosstalk operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Formatting errors ---
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    // --- Transport errors (raised by external collaborators) ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Fatal structural violations raised while formatting a conversation.
///
/// Everything recoverable (unsupported media, degraded tool choice,
/// malformed chunks) is absorbed inside the formatters and never surfaces
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Unresolvable media source in {field}: {reason}")]
    UnresolvableMedia { field: String, reason: String },

    #[error("Tool result {id} does not correlate to any prior tool call")]
    OrphanToolResult { id: String },

    #[error("Invalid message structure: {0}")]
    InvalidStructure(String),
}

/// Errors the transport collaborator can raise at the seam.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Provider returned status {status_code}: {message}")]
    Status { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    Interrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_displays_field() {
        let err = Error::Format(FormatError::UnresolvableMedia {
            field: "content[2].source".into(),
            reason: "empty base64 payload".into(),
        });
        assert!(err.to_string().contains("content[2].source"));
        assert!(err.to_string().contains("empty base64 payload"));
    }

    #[test]
    fn orphan_tool_result_displays_id() {
        let err = Error::Format(FormatError::OrphanToolResult {
            id: "call_9".into(),
        });
        assert!(err.to_string().contains("call_9"));
    }

    #[test]
    fn transport_error_displays_status() {
        let err = Error::Transport(TransportError::Status {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
    }
}
