//! Multi-party conversation merging.
//!
//! Most chat APIs expose four roles and no notion of distinct named
//! participants. The merger collapses an N-party transcript into that
//! shape: tool traffic passes through natively, everything else is grouped
//! into runs and rendered as a delimited history block inside a single wire
//! message.
//!
//! The pass is linear in the number of messages and allocates only the
//! output runs.

use crosstalk_core::message::{ContentBlock, Message, Role};

/// Opening delimiter of a merged transcript.
pub const HISTORY_OPEN: &str = "<history>";
/// Closing delimiter of a merged transcript.
pub const HISTORY_CLOSE: &str = "</history>";

/// A maximal contiguous run of one classification.
#[derive(Debug, PartialEq)]
pub enum Segment<'a> {
    /// Native tool-call / tool-result traffic, emitted per dialect with id
    /// correlation intact.
    ToolRun(Vec<&'a Message>),
    /// Conversational turns merged into one wire message.
    AgentRun(Vec<&'a Message>),
}

/// Split off a leading system message, if the transcript starts with one.
///
/// Dialects with a system channel surface it there; dialects without one
/// fold it back into the first agent run.
pub fn split_leading_system(messages: &[Message]) -> (Option<&Message>, &[Message]) {
    match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    }
}

/// Partition messages into maximal contiguous tool/agent runs.
pub fn partition(messages: &[Message]) -> Vec<Segment<'_>> {
    let mut segments: Vec<Segment<'_>> = Vec::new();

    for msg in messages {
        let tool = msg.is_tool_sequence();
        match segments.last_mut() {
            Some(Segment::ToolRun(run)) if tool => run.push(msg),
            Some(Segment::AgentRun(run)) if !tool => run.push(msg),
            _ => segments.push(if tool {
                Segment::ToolRun(vec![msg])
            } else {
                Segment::AgentRun(vec![msg])
            }),
        }
    }

    segments
}

/// One agent run rendered for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRun {
    /// The delimited history text, preamble included when supplied.
    pub text: String,
    /// Media blocks pulled out of the text stream, in original order.
    /// The dialect decides whether these become native parts or placeholders.
    pub media: Vec<ContentBlock>,
}

/// Merge one agent run into a single history block.
///
/// One `"{RoleLabel} {Name}: {text}"` line per text block, in original
/// order. Thinking blocks are dropped. The preamble must be passed for the
/// first emitted run only.
pub fn merge_agent_run(run: &[&Message], preamble: Option<&str>) -> MergedRun {
    let mut lines: Vec<String> = Vec::new();
    let mut media: Vec<ContentBlock> = Vec::new();

    for msg in run {
        let label = match &msg.name {
            Some(name) => format!("{} {}", msg.role.label(), name),
            None => msg.role.label().to_string(),
        };
        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => lines.push(format!("{label}: {text}")),
                ContentBlock::Thinking { .. } => {}
                ContentBlock::Image { .. }
                | ContentBlock::Audio { .. }
                | ContentBlock::Video { .. } => media.push(block.clone()),
                // Tool blocks never reach an agent run: classification routes
                // any message carrying them into a ToolRun.
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {}
            }
        }
    }

    let mut parts: Vec<&str> = Vec::with_capacity(lines.len() + 3);
    if let Some(p) = preamble {
        parts.push(p);
    }
    parts.push(HISTORY_OPEN);
    parts.extend(lines.iter().map(String::as_str));
    parts.push(HISTORY_CLOSE);

    MergedRun {
        text: parts.join("\n"),
        media,
    }
}
