//! The protocol-neutral streaming event vocabulary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One event decoded from an upstream SSE line.
///
/// This is the entire contract between the wire-protocol parsers and the
/// orchestrator; no protocol-specific vocabulary crosses this boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Visible text delta.
    Text { content: String },
    /// Fragment of an in-flight tool call, addressed by stream index.
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    /// Reasoning/thinking delta.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// The upstream turn id to resume from on a later request.
    Continuation { response_id: String },
    /// Terminal finish reason declared by the server.
    Finish { reason: FinishReason },
    /// End of stream.
    Done,
    /// Line carried nothing of interest (or failed to parse).
    Skip,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Parse an upstream `finish_reason` string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "length" => Some(Self::Length),
            "tool_calls" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }

    /// Whether this reason declares the generation definitively complete,
    /// making still-unparseable tool-call buffers a hard error.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Stop | Self::ToolCalls)
    }
}
