//! Wire-protocol request builders and stream parsers.

pub mod chat;
pub mod continuation;
pub mod http;
pub mod responses;

use serde::{Deserialize, Serialize};

use crate::types::stream::StreamEvent;

/// The two wire protocols an OpenAI-compatible endpoint may speak.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireApi {
    /// Flat messages-array protocol (`/chat/completions`).
    Chat,
    /// Ordered-items protocol (`/responses`).
    Responses,
}

impl WireApi {
    /// The endpoint resource path for this protocol.
    pub fn resource_path(&self) -> &'static str {
        match self {
            WireApi::Chat => "/chat/completions",
            WireApi::Responses => "/responses",
        }
    }
}

/// A fully-built outbound request: endpoint URL plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub body: serde_json::Value,
}

/// Normalize a configured base URL to end with the protocol's resource
/// path.
///
/// Tolerates bases that already end in the resource path, end in a
/// versioned prefix like `/v1`, or carry neither.
pub fn endpoint_url(base_url: &str, api: WireApi) -> String {
    let base = base_url.trim_end_matches('/');
    let path = api.resource_path();
    if base.ends_with(path) {
        base.to_string()
    } else {
        format!("{base}{path}")
    }
}

/// Line-by-line SSE decoder for one protocol.
///
/// `parse_line` returns at most one event per call; when a single frame
/// expands to several events the extras are queued and surfaced through
/// `pop_pending`, which the orchestrator drains after every line.
pub trait EventParser: Send {
    fn parse_line(&mut self, line: &str) -> StreamEvent;
    fn pop_pending(&mut self) -> Option<StreamEvent>;
}

/// SSE data-line sentinel marking end of stream.
pub(crate) const SSE_DONE: &str = "[DONE]";

/// Extract the payload of an SSE `data:` line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
