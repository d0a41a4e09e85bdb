//! Continuation markers: resuming upstream conversation state.
//!
//! When a Responses-protocol server finishes a turn it reports the turn's
//! id. The orchestrator hands that id back to the host as an opaque data
//! part; on a later turn the request builder finds the most recent marker
//! for the active model, resends only the messages after it, and passes
//! the embedded id as the continuation parameter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::types::message::{ContentPart, DataContent, ModelMessage};

/// MIME type identifying a continuation-marker data part.
pub const MARKER_MIME_TYPE: &str = "application/x-turn-continuation";

/// A decoded continuation marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationMarker {
    pub model_id: String,
    pub response_id: String,
}

impl ContinuationMarker {
    pub fn new(model_id: impl Into<String>, response_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            response_id: response_id.into(),
        }
    }

    /// Encode as the data part handed to the host for persistence.
    ///
    /// The payload is the UTF-8 string `"<modelId>\<responseId>"` joined
    /// by a single backslash; hosts persisting it across sessions rely on
    /// this staying bit-compatible.
    pub fn to_part(&self) -> ContentPart {
        ContentPart::Data(self.to_data())
    }

    /// The raw data part content.
    pub fn to_data(&self) -> DataContent {
        let payload = format!("{}\\{}", self.model_id, self.response_id);
        DataContent {
            data: STANDARD.encode(payload.as_bytes()),
            mime_type: MARKER_MIME_TYPE.to_string(),
        }
    }

    /// Decode from a content part, if it is a marker.
    pub fn from_part(part: &ContentPart) -> Option<Self> {
        let ContentPart::Data(data) = part else {
            return None;
        };
        if data.mime_type != MARKER_MIME_TYPE {
            return None;
        }
        let bytes = STANDARD.decode(&data.data).ok()?;
        let payload = String::from_utf8(bytes).ok()?;
        let (model_id, response_id) = payload.split_once('\\')?;
        if model_id.is_empty() || response_id.is_empty() {
            return None;
        }
        Some(Self::new(model_id, response_id))
    }
}

/// Find the resume point for `model_id` in a conversation.
///
/// Returns the index of the message carrying the most recent matching
/// marker and the embedded response id. Messages at or before that index
/// are elided from the resent history; markers for other models are
/// ignored.
pub fn find_resume_point(messages: &[ModelMessage], model_id: &str) -> Option<(usize, String)> {
    messages.iter().enumerate().rev().find_map(|(idx, msg)| {
        msg.content.iter().rev().find_map(|part| {
            ContinuationMarker::from_part(part)
                .filter(|marker| marker.model_id == model_id)
                .map(|marker| (idx, marker.response_id))
        })
    })
}
