//! Message types for model communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelMessage {
    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_part(Role::System, ContentPart::Text { text: text.into() })
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_part(Role::User, ContentPart::Text { text: text.into() })
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_part(Role::Assistant, ContentPart::Text { text: text.into() })
    }

    /// Create a tool result message with a single text output.
    pub fn tool_result(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::with_part(
            Role::Tool,
            ContentPart::ToolResult(ToolResultPart {
                tool_call_id: tool_call_id.into(),
                content: vec![ResultContent::Text {
                    text: output.into(),
                }],
            }),
        )
    }

    /// Create a user message with image content.
    pub fn user_with_image(text: impl Into<String>, data: String, mime_type: String) -> Self {
        Self {
            role: Role::User,
            content: vec![
                ContentPart::Text { text: text.into() },
                ContentPart::Data(DataContent { data, mime_type }),
            ],
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    fn with_part(role: Role, part: ContentPart) -> Self {
        Self {
            role,
            content: vec![part],
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Extract the text content, concatenating all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract tool calls from this message.
    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Data(DataContent),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
}

/// Binary content embedded in a message: base64 payload plus MIME type.
///
/// Carries images as well as opaque host-persisted payloads such as
/// continuation markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataContent {
    pub data: String,
    pub mime_type: String,
}

impl DataContent {
    /// Render as an inline `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Whether this part holds an image payload.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A tool execution result: ordered text and binary outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub content: Vec<ResultContent>,
}

/// One output of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultContent {
    Text { text: String },
    Data(DataContent),
}

impl ToolResultPart {
    /// Concatenate the text outputs.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ResultContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// The image outputs, in order.
    pub fn images(&self) -> Vec<&DataContent> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ResultContent::Data(data) if data.is_image() => Some(data),
                _ => None,
            })
            .collect()
    }
}
