//! Common imports for working with duplex.

pub use crate::config::{ContinuationSupport, ModelConfig};
pub use crate::error::{DuplexError, Result};
pub use crate::protocol::continuation::ContinuationMarker;
pub use crate::protocol::WireApi;
pub use crate::stream::{CompletedToolCall, InlineToolCallScanner, ToolCallReconstructor};
pub use crate::turn::{PartSink, ResponsePart, TurnRunner};
pub use crate::types::{
    ContentPart, DataContent, FinishReason, GenerationOptions, ModelMessage, ResponsesOptions,
    Role, StreamEvent, ToolChoice, ToolDefinition,
};
