//! Core data types.

pub mod generation;
pub mod message;
pub mod stream;

pub use generation::{
    GenerationOptions, ReasoningEffort, ReasoningSummary, ResponsesOptions, TextVerbosity,
    ToolChoice, ToolDefinition, Truncation,
};
pub use message::{
    ContentPart, DataContent, ModelMessage, ResultContent, Role, ToolCallPart, ToolResultPart,
};
pub use stream::{FinishReason, StreamEvent};
