//! Stateful reconstruction of streamed tool calls.

pub mod inline;
pub mod tool_calls;

pub use inline::{InlineToolCallScanner, ScanOutput};
pub use tool_calls::{CompletedToolCall, ToolCallReconstructor};
