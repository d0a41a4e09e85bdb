//! Small cross-cutting helpers.

use crate::types::generation::GenerationOptions;
use crate::types::message::{ContentPart, ModelMessage, ResultContent};

/// Rough characters-per-token divisor for the preflight size check.
const CHARS_PER_TOKEN: usize = 4;

/// Naive prompt-size estimate in tokens.
///
/// Counts characters across message text, tool results, binary payloads,
/// and declared tool schemas. Intentionally crude; it only guards against
/// gross oversubscription before a request is dispatched.
pub fn estimate_prompt_tokens(messages: &[ModelMessage], options: &GenerationOptions) -> u32 {
    let mut chars = 0usize;

    for msg in messages {
        for part in &msg.content {
            chars += match part {
                ContentPart::Text { text } => text.len(),
                ContentPart::Data(data) => data.data.len(),
                ContentPart::ToolCall(tc) => tc.name.len() + tc.input.to_string().len(),
                ContentPart::ToolResult(tr) => tr
                    .content
                    .iter()
                    .map(|c| match c {
                        ResultContent::Text { text } => text.len(),
                        ResultContent::Data(data) => data.data.len(),
                    })
                    .sum(),
            };
        }
    }

    if let Some(tools) = &options.tools {
        for tool in tools {
            chars += tool.name.len() + tool.description.len() + tool.parameters.to_string().len();
        }
    }

    (chars / CHARS_PER_TOKEN) as u32
}
