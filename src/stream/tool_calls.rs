//! Reassembly of tool calls from structured argument deltas.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::DuplexError;
use crate::types::stream::FinishReason;

/// A fully-reconstructed tool call, ready for the host to execute.
///
/// Both reconstruction channels (structured deltas and inline control
/// tokens) emit this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

pub(crate) fn generated_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    completed: bool,
}

impl ToolCallBuffer {
    fn parse_arguments(&self) -> Option<Value> {
        serde_json::from_str(self.arguments.trim()).ok()
    }

    fn complete(&self, arguments: Value) -> Option<CompletedToolCall> {
        let name = self.name.as_deref().filter(|n| !n.is_empty())?;
        Some(CompletedToolCall {
            id: self.id.clone().unwrap_or_else(generated_call_id),
            name: name.to_string(),
            arguments,
        })
    }

    /// Eager completion: arguments must form a JSON object.
    fn try_complete(&self) -> Option<CompletedToolCall> {
        let parsed = self.parse_arguments().filter(Value::is_object)?;
        self.complete(parsed)
    }

    /// Boundary completion: any syntactically-valid JSON is accepted.
    fn force_complete(&self) -> Option<CompletedToolCall> {
        let parsed = self.parse_arguments()?;
        self.complete(parsed)
    }
}

/// Accumulates `ToolCallDelta` events into complete calls, keyed by the
/// stream-assigned index.
///
/// A buffer flushes the instant it has a name and syntactically-valid
/// JSON-object arguments; its index is then marked completed so late
/// duplicate deltas for the same call are ignored.
#[derive(Debug, Default)]
pub struct ToolCallReconstructor {
    buffers: BTreeMap<usize, ToolCallBuffer>,
}

impl ToolCallReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta; returns the completed call on the delta that made
    /// its arguments parse.
    pub fn apply(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Option<CompletedToolCall> {
        let buf = self.buffers.entry(index).or_default();
        if buf.completed {
            return None;
        }
        if buf.id.is_none() {
            buf.id = id.filter(|s| !s.is_empty());
        }
        if buf.name.is_none() {
            buf.name = name.filter(|s| !s.is_empty());
        }
        if let Some(fragment) = arguments {
            buf.arguments.push_str(&fragment);
        }

        let call = buf.try_complete()?;
        buf.completed = true;
        Some(call)
    }

    /// Flush remaining buffers at a server-declared finish boundary.
    ///
    /// At a definitive finish the server has declared generation complete,
    /// so arguments that still fail to parse are a real upstream defect
    /// and fail the turn. Empty argument buffers are legal no-argument
    /// calls.
    pub fn finish(&mut self, reason: FinishReason) -> Result<Vec<CompletedToolCall>, DuplexError> {
        if !reason.is_definitive() {
            return Ok(Vec::new());
        }
        let mut flushed = Vec::new();
        for buf in self.buffers.values_mut() {
            if buf.completed {
                continue;
            }
            let Some(name) = buf.name.clone().filter(|n| !n.is_empty()) else {
                tracing::debug!("dropping nameless tool-call buffer at finish");
                continue;
            };
            if buf.arguments.trim().is_empty() {
                buf.arguments = "{}".to_string();
            }
            match buf.force_complete() {
                Some(call) => {
                    buf.completed = true;
                    flushed.push(call);
                }
                None => {
                    return Err(DuplexError::MalformedToolCall {
                        name,
                        arguments: buf.arguments.clone(),
                    });
                }
            }
        }
        Ok(flushed)
    }

    /// Flush remaining buffers at end of stream.
    ///
    /// The sentinel marks end of turn, not end of generation correctness:
    /// buffers that still do not parse are dropped rather than failing
    /// the turn.
    pub fn drain(&mut self) -> Vec<CompletedToolCall> {
        let mut flushed = Vec::new();
        for buf in self.buffers.values_mut() {
            if buf.completed {
                continue;
            }
            if buf.arguments.trim().is_empty() {
                buf.arguments = "{}".to_string();
            }
            if let Some(call) = buf.force_complete() {
                buf.completed = true;
                flushed.push(call);
            } else {
                tracing::debug!(
                    arguments = %buf.arguments,
                    "dropping unparseable tool-call buffer at end of stream"
                );
            }
        }
        flushed
    }
}
