//! Chat Completions protocol: request builder and stream parser.

use std::collections::VecDeque;

use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::types::generation::{GenerationOptions, ToolChoice};
use crate::types::message::{ContentPart, ModelMessage, Role};
use crate::types::stream::{FinishReason, StreamEvent};

use super::{endpoint_url, sse_data, EventParser, WireApi, WireRequest, SSE_DONE};

/// Build a Chat Completions request for one turn.
pub fn build_request(
    messages: &[ModelMessage],
    options: &GenerationOptions,
    config: &ModelConfig,
) -> WireRequest {
    let wire_messages = messages
        .iter()
        .flat_map(|m| message_to_wire(m, config))
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": config.model_id,
        "messages": wire_messages,
        "stream": true,
    });

    let obj = body.as_object_mut().unwrap();

    if let Some(max) = options.max_tokens.or(config.max_output_tokens) {
        obj.insert("max_tokens".into(), max.into());
    }
    if let Some(temp) = options.temperature {
        obj.insert("temperature".into(), temp.into());
    }
    if let Some(top_p) = options.top_p {
        obj.insert("top_p".into(), top_p.into());
    }
    if let Some(ref stops) = options.stop_sequences {
        obj.insert("stop".into(), json!(stops));
    }
    if let Some(pp) = options.presence_penalty {
        obj.insert("presence_penalty".into(), pp.into());
    }
    if let Some(fp) = options.frequency_penalty {
        obj.insert("frequency_penalty".into(), fp.into());
    }
    if let Some(logprobs) = options.logprobs {
        obj.insert("logprobs".into(), logprobs.into());
        if let Some(top) = options.top_logprobs {
            obj.insert("top_logprobs".into(), top.into());
        }
    }

    if let Some(ref tools) = options.tools {
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), tool_defs.into());

            if let Some(choice) = options.tool_choice.as_ref().or(config.tool_choice.as_ref()) {
                obj.insert("tool_choice".into(), tool_choice_to_wire(choice));
            }
        }
    }

    WireRequest {
        url: endpoint_url(&config.base_url, WireApi::Chat),
        body,
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

fn message_to_wire(msg: &ModelMessage, config: &ModelConfig) -> Vec<Value> {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if msg.role == Role::Tool {
        // One flat tool record per result part; images cannot ride along
        // on this protocol's tool messages.
        return msg
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult(tr) => Some(json!({
                    "role": "tool",
                    "tool_call_id": tr.tool_call_id,
                    "content": tr.text(),
                })),
                _ => None,
            })
            .collect();
    }

    let tool_calls: Vec<Value> = msg
        .tool_calls()
        .iter()
        .map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": tc.input.to_string(),
                }
            })
        })
        .collect();

    if !tool_calls.is_empty() {
        let text = msg.text();
        return vec![json!({
            "role": role,
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            "tool_calls": tool_calls,
        })];
    }

    let mut parts = Vec::new();
    let mut has_image = false;
    for part in &msg.content {
        match part {
            ContentPart::Text { text } => parts.push(json!({ "type": "text", "text": text })),
            ContentPart::Data(data)
                if data.is_image() && config.supports_images && msg.role != Role::Assistant =>
            {
                has_image = true;
                parts.push(json!({
                    "type": "image_url",
                    "image_url": { "url": data.to_data_url() }
                }));
            }
            // Non-image data parts (continuation markers) never go on the
            // wire; unsupported images are dropped.
            _ => {}
        }
    }

    if !has_image {
        return vec![json!({ "role": role, "content": msg.text() })];
    }
    vec![json!({ "role": role, "content": parts })]
}

/// Parser for Chat Completions SSE frames.
#[derive(Debug, Default)]
pub struct ChatEventParser {
    pending: VecDeque<StreamEvent>,
}

impl ChatEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_data(&mut self, data: &str) {
        if data == SSE_DONE {
            self.pending.push_back(StreamEvent::Done);
            return;
        }
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data = %data, "skipping unparseable chat SSE line");
            return;
        };
        let Some(choice) = payload
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
        else {
            return;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(thinking) = reasoning_text(delta) {
                if !thinking.is_empty() {
                    self.pending.push_back(StreamEvent::Thinking {
                        text: thinking,
                        id: None,
                        metadata: None,
                    });
                }
            }
            if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                if !content.is_empty() {
                    self.pending.push_back(StreamEvent::Text {
                        content: content.to_string(),
                    });
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for (position, entry) in tool_calls.iter().enumerate() {
                    let index = entry
                        .get("index")
                        .and_then(|v| v.as_u64())
                        .map(|v| v as usize)
                        .unwrap_or(position);
                    let function = entry.get("function");
                    self.pending.push_back(StreamEvent::ToolCallDelta {
                        index,
                        id: entry
                            .get("id")
                            .and_then(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                        arguments: function
                            .and_then(|f| f.get("arguments"))
                            .and_then(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                    });
                }
            }
        }

        if let Some(reason) = choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .and_then(FinishReason::parse)
        {
            self.pending.push_back(StreamEvent::Finish { reason });
        }
    }
}

/// Extract reasoning text from a delta; servers send it either as a plain
/// string or as an object carrying a `text` field.
fn reasoning_text(delta: &Value) -> Option<String> {
    let value = delta.get("reasoning_content")?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("text")
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

impl EventParser for ChatEventParser {
    fn parse_line(&mut self, line: &str) -> StreamEvent {
        if let Some(data) = sse_data(line) {
            self.parse_data(data);
        }
        self.pending.pop_front().unwrap_or(StreamEvent::Skip)
    }

    fn pop_pending(&mut self) -> Option<StreamEvent> {
        self.pending.pop_front()
    }
}
