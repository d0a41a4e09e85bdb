//! Responses (ordered-items) protocol: request builder and stream parser.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::stream::tool_calls::generated_call_id;
use crate::types::generation::{GenerationOptions, ResponsesOptions, ToolChoice};
use crate::types::message::{ContentPart, ModelMessage, Role};
use crate::types::stream::StreamEvent;

use super::continuation::find_resume_point;
use super::{endpoint_url, sse_data, EventParser, WireApi, WireRequest, SSE_DONE};

/// Build a Responses request for one turn.
///
/// When `use_continuation` is set and the conversation carries a marker
/// for this model, history at or before the marker is elided and the
/// embedded id is sent as `previous_response_id`.
pub fn build_request(
    messages: &[ModelMessage],
    options: &GenerationOptions,
    config: &ModelConfig,
    use_continuation: bool,
) -> WireRequest {
    let resumed = if use_continuation {
        find_resume_point(messages, &config.model_id)
    } else {
        None
    };
    let (messages, previous_response_id) = match &resumed {
        Some((idx, id)) => (&messages[idx + 1..], Some(id.as_str())),
        None => (messages, None),
    };

    let merged = merged_options(options, config);
    let input = build_input_items(messages, &merged, config);

    let mut body = json!({
        "model": config.model_id,
        "input": input,
        "stream": true,
    });

    let obj = body.as_object_mut().unwrap();

    if let Some(id) = previous_response_id {
        obj.insert("previous_response_id".into(), id.into());
    }
    if let Some(max) = options.max_tokens.or(config.max_output_tokens) {
        obj.insert("max_output_tokens".into(), max.into());
    }
    if let Some(temp) = options.temperature {
        obj.insert("temperature".into(), temp.into());
    }
    if let Some(top_p) = options.top_p {
        obj.insert("top_p".into(), top_p.into());
    }

    if merged.reasoning_effort.is_some() || merged.reasoning_summary.is_some() {
        let mut reasoning = serde_json::Map::new();
        if let Some(effort) = merged.reasoning_effort {
            reasoning.insert("effort".into(), effort.to_string().into());
        }
        if let Some(summary) = merged.reasoning_summary {
            reasoning.insert("summary".into(), summary.to_string().into());
        }
        obj.insert("reasoning".into(), Value::Object(reasoning));
    }
    if let Some(truncation) = merged.truncation {
        obj.insert("truncation".into(), truncation.to_string().into());
    }
    if let Some(verbosity) = merged.text_verbosity {
        obj.insert("text".into(), json!({ "verbosity": verbosity.to_string() }));
    }
    if let Some(parallel) = merged.parallel_tool_calls {
        obj.insert("parallel_tool_calls".into(), parallel.into());
    }
    if options.logprobs == Some(true) {
        obj.insert(
            "include".into(),
            json!(["message.output_text.logprobs"]),
        );
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
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                        "strict": false,
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
        url: endpoint_url(&config.base_url, WireApi::Responses),
        body,
    }
}

fn merged_options(options: &GenerationOptions, config: &ModelConfig) -> ResponsesOptions {
    match &options.responses {
        Some(overrides) => overrides.merged_over(&config.responses),
        None => config.responses.clone(),
    }
}

fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({ "type": "function", "name": name }),
    }
}

fn build_input_items(
    messages: &[ModelMessage],
    merged: &ResponsesOptions,
    config: &ModelConfig,
) -> Vec<Value> {
    let mut input = Vec::new();

    if let Some(instructions) = merged
        .instructions
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        input.push(message_item(Role::System, instructions, config));
    }

    for msg in messages {
        match msg.role {
            Role::System | Role::User | Role::Assistant => {
                push_conversation_items(&mut input, msg, config);
            }
            Role::Tool => {
                push_tool_result_items(&mut input, msg);
            }
        }
    }

    input
}

/// A plain message item; system text is downgraded to a visibly-tagged
/// user message when the model rejects the system role.
fn message_item(role: Role, text: &str, config: &ModelConfig) -> Value {
    let (role, text) = wire_role(role, text, config);
    let tag = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    json!({
        "role": role,
        "content": [{ "type": tag, "text": text }],
    })
}

fn wire_role(role: Role, text: &str, config: &ModelConfig) -> (&'static str, String) {
    match role {
        Role::System if !config.supports_system_role => ("user", format!("[System]: {text}")),
        Role::System => ("system", text.to_string()),
        Role::User => ("user", text.to_string()),
        Role::Assistant => ("assistant", text.to_string()),
        Role::Tool => ("user", text.to_string()),
    }
}

fn push_conversation_items(input: &mut Vec<Value>, msg: &ModelMessage, config: &ModelConfig) {
    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    let text = msg.text();
    let (role, text) = wire_role(msg.role, &text, config);
    let tag = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    if !text.is_empty() {
        content.push(json!({ "type": tag, "text": text }));
    }

    for part in &msg.content {
        match part {
            ContentPart::Data(data)
                if data.is_image() && config.supports_images && msg.role != Role::Assistant =>
            {
                content.push(json!({
                    "type": "input_image",
                    "image_url": data.to_data_url(),
                }));
            }
            ContentPart::ToolCall(tc) => tool_calls.push(tc),
            _ => {}
        }
    }

    if !content.is_empty() {
        input.push(json!({ "role": role, "content": content }));
    }

    for tc in tool_calls {
        let call_id = if tc.id.is_empty() {
            generated_call_id()
        } else {
            tc.id.clone()
        };
        let arguments = serde_json::to_string(&tc.input).unwrap_or_else(|_| "{}".to_string());
        input.push(json!({
            "type": "function_call",
            "call_id": call_id,
            "name": tc.name,
            "arguments": arguments,
        }));
    }
}

fn push_tool_result_items(input: &mut Vec<Value>, msg: &ModelMessage) {
    for part in &msg.content {
        let ContentPart::ToolResult(tr) = part else {
            continue;
        };
        input.push(json!({
            "type": "function_call_output",
            "call_id": tr.tool_call_id,
            "output": tr.text(),
        }));
        // The output item type cannot carry images; each one rides in a
        // trailing user message instead.
        for image in tr.images() {
            input.push(json!({
                "role": "user",
                "content": [
                    {
                        "type": "input_text",
                        "text": format!("Image output of tool call {}:", tr.tool_call_id),
                    },
                    { "type": "input_image", "image_url": image.to_data_url() },
                ],
            }));
        }
    }
}

/// Default SSE event name; a marker carrying it defers to the payload's
/// own `type` field.
const DEFAULT_EVENT: &str = "message";

/// Parser for Responses-protocol SSE frames.
///
/// Upstream addresses in-flight items by string ids that repeat across
/// frames non-deterministically; the parser maps each id to a
/// stream-local sequential index on first sight so downstream code can
/// key on integers.
#[derive(Debug, Default)]
pub struct ResponsesEventParser {
    pending: VecDeque<StreamEvent>,
    event_marker: Option<String>,
    call_index: HashMap<String, usize>,
    next_index: usize,
    text_delta_keys: HashSet<String>,
    emitted_text_keys: HashSet<String>,
    thinking_delta_keys: HashSet<String>,
    args_delta_keys: HashSet<String>,
    any_text: bool,
}

impl ResponsesEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_for(&mut self, key: &str) -> usize {
        if let Some(&idx) = self.call_index.get(key) {
            return idx;
        }
        let idx = self.next_index;
        self.next_index += 1;
        self.call_index.insert(key.to_string(), idx);
        idx
    }

    fn resolve_type<'a>(&self, payload: &'a Value, marker: Option<&'a str>) -> String {
        match marker {
            Some(m) if m != DEFAULT_EVENT => m.to_string(),
            _ => payload
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn push_text(&mut self, content: String) {
        if content.is_empty() {
            return;
        }
        self.any_text = true;
        self.pending.push_back(StreamEvent::Text { content });
    }

    fn parse_data(&mut self, data: &str) {
        if data == SSE_DONE {
            self.pending.push_back(StreamEvent::Done);
            return;
        }
        let marker = self.event_marker.take();
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            tracing::debug!(data = %data, "skipping unparseable responses SSE line");
            return;
        };
        let event_type = self.resolve_type(&payload, marker.as_deref());

        match event_type.as_str() {
            "response.output_text.delta" => {
                let key = item_key(&payload);
                if let Some(delta) = payload.get("delta").and_then(|d| d.as_str()) {
                    self.text_delta_keys.insert(key);
                    self.push_text(delta.to_string());
                }
            }
            "response.output_text.done" => {
                let key = item_key(&payload);
                if !self.text_delta_keys.contains(&key) && self.emitted_text_keys.insert(key) {
                    if let Some(text) = payload.get("text").and_then(|t| t.as_str()) {
                        self.push_text(text.to_string());
                    }
                }
            }
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                let key = item_key(&payload);
                if let Some(delta) = payload.get("delta").and_then(|d| d.as_str()) {
                    if !delta.is_empty() {
                        self.thinking_delta_keys.insert(key.clone());
                        self.pending.push_back(StreamEvent::Thinking {
                            text: delta.to_string(),
                            id: payload
                                .get("item_id")
                                .and_then(|v| v.as_str())
                                .map(String::from),
                            metadata: None,
                        });
                    }
                }
            }
            "response.reasoning_text.done" | "response.reasoning_summary_text.done" => {
                let key = item_key(&payload);
                if !self.thinking_delta_keys.contains(&key) {
                    if let Some(text) = payload.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            self.pending.push_back(StreamEvent::Thinking {
                                text: text.to_string(),
                                id: payload
                                    .get("item_id")
                                    .and_then(|v| v.as_str())
                                    .map(String::from),
                                metadata: None,
                            });
                        }
                    }
                }
            }
            "response.function_call.delta" | "response.function_call_arguments.delta" => {
                let key = item_key(&payload);
                let index = self.index_for(&key);
                if let Some(delta) = payload.get("delta").and_then(|d| d.as_str()) {
                    self.args_delta_keys.insert(key);
                    self.pending.push_back(StreamEvent::ToolCallDelta {
                        index,
                        id: None,
                        name: payload
                            .get("name")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        arguments: Some(delta.to_string()),
                    });
                }
            }
            "response.function_call.done" | "response.function_call_arguments.done" => {
                let key = item_key(&payload);
                let index = self.index_for(&key);
                // A snapshot of the full arguments only stands in when no
                // fragments streamed for this item; otherwise appending it
                // would corrupt the buffer.
                let arguments = if self.args_delta_keys.contains(&key) {
                    None
                } else {
                    payload
                        .get("arguments")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                };
                self.pending.push_back(StreamEvent::ToolCallDelta {
                    index,
                    id: payload
                        .get("call_id")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    name: payload
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    arguments,
                });
            }
            "response.output_item.added" | "response.output_item.done" => {
                if let Some(item) = payload.get("item") {
                    self.parse_output_item(item);
                }
            }
            "response.completed" => {
                let response = payload.get("response").unwrap_or(&Value::Null);
                // Less-conformant servers skip the per-item events and only
                // attach a final non-streaming output array here.
                if let Some(output) = response.get("output").and_then(|v| v.as_array()) {
                    for item in output {
                        self.parse_output_item(item);
                    }
                }
                match response.get("id").and_then(|v| v.as_str()) {
                    Some(id) if !id.is_empty() => {
                        self.pending.push_back(StreamEvent::Continuation {
                            response_id: id.to_string(),
                        });
                    }
                    _ => self.pending.push_back(StreamEvent::Done),
                }
            }
            "response.done" => {
                self.pending.push_back(StreamEvent::Done);
            }
            _ => {}
        }
    }

    fn parse_output_item(&mut self, item: &Value) {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("function_call") => {
                let call_id = item.get("call_id").and_then(|v| v.as_str());
                let item_id = item.get("id").and_then(|v| v.as_str());
                let key = call_id.or(item_id).unwrap_or("function_call").to_string();
                let index = self.index_for(&key);
                // Argument deltas address the same call by item id, so
                // both ids must resolve to one index.
                if let Some(alias) = item_id.filter(|&a| a != key) {
                    self.call_index.insert(alias.to_string(), index);
                }
                let args_streamed = self.args_delta_keys.contains(&key)
                    || item_id.is_some_and(|a| self.args_delta_keys.contains(a));
                let arguments = if args_streamed {
                    None
                } else {
                    item.get("arguments")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.trim().is_empty())
                        .map(String::from)
                };
                self.pending.push_back(StreamEvent::ToolCallDelta {
                    index,
                    id: item
                        .get("call_id")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    name: item.get("name").and_then(|v| v.as_str()).map(String::from),
                    arguments,
                });
            }
            Some("message") => {
                let key = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("message")
                    .to_string();
                if !self.text_delta_keys.is_empty() || !self.emitted_text_keys.insert(key) {
                    return;
                }
                let mut text = String::new();
                if let Some(content) = item.get("content").and_then(|v| v.as_array()) {
                    for block in content {
                        if block.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                            if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                                text.push_str(t);
                            }
                        }
                    }
                }
                self.push_text(text);
            }
            Some("output_text") => {
                // Flat text item in a trailing output array.
                if !self.any_text {
                    if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                        self.push_text(t.to_string());
                    }
                }
            }
            _ => {}
        }
    }
}

fn item_key(payload: &Value) -> String {
    payload
        .get("item_id")
        .and_then(|v| v.as_str())
        .or_else(|| payload.get("call_id").and_then(|v| v.as_str()))
        .unwrap_or("item")
        .to_string()
}

impl EventParser for ResponsesEventParser {
    fn parse_line(&mut self, line: &str) -> StreamEvent {
        if let Some(data) = sse_data(line) {
            self.parse_data(data);
        } else if let Some(marker) = line.strip_prefix("event:") {
            let marker = marker.trim();
            if !marker.is_empty() {
                self.event_marker = Some(marker.to_string());
            }
            return StreamEvent::Skip;
        }
        self.pending.pop_front().unwrap_or(StreamEvent::Skip)
    }

    fn pop_pending(&mut self) -> Option<StreamEvent> {
        self.pending.pop_front()
    }
}
