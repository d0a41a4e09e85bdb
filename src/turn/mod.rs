//! Turn orchestration: dispatch, fallback policy, and event routing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::DuplexError;
use crate::protocol::chat::{self, ChatEventParser};
use crate::protocol::continuation::ContinuationMarker;
use crate::protocol::http::{bearer_headers, build_client, sse_lines, status_to_error};
use crate::protocol::responses::{self, ResponsesEventParser};
use crate::protocol::{EventParser, WireApi, WireRequest};
use crate::stream::inline::InlineToolCallScanner;
use crate::stream::tool_calls::{CompletedToolCall, ToolCallReconstructor};
use crate::types::generation::GenerationOptions;
use crate::types::message::{DataContent, ModelMessage};
use crate::types::stream::StreamEvent;
use crate::util::estimate_prompt_tokens;

/// Upper bound on declared tools, checked before dispatch.
const MAX_DECLARED_TOOLS: usize = 128;

/// One response part emitted to the host, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Text { text: String },
    Thinking { text: String, id: Option<String> },
    ToolCall(CompletedToolCall),
    Data(DataContent),
}

/// The host-side consumer of emitted parts.
#[async_trait]
pub trait PartSink: Send {
    async fn emit(&mut self, part: ResponsePart);

    /// Hosts without a thinking part type have thinking silently dropped.
    fn supports_thinking(&self) -> bool {
        false
    }

    /// User-visible, dismissible notice (e.g. protocol fallback).
    async fn warn(&mut self, message: String) {
        let _ = message;
    }
}

/// Drives request/response exchanges for one configured model.
///
/// All per-turn state lives inside `run`; the runner itself carries only
/// the config, the HTTP client, and the once-per-runner fallback-warning
/// latch. Concurrent turns need their own runner instances.
pub struct TurnRunner {
    config: ModelConfig,
    client: reqwest::Client,
    fallback_warned: AtomicBool,
}

#[derive(Default)]
struct TurnState {
    tool_calls: ToolCallReconstructor,
    scanner: InlineToolCallScanner,
    text_emitted: bool,
    space_flushed: bool,
}

impl TurnRunner {
    pub fn new(config: ModelConfig) -> Result<Self, DuplexError> {
        let client = build_client(config.proxy.as_deref())?;
        Ok(Self {
            config,
            client,
            fallback_warned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Run one exchange, streaming parts into `sink`.
    pub async fn run(
        &self,
        messages: &[ModelMessage],
        options: &GenerationOptions,
        sink: &mut dyn PartSink,
        cancel: &CancellationToken,
    ) -> Result<(), DuplexError> {
        self.preflight(messages, options)?;

        let use_continuation =
            self.config.wire_api == WireApi::Responses && self.config.continuation.is_enabled();
        let mut api = self.config.wire_api;
        let request = match api {
            WireApi::Chat => chat::build_request(messages, options, &self.config),
            WireApi::Responses => {
                responses::build_request(messages, options, &self.config, use_continuation)
            }
        };

        debug!(
            model = %self.config.model_id,
            url = %request.url,
            continuation = use_continuation,
            "dispatching turn"
        );

        let sent_continuation = request.body.get("previous_response_id").is_some();
        let resp = self.send(&request).await?;
        let resp = if resp.status().is_success() {
            resp
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();

            if api == WireApi::Responses
                && sent_continuation
                && is_continuation_unsupported(status, &body)
            {
                warn!(
                    model = %self.config.model_id,
                    "server rejected continuation parameter; disabling stateful continuation"
                );
                self.config.continuation.disable();
                let retry = responses::build_request(messages, options, &self.config, false);
                self.send_expecting_success(&retry).await?
            } else if api == WireApi::Responses
                && self.config.fallback_to_chat
                && is_protocol_unsupported(status, &body)
            {
                warn!(
                    model = %self.config.model_id,
                    status = status.as_u16(),
                    "responses endpoint unavailable; falling back to chat completions"
                );
                if !self.fallback_warned.swap(true, Ordering::Relaxed) {
                    sink.warn(format!(
                        "{} does not support the Responses API; falling back to Chat Completions.",
                        self.config
                            .display_name
                            .as_deref()
                            .unwrap_or(&self.config.model_id)
                    ))
                    .await;
                }
                api = WireApi::Chat;
                let retry = chat::build_request(messages, options, &self.config);
                self.send_expecting_success(&retry).await?
            } else {
                return Err(status_to_error(status, &body));
            }
        };

        let mut parser: Box<dyn EventParser> = match api {
            WireApi::Chat => Box::new(ChatEventParser::new()),
            WireApi::Responses => Box::new(ResponsesEventParser::new()),
        };
        let mut state = TurnState::default();
        let mut lines = sse_lines(resp);

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Stop promptly; nothing is flushed on cancellation.
                    debug!(model = %self.config.model_id, "turn cancelled");
                    return Ok(());
                }
                line = lines.next() => line,
            };
            let line = match line {
                None => break,
                Some(Err(e)) => return Err(DuplexError::Network(e)),
                Some(Ok(line)) => line,
            };

            let mut event = parser.parse_line(&line);
            loop {
                if self.handle_event(event, &mut state, sink).await? {
                    return Ok(());
                }
                match parser.pop_pending() {
                    Some(next) => event = next,
                    None => break,
                }
            }
        }

        // Stream ended without a done sentinel; clean up the same way.
        self.finish_turn(&mut state, sink).await;
        Ok(())
    }

    fn preflight(
        &self,
        messages: &[ModelMessage],
        options: &GenerationOptions,
    ) -> Result<(), DuplexError> {
        let tool_count = options.tools.as_ref().map_or(0, Vec::len);
        if tool_count > MAX_DECLARED_TOOLS {
            return Err(DuplexError::InvalidArgument(format!(
                "Too many tool declarations: {tool_count} (limit {MAX_DECLARED_TOOLS})"
            )));
        }
        if let Some(window) = self.config.context_window {
            let estimated = estimate_prompt_tokens(messages, options);
            if estimated > window {
                return Err(DuplexError::InvalidArgument(format!(
                    "Estimated prompt size of {estimated} tokens exceeds the {window}-token input budget of {}",
                    self.config.model_id
                )));
            }
        }
        Ok(())
    }

    async fn send(&self, request: &WireRequest) -> Result<reqwest::Response, DuplexError> {
        let resp = self
            .client
            .post(&request.url)
            .headers(bearer_headers(&self.config.api_key))
            .json(&request.body)
            .send()
            .await?;
        Ok(resp)
    }

    /// Send a retry attempt; its failure is terminal.
    async fn send_expecting_success(
        &self,
        request: &WireRequest,
    ) -> Result<reqwest::Response, DuplexError> {
        let resp = self.send(request).await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(status_to_error(status, &body))
    }

    /// Route one neutral event. Returns true when the turn is complete.
    async fn handle_event(
        &self,
        event: StreamEvent,
        state: &mut TurnState,
        sink: &mut dyn PartSink,
    ) -> Result<bool, DuplexError> {
        match event {
            StreamEvent::Skip => {}
            StreamEvent::Text { content } => {
                let out = state.scanner.push(&content);
                if !out.text.is_empty() {
                    state.text_emitted = true;
                    sink.emit(ResponsePart::Text { text: out.text }).await;
                }
                for call in out.calls {
                    emit_tool_call(call, state, sink).await;
                }
            }
            StreamEvent::Thinking { text, id, .. } => {
                if sink.supports_thinking() {
                    sink.emit(ResponsePart::Thinking { text, id }).await;
                }
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                if let Some(call) = state.tool_calls.apply(index, id, name, arguments) {
                    emit_tool_call(call, state, sink).await;
                }
            }
            StreamEvent::Finish { reason } => {
                for call in state.tool_calls.finish(reason)? {
                    emit_tool_call(call, state, sink).await;
                }
            }
            StreamEvent::Continuation { response_id } => {
                let marker = ContinuationMarker::new(&self.config.model_id, &response_id);
                sink.emit(ResponsePart::Data(marker.to_data())).await;
                self.finish_turn(state, sink).await;
            }
            StreamEvent::Done => {
                self.finish_turn(state, sink).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Silent end-of-turn flush of both reconstruction channels.
    async fn finish_turn(&self, state: &mut TurnState, sink: &mut dyn PartSink) {
        let out = state.scanner.finish();
        if !out.text.is_empty() {
            state.text_emitted = true;
            sink.emit(ResponsePart::Text { text: out.text }).await;
        }
        for call in out.calls {
            emit_tool_call(call, state, sink).await;
        }
        for call in state.tool_calls.drain() {
            emit_tool_call(call, state, sink).await;
        }
    }
}

/// Emit a completed tool call, preceded the first time by a single space
/// when visible text was already streamed, so UI-side link/markdown
/// buffering is flushed before the call renders.
async fn emit_tool_call(call: CompletedToolCall, state: &mut TurnState, sink: &mut dyn PartSink) {
    if state.text_emitted && !state.space_flushed {
        state.space_flushed = true;
        sink.emit(ResponsePart::Text { text: " ".into() }).await;
    }
    sink.emit(ResponsePart::ToolCall(call)).await;
}

/// Does this failure mean the endpoint does not speak the protocol at
/// all?
fn is_protocol_unsupported(status: reqwest::StatusCode, body: &str) -> bool {
    if matches!(status.as_u16(), 404 | 405 | 501) {
        return true;
    }
    let body = body.to_ascii_lowercase();
    ["not found", "not supported", "not implemented", "unknown endpoint"]
        .iter()
        .any(|marker| body.contains(marker))
}

/// Does this failure specifically reject the continuation parameter?
fn is_continuation_unsupported(status: reqwest::StatusCode, body: &str) -> bool {
    status.is_client_error() && body.contains("previous_response_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn protocol_unsupported_by_status() {
        for code in [404u16, 405, 501] {
            assert!(is_protocol_unsupported(
                StatusCode::from_u16(code).unwrap(),
                ""
            ));
        }
        assert!(!is_protocol_unsupported(StatusCode::BAD_REQUEST, "oops"));
    }

    #[test]
    fn protocol_unsupported_by_body_marker() {
        assert!(is_protocol_unsupported(
            StatusCode::BAD_REQUEST,
            "{\"error\":\"route Not Found\"}"
        ));
        assert!(is_protocol_unsupported(
            StatusCode::BAD_REQUEST,
            "stream mode not implemented here"
        ));
    }

    #[test]
    fn continuation_rejection_requires_client_error_and_parameter_name() {
        assert!(is_continuation_unsupported(
            StatusCode::BAD_REQUEST,
            "unknown parameter: previous_response_id"
        ));
        assert!(!is_continuation_unsupported(
            StatusCode::INTERNAL_SERVER_ERROR,
            "previous_response_id"
        ));
        assert!(!is_continuation_unsupported(
            StatusCode::BAD_REQUEST,
            "bad temperature"
        ));
    }
}
