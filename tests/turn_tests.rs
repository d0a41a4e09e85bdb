//! End-to-end turn tests against a mock endpoint.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use duplex::config::{ContinuationSupport, ModelConfig};
use duplex::error::DuplexError;
use duplex::protocol::continuation::ContinuationMarker;
use duplex::protocol::WireApi;
use duplex::turn::{PartSink, ResponsePart, TurnRunner};
use duplex::types::{GenerationOptions, ModelMessage, ToolDefinition};

#[derive(Default, Debug)]
struct Collector {
    parts: Vec<ResponsePart>,
    warnings: Vec<String>,
    thinking: bool,
}

#[async_trait]
impl PartSink for Collector {
    async fn emit(&mut self, part: ResponsePart) {
        self.parts.push(part);
    }

    fn supports_thinking(&self) -> bool {
        self.thinking
    }

    async fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }
}

impl Collector {
    fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ResponsePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn tool_calls(&self) -> Vec<&duplex::stream::CompletedToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ResponsePart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    fn markers(&self) -> Vec<ContinuationMarker> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ResponsePart::Data(data) => ContinuationMarker::from_part(
                    &duplex::types::ContentPart::Data(data.clone()),
                ),
                _ => None,
            })
            .collect()
    }
}

fn config(server: &MockServer, api: WireApi) -> ModelConfig {
    ModelConfig::builder()
        .model_id("test-model")
        .base_url(server.uri())
        .api_key("test-key")
        .wire_api(api)
        .build()
}

fn sse(lines: &[&str]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push_str("\n\n");
    }
    body
}

fn sse_response(lines: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse(lines), "text/event-stream")
}

async fn run_turn(
    runner: &TurnRunner,
    messages: &[ModelMessage],
    options: &GenerationOptions,
) -> Result<Collector, DuplexError> {
    let mut sink = Collector::default();
    let cancel = CancellationToken::new();
    runner.run(messages, options, &mut sink, &cancel).await?;
    Ok(sink)
}

#[tokio::test]
async fn chat_turn_streams_text_and_tool_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"world"}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"path\""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"/tmp\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();
    let sink = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    // One whitespace part is flushed between visible text and the first
    // tool call.
    assert_eq!(sink.text(), "Hello world ");
    let calls = sink.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].name, "read_file");
    assert_eq!(calls[0].arguments, json!({"path": "/tmp"}));
}

#[tokio::test]
async fn responses_turn_streams_items_and_continuation_marker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(&[
            "event: response.output_item.added\ndata: {\"type\":\"response.output_item.added\",\"item\":{\"type\":\"message\",\"id\":\"msg_1\",\"content\":[]}}",
            "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"item_id\":\"msg_1\",\"delta\":\"Hi \"}",
            r#"data: {"type":"response.output_text.delta","item_id":"msg_1","delta":"there"}"#,
            r#"data: {"type":"response.output_item.added","item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"bash","arguments":""}}"#,
            r#"data: {"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"cmd\":"}"#,
            r#"data: {"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"\"ls\"}"}"#,
            r#"data: {"type":"response.completed","response":{"id":"resp_7"}}"#,
            "data: [DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Responses)).unwrap();
    let sink = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(sink.text(), "Hi there ");
    let calls = sink.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_9");
    assert_eq!(calls[0].name, "bash");
    assert_eq!(calls[0].arguments, json!({"cmd": "ls"}));

    let markers = sink.markers();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].model_id, "test-model");
    assert_eq!(markers[0].response_id, "resp_7");
}

#[tokio::test]
async fn responses_404_falls_back_to_chat_with_one_warning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"content":"fallback ok"}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Responses)).unwrap();
    let sink = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(sink.text(), "fallback ok");
    assert_eq!(sink.warnings.len(), 1);

    // Both attempts carried an equivalent conversation.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(first["input"][0]["content"][0]["text"], "hi");
    assert_eq!(second["messages"][0]["content"], "hi");
    assert_eq!(second["stream"], true);
}

#[tokio::test]
async fn fallback_disabled_surfaces_error_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such route"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server, WireApi::Responses);
    config.fallback_to_chat = false;
    let runner = TurnRunner::new(config).unwrap();
    let err = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap_err();

    match err {
        DuplexError::Api { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("no such route"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rejected_continuation_parameter_triggers_stateless_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_string_contains("previous_response_id"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":"Unknown parameter: 'previous_response_id'"}"#),
        )
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse_response(&[
            r#"data: {"type":"response.output_text.delta","delta":"resumed statelessly"}"#,
            r#"data: {"type":"response.completed","response":{"id":"resp_8"}}"#,
            "data: [DONE]",
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let mut carrier = ModelMessage::assistant("earlier");
    carrier
        .content
        .push(ContinuationMarker::new("test-model", "resp_7").to_part());
    let messages = vec![
        ModelMessage::user("first"),
        carrier,
        ModelMessage::user("latest"),
    ];

    let mut config = config(&server, WireApi::Responses);
    config.continuation = ContinuationSupport::new(true);
    let continuation = config.continuation.clone();
    let runner = TurnRunner::new(config).unwrap();
    let sink = run_turn(&runner, &messages, &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(sink.text(), "resumed statelessly");
    // The downgrade is permanent for this model.
    assert!(!continuation.is_enabled());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    // First attempt: truncated history plus the continuation parameter.
    assert_eq!(first["previous_response_id"], "resp_7");
    assert_eq!(first["input"].as_array().unwrap().len(), 1);
    // Retry: full history, no continuation parameter.
    assert!(second.get("previous_response_id").is_none());
    assert_eq!(second["input"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_arguments_at_finish_fail_the_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"f","arguments":"{\"broken"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]))
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();
    let err = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DuplexError::MalformedToolCall { .. }));
}

#[tokio::test]
async fn malformed_arguments_at_done_are_dropped_silently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"f","arguments":"{\"broken"}}]}}]}"#,
            "data: [DONE]",
        ]))
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();
    let sink = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();
    assert!(sink.tool_calls().is_empty());
}

#[tokio::test]
async fn inline_control_tokens_become_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"content":"before <|tool_call_beg"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"in|>foo<|tool_call_argument_begin|>{\"x\":1}<|tool_call_end|> after"}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]))
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();
    let sink = run_turn(&runner, &[ModelMessage::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    // Control tokens are stripped from the visible stream; the single
    // trailing space is the flush before the tool-call part.
    assert_eq!(sink.text(), "before  after ");
    let calls = sink.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "foo");
    assert_eq!(calls[0].arguments, json!({"x": 1}));
}

#[tokio::test]
async fn thinking_is_dropped_unless_sink_supports_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"reasoning_content":"pondering"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"answer"}}]}"#,
            "data: [DONE]",
        ]))
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();

    let mut plain = Collector::default();
    let cancel = CancellationToken::new();
    runner
        .run(
            &[ModelMessage::user("hi")],
            &GenerationOptions::default(),
            &mut plain,
            &cancel,
        )
        .await
        .unwrap();
    assert!(!plain
        .parts
        .iter()
        .any(|p| matches!(p, ResponsePart::Thinking { .. })));

    let mut thinking = Collector {
        thinking: true,
        ..Default::default()
    };
    runner
        .run(
            &[ModelMessage::user("hi")],
            &GenerationOptions::default(),
            &mut thinking,
            &cancel,
        )
        .await
        .unwrap();
    assert!(thinking
        .parts
        .iter()
        .any(|p| matches!(p, ResponsePart::Thinking { text, .. } if text == "pondering")));
}

#[tokio::test]
async fn cancellation_stops_without_emitting_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            r#"data: {"choices":[{"delta":{"content":"should not arrive"}}]}"#,
            "data: [DONE]",
        ]))
        .mount(&server)
        .await;

    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();
    let mut sink = Collector::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    runner
        .run(
            &[ModelMessage::user("hi")],
            &GenerationOptions::default(),
            &mut sink,
            &cancel,
        )
        .await
        .unwrap();
    assert!(sink.parts.is_empty());
}

#[tokio::test]
async fn oversubscription_fails_before_any_network_call() {
    let server = MockServer::start().await;
    // No mocks mounted: a dispatched request would 404 and fail
    // differently.
    let runner = TurnRunner::new(config(&server, WireApi::Chat)).unwrap();

    let tools: Vec<ToolDefinition> = (0..200)
        .map(|i| ToolDefinition {
            name: format!("tool_{i}"),
            description: String::new(),
            parameters: json!({"type": "object"}),
        })
        .collect();
    let err = run_turn(
        &runner,
        &[ModelMessage::user("hi")],
        &GenerationOptions {
            tools: Some(tools),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DuplexError::InvalidArgument(_)));

    let mut small_window = config(&server, WireApi::Chat);
    small_window.context_window = Some(10);
    let runner = TurnRunner::new(small_window).unwrap();
    let err = run_turn(
        &runner,
        &[ModelMessage::user("x".repeat(1000))],
        &GenerationOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DuplexError::InvalidArgument(_)));

    assert!(server.received_requests().await.unwrap().is_empty());
}
