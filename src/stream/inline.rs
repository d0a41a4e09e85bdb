//! Tool calls smuggled through text as control tokens.
//!
//! Some backends never use the structured tool-call channel and instead
//! interleave calls with normal output text:
//!
//! ```text
//! <|tool_call_begin|>name:0<|tool_call_argument_begin|>{"x":1}<|tool_call_end|>
//! ```
//!
//! The scanner strips the grammar from the visible text stream and emits
//! the same completed-call records as the structured channel. The two
//! channels share no buffers; a backend uses exactly one of them within
//! a turn.

use std::collections::HashSet;

use serde_json::Value;

use super::tool_calls::{generated_call_id, CompletedToolCall};

const CALL_BEGIN: &str = "<|tool_call_begin|>";
const ARG_BEGIN: &str = "<|tool_call_argument_begin|>";
const CALL_END: &str = "<|tool_call_end|>";
const SECTION_BEGIN: &str = "<|tool_calls_section_begin|>";
const SECTION_END: &str = "<|tool_calls_section_end|>";

const CONTROL_TOKENS: [&str; 5] = [CALL_BEGIN, ARG_BEGIN, CALL_END, SECTION_BEGIN, SECTION_END];

/// Visible text and completed calls produced by one scanner step.
#[derive(Debug, Default, PartialEq)]
pub struct ScanOutput {
    pub text: String,
    pub calls: Vec<CompletedToolCall>,
}

#[derive(Debug)]
struct ActiveCall {
    name: String,
    index: Option<u64>,
    arguments: String,
    emitted: bool,
}

/// Single-pass scanner over concatenated text deltas.
///
/// State survives across deltas within one turn; a fresh scanner is
/// constructed per turn.
#[derive(Debug, Default)]
pub struct InlineToolCallScanner {
    buffer: String,
    active: Option<ActiveCall>,
    emitted: HashSet<String>,
}

impl InlineToolCallScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one text delta.
    pub fn push(&mut self, chunk: &str) -> ScanOutput {
        self.buffer.push_str(chunk);
        let mut out = ScanOutput::default();

        loop {
            if self.active.is_some() {
                if !self.scan_arguments(&mut out) {
                    break;
                }
                continue;
            }
            if !self.scan_text(&mut out) {
                break;
            }
        }

        out
    }

    /// End of turn: forward any held-back text, flush an open call only
    /// if its buffer already parses, and reset all state.
    pub fn finish(&mut self) -> ScanOutput {
        let mut out = ScanOutput::default();
        if let Some(active) = self.active.take() {
            if !active.emitted {
                if let Ok(parsed) = serde_json::from_str::<Value>(active.arguments.trim()) {
                    self.emit(active.name, active.index, parsed, &mut out);
                } else {
                    tracing::debug!(
                        name = %active.name,
                        "discarding inline tool call with incomplete arguments at end of turn"
                    );
                }
            }
        } else {
            out.text.push_str(&self.buffer);
        }
        self.buffer.clear();
        self.emitted.clear();
        out
    }

    /// Outside a call: forward text, strip control tokens, open calls.
    /// Returns false when more input is needed.
    fn scan_text(&mut self, out: &mut ScanOutput) -> bool {
        match first_control_token(&self.buffer) {
            Some((pos, CALL_BEGIN)) => {
                out.text.push_str(&self.buffer[..pos]);
                self.buffer.drain(..pos);
                self.open_call(out)
            }
            Some((pos, token)) => {
                // Stray markers outside a call are stripped silently.
                out.text.push_str(&self.buffer[..pos]);
                self.buffer.drain(..pos + token.len());
                true
            }
            None => {
                let keep = holdback_len(&self.buffer);
                let take = self.buffer.len() - keep;
                out.text.push_str(&self.buffer[..take]);
                self.buffer.drain(..take);
                false
            }
        }
    }

    /// Buffer starts with `CALL_BEGIN`; parse the `name[:index]` header.
    /// Returns false when the header terminator has not arrived yet.
    fn open_call(&mut self, out: &mut ScanOutput) -> bool {
        let header_region = &self.buffer[CALL_BEGIN.len()..];
        let arg_at = header_region.find(ARG_BEGIN);
        let end_at = header_region.find(CALL_END);

        match (arg_at, end_at) {
            (Some(a), e) if e.map_or(true, |e| a < e) => {
                let (name, index) = parse_header(&header_region[..a]);
                self.buffer.drain(..CALL_BEGIN.len() + a + ARG_BEGIN.len());
                self.active = Some(ActiveCall {
                    name,
                    index,
                    arguments: String::new(),
                    emitted: false,
                });
                true
            }
            (_, Some(e)) => {
                // Header runs straight into the end token: a call with no
                // arguments.
                let (name, index) = parse_header(&header_region[..e]);
                self.buffer.drain(..CALL_BEGIN.len() + e + CALL_END.len());
                self.emit(name, index, Value::Object(Default::default()), out);
                true
            }
            // Only `(None, None)` reaches here at runtime: `(Some(_), None)`
            // always satisfies the first arm's guard (`e` is `None`).
            _ => false,
        }
    }

    /// Inside an argument buffer: accumulate until `CALL_END`, attempting
    /// an eager parse after every chunk. Returns false when more input is
    /// needed.
    fn scan_arguments(&mut self, out: &mut ScanOutput) -> bool {
        let active = self.active.as_mut().expect("argument scan without active call");

        if let Some(pos) = self.buffer.find(CALL_END) {
            active.arguments.push_str(&self.buffer[..pos]);
            self.buffer.drain(..pos + CALL_END.len());
            let active = self.active.take().expect("active call");
            if !active.emitted {
                match serde_json::from_str::<Value>(active.arguments.trim()) {
                    Ok(parsed) => self.emit(active.name, active.index, parsed, out),
                    Err(_) if active.arguments.trim().is_empty() => {
                        self.emit(
                            active.name,
                            active.index,
                            Value::Object(Default::default()),
                            out,
                        );
                    }
                    Err(_) => {
                        tracing::debug!(
                            name = %active.name,
                            "discarding inline tool call with malformed arguments"
                        );
                    }
                }
            }
            return true;
        }

        let keep = holdback_len(&self.buffer);
        let take = self.buffer.len() - keep;
        active.arguments.push_str(&self.buffer[..take]);
        self.buffer.drain(..take);

        if !active.emitted {
            if let Ok(parsed) = serde_json::from_str::<Value>(active.arguments.trim()) {
                if parsed.is_object() {
                    active.emitted = true;
                    let name = active.name.clone();
                    let index = active.index;
                    self.emit(name, index, parsed, out);
                }
            }
        }
        false
    }

    fn emit(&mut self, name: String, index: Option<u64>, arguments: Value, out: &mut ScanOutput) {
        let identity = match index {
            Some(i) => format!("{name}:{i}"),
            None => format!("{name}:{arguments}"),
        };
        if !self.emitted.insert(identity) {
            return;
        }
        out.calls.push(CompletedToolCall {
            id: generated_call_id(),
            name,
            arguments,
        });
    }
}

/// Leftmost control token in `s`, if any.
fn first_control_token(s: &str) -> Option<(usize, &'static str)> {
    CONTROL_TOKENS
        .iter()
        .filter_map(|t| s.find(t).map(|pos| (pos, *t)))
        .min_by_key(|(pos, _)| *pos)
}

/// Length of the trailing fragment that is a strict prefix of a control
/// token and must be held back until the next chunk.
fn holdback_len(s: &str) -> usize {
    let max = CONTROL_TOKENS
        .iter()
        .map(|t| t.len() - 1)
        .max()
        .unwrap_or(0)
        .min(s.len());
    for len in (1..=max).rev() {
        if !s.is_char_boundary(s.len() - len) {
            continue;
        }
        let suffix = &s[s.len() - len..];
        if CONTROL_TOKENS
            .iter()
            .any(|t| t.len() > len && t.starts_with(suffix))
        {
            return len;
        }
    }
    0
}

/// Parse a `name[:index]` call header.
fn parse_header(header: &str) -> (String, Option<u64>) {
    let header = header.trim();
    match header.rsplit_once(':') {
        Some((name, idx)) if !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()) => {
            (name.trim().to_string(), idx.parse().ok())
        }
        _ => (header.to_string(), None),
    }
}
