//! Generation options and related enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Options controlling one generation request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub logprobs: Option<bool>,
    pub top_logprobs: Option<u32>,
    /// Per-request overrides for Responses-protocol options; fields set
    /// here take precedence over the static `ModelConfig` values.
    pub responses: Option<ResponsesOptions>,
}

/// Tool definition sent to the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Tool-choice mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// Tool calling disabled for this request.
    None,
    /// The model must call the named tool.
    Tool { name: String },
}

/// Responses-protocol request options.
///
/// Present both as static configuration on a `ModelConfig` and as a
/// per-request override on `GenerationOptions`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResponsesOptions {
    pub instructions: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_summary: Option<ReasoningSummary>,
    pub truncation: Option<Truncation>,
    pub text_verbosity: Option<TextVerbosity>,
    pub parallel_tool_calls: Option<bool>,
}

impl ResponsesOptions {
    /// Field-wise merge, `self` winning over `base`.
    pub fn merged_over(&self, base: &ResponsesOptions) -> ResponsesOptions {
        ResponsesOptions {
            instructions: self.instructions.clone().or_else(|| base.instructions.clone()),
            reasoning_effort: self.reasoning_effort.or(base.reasoning_effort),
            reasoning_summary: self.reasoning_summary.or(base.reasoning_summary),
            truncation: self.truncation.or(base.truncation),
            text_verbosity: self.text_verbosity.or(base.text_verbosity),
            parallel_tool_calls: self.parallel_tool_calls.or(base.parallel_tool_calls),
        }
    }
}

/// Reasoning effort level for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

/// Reasoning summary mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
}

/// Context truncation strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Truncation {
    Auto,
    Disabled,
}

/// Text verbosity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TextVerbosity {
    Low,
    Medium,
    High,
}
