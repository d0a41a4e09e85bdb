//! Resolved model configuration.
//!
//! A `ModelConfig` is produced by the host from its persisted settings and
//! handed in per request; everything on it is immutable except the
//! stateful-continuation flag, which the orchestrator may downgrade once
//! after an upstream rejection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bon::Builder;

use crate::protocol::WireApi;
use crate::types::generation::{ResponsesOptions, ToolChoice};

/// Immutable-per-request model configuration.
#[derive(Debug, Clone, Builder)]
pub struct ModelConfig {
    /// Model identifier sent on the wire.
    #[builder(into)]
    pub model_id: String,
    /// Human-readable name for UI display.
    #[builder(into)]
    pub display_name: Option<String>,
    /// Endpoint base URL; normalized per protocol at request time.
    #[builder(into)]
    pub base_url: String,
    #[builder(into)]
    pub api_key: String,
    /// Input budget; prompts estimated above this fail before dispatch.
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// Whether image parts may be sent to this model.
    #[builder(default = true)]
    pub supports_images: bool,
    /// Wire protocol this endpoint is configured to speak.
    pub wire_api: WireApi,
    /// Static Responses-protocol options.
    #[builder(default)]
    pub responses: ResponsesOptions,
    /// Default tool-choice mode when the request does not set one.
    pub tool_choice: Option<ToolChoice>,
    /// Servers that reject the system role get it downgraded to user.
    #[builder(default = true)]
    pub supports_system_role: bool,
    /// Stateful continuation via `previous_response_id`.
    #[builder(default)]
    pub continuation: ContinuationSupport,
    /// Retry once over the Chat protocol when the Responses endpoint is
    /// missing.
    #[builder(default = true)]
    pub fallback_to_chat: bool,
    /// Optional outbound proxy URL.
    #[builder(into)]
    pub proxy: Option<String>,
}

/// Shared continuation-support flag with a monotonic one-way disable.
///
/// Cloned configs observe the same flag, so a downgrade triggered by one
/// turn is visible to every later turn in the session. It is never
/// re-enabled.
#[derive(Debug, Clone)]
pub struct ContinuationSupport {
    enabled: Arc<AtomicBool>,
}

impl ContinuationSupport {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Permanently disable stateful continuation for this model.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

impl Default for ContinuationSupport {
    fn default() -> Self {
        Self::new(false)
    }
}
