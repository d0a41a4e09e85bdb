//! duplex: dual-protocol streaming client for OpenAI-compatible
//! endpoints.
//!
//! Translates a protocol-neutral conversation into either the Chat
//! Completions or the Responses wire protocol, parses each protocol's
//! SSE stream into one neutral event vocabulary, and reconstructs
//! complete text, thinking, and tool-call parts from fragmented deltas,
//! including tool calls embedded in text as control tokens. Endpoints
//! that turn out not to speak the configured protocol are retried
//! transparently over the other one.
//!
//! # Quick Start
//!
//! ```no_run
//! use duplex::prelude::*;
//!
//! # struct Collector;
//! # #[async_trait::async_trait]
//! # impl PartSink for Collector {
//! #     async fn emit(&mut self, _part: ResponsePart) {}
//! # }
//! # async fn example() -> duplex::error::Result<()> {
//! let config = ModelConfig::builder()
//!     .model_id("gpt-5-mini")
//!     .base_url("https://api.openai.com/v1")
//!     .api_key(std::env::var("OPENAI_API_KEY").unwrap())
//!     .wire_api(WireApi::Responses)
//!     .build();
//! let runner = TurnRunner::new(config)?;
//! let mut sink = Collector;
//! let cancel = tokio_util::sync::CancellationToken::new();
//! runner
//!     .run(
//!         &[ModelMessage::user("Hello!")],
//!         &GenerationOptions::default(),
//!         &mut sink,
//!         &cancel,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod stream;
pub mod turn;
pub mod types;
pub mod util;
