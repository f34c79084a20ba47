//! Chat Conductor Core - Streaming Chat Orchestration
//!
//! This crate turns chat requests into lazy streams of responses produced by a
//! remote agent service. It knows nothing about the transport in front of it:
//! an HTTP handler, a WebSocket loop, or the bundled `chat-repl` binary all
//! drive it the same way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  Transport (HTTP / WS / REPL)                    │
//! │         ChatRequest (in)              ChatResponse* (out)        │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                    CHAT CONDUCTOR CORE                           │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │                     ChatConductor                           │ │
//! │  │  ┌──────────────┐  ┌────────────────┐  ┌─────────────────┐  │ │
//! │  │  │   Thread     │  │ StreamProducer │  │  EngineSlot     │  │ │
//! │  │  │   Registry   │  │  + handoff     │  │  (engine+agent) │  │ │
//! │  │  └──────────────┘  └────────────────┘  └─────────────────┘  │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │ CompletionEngine
//!                             ▼
//!                    Remote agent service
//! ```
//!
//! # Key Types
//!
//! - [`ChatConductor`]: Validates requests and streams their responses
//! - [`ChatRequest`] / [`ChatResponse`]: The transport-facing envelope
//! - [`CompletionEngine`]: The remote operations the conductor depends on
//! - [`AgentsClient`]: HTTP implementation of [`CompletionEngine`]
//! - [`ThreadRegistry`]: Session to conversation thread mapping
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chat_conductor_core::{load_config, AgentsClient, ChatConductor, ChatRequest};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loaded = load_config()?;
//!     let client = AgentsClient::new(loaded.engine)?;
//!     let agent = client.configured_agent().expect("CHAT_AGENT_ID is set");
//!     let conductor = ChatConductor::with_engine(loaded.chat, Arc::new(client), agent);
//!
//!     let request = ChatRequest::new("Top customers this quarter?").with_rls_user("user-42");
//!     let mut responses = conductor.process_chat_message(request);
//!     while let Some(response) = responses.next().await {
//!         println!("{response:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: Configuration values, TOML file and environment overrides
//! - [`conductor`]: The `ChatConductor` orchestrator
//! - [`engine`]: Completion engine abstraction and its implementations
//! - [`error`]: Error types
//! - [`messages`]: Request/response envelope and identifiers
//! - [`registry`]: Session to thread registry
//! - [`streaming`]: Handoff channel, run event sink, stream producer

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod conductor;
pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod registry;
pub mod streaming;

pub use conductor::{usage_summary, ChatConductor};
pub use config::{
    default_config_path, load_config, load_config_from_path, parse_config, ChatConfig,
    ConfigError, EngineSettings, LoadedConfig,
};
pub use engine::{
    Agent, AgentsClient, CompletionEngine, ConversationThread, EngineSlot, GenerationConfig,
    MessageRole, RunRequest, TruncationStrategy,
};
pub use error::{ChatError, EngineError};
pub use messages::{
    AgentId, ChatRequest, ChatResponse, FileInfo, RunId, SessionId, ThreadId, ValidatedRequest,
};
pub use registry::ThreadRegistry;
pub use streaming::{
    HandoffError, ProducerHandle, RunEventSink, RunOutcome, RunStatus, RunUsage, StreamItem,
    StreamProducer,
};
