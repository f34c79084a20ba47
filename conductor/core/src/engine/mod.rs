//! Completion Engine Abstraction
//!
//! Trait-based abstraction over the remote agent service, so the conductor can
//! run against the hosted HTTP API in production and a scripted engine in
//! tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ChatConductor  │
//! └────────┬────────┘
//!          │ EngineSlot<E>
//!          ▼
//! ┌─────────────────────┐
//! │ CompletionEngine    │  (trait)
//! └─────────┬───────────┘
//!           │
//!     ┌─────┴──────┐
//!     ▼            ▼
//! ┌────────────┐ ┌───────────────┐
//! │AgentsClient│ │ScriptedEngine │
//! │  (HTTP)    │ │   (tests)     │
//! └────────────┘ └───────────────┘
//! ```

mod agents_http;
mod slot;
pub mod test_utils;
mod traits;

pub use agents_http::AgentsClient;
pub use slot::EngineSlot;
pub use traits::{
    Agent, ApprovalMode, CompletionEngine, ConversationThread, GenerationConfig,
    McpToolResource, MessageRole, RunRequest, ToolResources, TruncationStrategy,
};
