//! Completion Engine Traits
//!
//! The conductor never talks to a concrete agent service directly. It depends
//! on [`CompletionEngine`], which exposes exactly the remote operations the
//! orchestration needs: thread lifecycle, message append, a streaming run that
//! reports into a [`RunEventSink`], and run cancellation.
//!
//! Implementations handle provider-specific details (API formats, auth, event
//! decoding). The HTTP implementation is [`AgentsClient`](super::AgentsClient);
//! tests use [`ScriptedEngine`](super::test_utils::ScriptedEngine).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::messages::{AgentId, RunId, ThreadId};
use crate::streaming::RunEventSink;

/// Remote message-history container owned by one session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationThread {
    /// Engine-side identifier
    pub id: ThreadId,
    /// When the engine created the thread
    pub created_at: DateTime<Utc>,
}

impl ConversationThread {
    /// Create a thread handle stamped with the current time
    pub fn new(id: impl Into<ThreadId>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Remote agent identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent identifier
    pub id: AgentId,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Agent {
    /// Create an agent handle
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Author of a thread message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// The agent
    Assistant,
}

/// How much thread history the engine sends to the model per run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TruncationStrategy {
    /// Engine decides
    Auto,
    /// Only the most recent messages
    LastMessages {
        /// Number of trailing messages kept
        last_messages: u32,
    },
}

impl Default for TruncationStrategy {
    fn default() -> Self {
        Self::LastMessages { last_messages: 5 }
    }
}

/// Whether a tool call needs explicit approval
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Calls run without approval
    #[default]
    Never,
    /// Every call waits for approval
    Always,
}

/// Run-scoped binding for an MCP tool server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpToolResource {
    /// Label of the tool server registered on the agent
    pub server_label: String,
    /// Headers sent with every tool call of this run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Approval requirement
    pub require_approval: ApprovalMode,
}

impl McpToolResource {
    /// Create a binding with no headers
    pub fn new(server_label: impl Into<String>) -> Self {
        Self {
            server_label: server_label.into(),
            headers: BTreeMap::new(),
            require_approval: ApprovalMode::Never,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Tool resources overriding the agent's defaults for one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResources {
    /// MCP server bindings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp: Vec<McpToolResource>,
}

impl ToolResources {
    /// Whether no resource is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mcp.is_empty()
    }
}

/// Generation parameters for one run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Completion token budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Prompt token budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_prompt_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Run-scoped tool resources
    #[serde(skip_serializing_if = "ToolResources::is_empty")]
    pub tool_resources: ToolResources,
    /// History truncation policy
    pub truncation_strategy: TruncationStrategy,
}

/// Everything the engine needs to start one streaming run
#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    /// Thread the run reads from and appends to
    pub thread_id: ThreadId,
    /// Agent executing the run
    pub agent_id: AgentId,
    /// Generation parameters
    pub config: GenerationConfig,
}

/// Remote completion engine
///
/// Implement this trait to plug a different agent service into the conductor.
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Engine name for logs (e.g., "Agents")
    fn name(&self) -> &str;

    /// Create an empty conversation thread
    async fn create_thread(&self) -> Result<ConversationThread, EngineError>;

    /// Delete a conversation thread
    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), EngineError>;

    /// Append a message to a thread
    async fn append_message(
        &self,
        thread_id: &ThreadId,
        role: MessageRole,
        content: &str,
    ) -> Result<(), EngineError>;

    /// Start a run and stream its events into `sink` until the run ends
    ///
    /// Returns once the engine signals the end of the stream. Run-level
    /// failures the engine reports as events are forwarded through the sink;
    /// an `Err` means the stream itself broke.
    async fn stream_run(
        &self,
        request: &RunRequest,
        sink: &mut RunEventSink,
    ) -> Result<(), EngineError>;

    /// Ask the engine to stop a run
    async fn cancel_run(&self, thread_id: &ThreadId, run_id: &RunId) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generation_config_wire_shape() {
        let config = GenerationConfig {
            max_completion_tokens: Some(100),
            max_prompt_tokens: None,
            temperature: Some(0.5),
            top_p: None,
            tool_resources: ToolResources {
                mcp: vec![McpToolResource::new("Sales").with_header("x-rls-user-id", "u1")],
            },
            truncation_strategy: TruncationStrategy::LastMessages { last_messages: 5 },
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "max_completion_tokens": 100,
                "temperature": 0.5,
                "tool_resources": {
                    "mcp": [{
                        "server_label": "Sales",
                        "headers": {"x-rls-user-id": "u1"},
                        "require_approval": "never"
                    }]
                },
                "truncation_strategy": {"type": "last_messages", "last_messages": 5}
            })
        );
    }

    #[test]
    fn test_empty_tool_resources_omitted() {
        let json = serde_json::to_value(GenerationConfig::default()).unwrap();
        assert!(json.get("tool_resources").is_none());
        assert_eq!(
            json["truncation_strategy"],
            serde_json::json!({"type": "last_messages", "last_messages": 5})
        );
    }

    #[test]
    fn test_auto_truncation_serializes_as_tag() {
        let json = serde_json::to_value(TruncationStrategy::Auto).unwrap();
        assert_eq!(json, serde_json::json!({"type": "auto"}));
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_value(MessageRole::User).unwrap(), "user");
        assert_eq!(serde_json::to_value(MessageRole::Assistant).unwrap(), "assistant");
    }
}
