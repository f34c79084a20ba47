//! Error Types
//!
//! Every failure inside the conductor is one of these. At the public boundary
//! they are rendered into a [`ChatResponse`](crate::ChatResponse) error, so the
//! `Display` strings here are user-facing and kept stable.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the remote completion engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered with a non-success status
    #[error("Engine returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// A payload could not be decoded
    #[error("Failed to decode engine payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The run reported a failure or the event stream broke
    #[error("{0}")]
    Stream(String),
}

/// Failures surfaced by the chat conductor
#[derive(Debug, Error)]
pub enum ChatError {
    /// The message was empty or whitespace only
    #[error("Empty message")]
    EmptyMessage,

    /// The request did not carry an RLS principal
    #[error("RLS User ID is required")]
    MissingRlsUserId,

    /// Engine client or agent identity missing
    #[error("Agent not initialized")]
    AgentNotInitialized,

    /// Thread creation attempted without an engine client
    #[error("Engine client is not available")]
    EngineUnavailable,

    /// No stream item arrived within the configured window
    #[error("Response timeout after {} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// A remote call failed
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ChatError {
    /// Whether this error was raised before any side effect
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::MissingRlsUserId | Self::AgentNotInitialized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages_are_stable() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "Empty message");
        assert_eq!(
            ChatError::MissingRlsUserId.to_string(),
            "RLS User ID is required"
        );
        assert_eq!(
            ChatError::AgentNotInitialized.to_string(),
            "Agent not initialized"
        );
    }

    #[test]
    fn test_timeout_message_includes_seconds() {
        let err = ChatError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Response timeout after 30 seconds");
    }

    #[test]
    fn test_timeout_message_keeps_fraction() {
        let err = ChatError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "Response timeout after 0.5 seconds");
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err = ChatError::from(EngineError::Stream("rate limited".to_string()));
        assert_eq!(err.to_string(), "rate limited");
        assert!(!err.is_validation());
        assert!(ChatError::EmptyMessage.is_validation());
    }

    #[test]
    fn test_status_error_display() {
        let err = EngineError::Status {
            status: 404,
            body: "thread not found".to_string(),
        };
        assert_eq!(err.to_string(), "Engine returned 404: thread not found");
    }
}
