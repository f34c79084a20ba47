//! Chat Messages
//!
//! The request/response envelope exchanged with whatever transport drives the
//! conductor (HTTP, WebSocket, CLI), plus the identifier newtypes shared across
//! the crate.
//!
//! # Design Philosophy
//!
//! Transports are thin. They deserialize a [`ChatRequest`], hand it to the
//! [`ChatConductor`](crate::ChatConductor), and serialize each [`ChatResponse`]
//! as it is yielded. A response carries exactly one payload (content, file,
//! error) or is the `done` sentinel, so a transport never needs to inspect
//! more than one field to decide what to render.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Session identity used when a request does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Number of characters of the user message kept in span previews
const PREVIEW_CHARS: usize = 50;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an identifier from any string-like value
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Caller-chosen conversation identity spanning many chat exchanges
    SessionId
);
string_id!(
    /// Remote engine's message-history container identifier
    ThreadId
);
string_id!(
    /// Remote agent identifier
    AgentId
);
string_id!(
    /// Identifier of one streaming run against a thread
    RunId
);

impl SessionId {
    /// The well-known session used when a request omits one
    #[must_use]
    pub fn default_session() -> Self {
        Self(DEFAULT_SESSION_ID.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::default_session()
    }
}

// ============================================================================
// Request
// ============================================================================

/// Incoming chat request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Free-text user message
    pub message: String,
    /// Session to continue (defaults to [`DEFAULT_SESSION_ID`])
    #[serde(default = "default_session_field")]
    pub session_id: Option<SessionId>,
    /// Row-level-security principal forwarded to downstream tools
    #[serde(default)]
    pub rls_user_id: Option<String>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_session_field() -> Option<SessionId> {
    Some(SessionId::default_session())
}

/// A request that passed validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Trimmed, non-empty message
    pub message: String,
    /// Resolved session
    pub session_id: SessionId,
    /// RLS principal, forwarded exactly as the caller sent it
    pub rls_user_id: String,
}

impl ChatRequest {
    /// Create a request for the default session
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: Some(SessionId::default_session()),
            rls_user_id: None,
        }
    }

    /// Set the session
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the RLS principal
    #[must_use]
    pub fn with_rls_user(mut self, rls_user_id: impl Into<String>) -> Self {
        self.rls_user_id = Some(rls_user_id.into());
        self
    }

    /// Check the request before any side effect happens
    ///
    /// An empty message is reported before a missing RLS principal. A blank
    /// principal counts as missing; a non-blank one is kept untouched.
    pub fn validate(&self) -> Result<ValidatedRequest, ChatError> {
        let message = self.message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let rls_user_id = match self.rls_user_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err(ChatError::MissingRlsUserId),
        };

        Ok(ValidatedRequest {
            message: message.to_string(),
            session_id: self.session_id.clone().unwrap_or_default(),
            rls_user_id,
        })
    }
}

impl ValidatedRequest {
    /// Short form of the message for log and span fields
    #[must_use]
    pub fn preview(&self) -> String {
        let mut chars = self.message.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Structured reference to a file produced during a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Engine-side file identifier
    pub file_id: String,
    /// Display name, when the engine reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// MIME type hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Download location, when already resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileInfo {
    /// Create a file reference from its identifier
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            ..Default::default()
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Set the MIME type
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One element of a chat response stream
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Incremental text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Artifact reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    /// Failure text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// End-of-stream sentinel
    #[serde(default)]
    pub done: bool,
}

impl ChatResponse {
    /// Incremental text response
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    /// File artifact response
    #[must_use]
    pub fn file(file_info: FileInfo) -> Self {
        Self {
            file_info: Some(file_info),
            ..Default::default()
        }
    }

    /// Error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// The `done` sentinel
    #[must_use]
    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    /// Whether this is the `done` sentinel
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether this response carries an error
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<&ChatError> for ChatResponse {
    fn from(err: &ChatError) -> Self {
        Self::error(err.to_string())
    }
}
