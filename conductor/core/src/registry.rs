//! Thread Registry
//!
//! Maps each session to its remote conversation thread.
//!
//! # Design Philosophy
//!
//! A single async mutex guards the whole map and is held across the remote
//! create and delete calls. Two concurrent requests for the same session can
//! therefore never create two threads, and a thread is never deleted remotely
//! while still visible locally. Requests for different sessions are serialized
//! too; thread creation is rare compared to message streaming.
//!
//! A remote create, once started, runs to completion on its own task while
//! holding the lock. Dropping the caller's future mid-create therefore still
//! records the new thread instead of orphaning it remotely.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn, Instrument};

use crate::engine::{CompletionEngine, ConversationThread, EngineSlot};
use crate::error::{ChatError, EngineError};
use crate::messages::SessionId;

/// Session to thread mapping
pub struct ThreadRegistry<E> {
    slot: Arc<EngineSlot<E>>,
    threads: Arc<Mutex<HashMap<SessionId, ConversationThread>>>,
}

impl<E: CompletionEngine + 'static> ThreadRegistry<E> {
    /// Create an empty registry using the engine in `slot`
    #[must_use]
    pub fn new(slot: Arc<EngineSlot<E>>) -> Self {
        Self {
            slot,
            threads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Thread for `session_id`, created remotely on first use
    pub async fn get_or_create(
        &self,
        session_id: &SessionId,
    ) -> Result<ConversationThread, ChatError> {
        let mut threads = Arc::clone(&self.threads).lock_owned().await;
        if let Some(thread) = threads.get(session_id) {
            return Ok(thread.clone());
        }

        let engine = self.slot.engine().ok_or(ChatError::EngineUnavailable)?;
        let session_id = session_id.clone();
        let creation = tokio::spawn(
            async move {
                let thread = engine.create_thread().await?;
                threads.insert(session_id.clone(), thread.clone());
                info!(thread_id = %thread.id, session_id = %session_id, "Created new thread for session");
                Ok::<_, ChatError>(thread)
            }
            .in_current_span(),
        );

        match creation.await {
            Ok(result) => result,
            Err(join_err) => Err(ChatError::Engine(EngineError::Stream(format!(
                "Thread creation task failed: {join_err}"
            )))),
        }
    }

    /// Forget the session's thread, deleting it remotely when possible
    ///
    /// The remote delete is only attempted when both the engine and the agent
    /// are attached, and its failure is logged. The local mapping is removed
    /// either way. No-op for unknown sessions.
    pub async fn clear(&self, session_id: &SessionId) {
        let mut threads = self.threads.lock().await;
        let Some(thread) = threads.remove(session_id) else {
            return;
        };

        if let Some((engine, agent)) = self.slot.binding() {
            let span = tracing::info_span!(
                "chat_thread_deletion",
                thread_id = %thread.id,
                session_id = %session_id,
                agent_id = %agent.id,
                date_time = %chrono::Utc::now().to_rfc3339(),
            );
            if let Err(err) = engine.delete_thread(&thread.id).instrument(span).await {
                warn!(
                    thread_id = %thread.id,
                    session_id = %session_id,
                    error = %err,
                    "Failed to delete remote thread"
                );
            }
        }

        info!(session_id = %session_id, "Cleared thread for session");
    }

    /// Thread currently mapped to `session_id`
    pub async fn get(&self, session_id: &SessionId) -> Option<ConversationThread> {
        self.threads.lock().await.get(session_id).cloned()
    }

    /// Number of mapped sessions
    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }

    /// Whether no session is mapped
    pub async fn is_empty(&self) -> bool {
        self.threads.lock().await.is_empty()
    }

    /// Mapped sessions, sorted
    pub async fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<_> = self.threads.lock().await.keys().cloned().collect();
        sessions.sort();
        sessions
    }
}
