//! Chat Conductor - The Orchestration Core
//!
//! The `ChatConductor` turns one chat request into a lazy stream of
//! [`ChatResponse`]s. It:
//! - Validates the request before touching anything remote
//! - Resolves the session's conversation thread
//! - Appends the user message and spawns a [`StreamProducer`] for the run
//! - Drains the handoff channel into responses, with a per-item timeout
//! - Cleans up the producer and the channel on every exit path
//!
//! # Design Philosophy
//!
//! The response stream never fails. Every problem becomes a
//! `ChatResponse { error }`, so transports can forward the stream without
//! inspecting it. Once streaming has started the stream always ends with
//! `done`; only failures before the run starts end on an error alone.
//!
//! ```text
//!  process_chat_message
//!         │
//!         ▼
//!  ┌──────────────┐  get_or_create   ┌────────────────┐
//!  │   validate   │ ───────────────► │ ThreadRegistry │
//!  └──────┬───────┘                  └────────────────┘
//!         │ append_message + spawn
//!         ▼
//!  ┌────────────────┐  StreamItem   ┌───────────────┐
//!  │ StreamProducer │ ────────────► │ handoff queue │ ──► ChatResponse*
//!  └────────────────┘               └───────────────┘        │
//!                                                            ▼
//!                                              usage summary, done
//! ```
//!
//! Dropping the response stream early drops the [`ProducerHandle`] it owns,
//! which cancels the run in the background.

use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::ChatConfig;
use crate::engine::{Agent, CompletionEngine, ConversationThread, EngineSlot, MessageRole};
use crate::error::ChatError;
use crate::messages::{ChatRequest, ChatResponse, SessionId, ValidatedRequest};
use crate::registry::ThreadRegistry;
use crate::streaming::handoff::{self, HandoffError, HandoffSender, StreamItem};
use crate::streaming::{ProducerHandle, RunUsage, StreamProducer};

/// Informational response summarizing a run's token usage
#[must_use]
pub fn usage_summary(usage: &RunUsage) -> String {
    format!(
        "</br></br>Token usage: Prompt: {}, Completion: {}, Total: {}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    )
}

struct Inner<E> {
    config: ChatConfig,
    slot: Arc<EngineSlot<E>>,
    registry: ThreadRegistry<E>,
}

/// Chat orchestrator
///
/// Cheap to clone; clones share the thread registry and engine slot.
pub struct ChatConductor<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for ChatConductor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: CompletionEngine + 'static> ChatConductor<E> {
    /// Create a conductor with an empty engine slot
    #[must_use]
    pub fn new(config: ChatConfig) -> Self {
        Self::with_slot(config, Arc::new(EngineSlot::new()))
    }

    /// Create a conductor bound to `engine` and `agent`
    #[must_use]
    pub fn with_engine(config: ChatConfig, engine: Arc<E>, agent: Agent) -> Self {
        Self::with_slot(config, Arc::new(EngineSlot::bound(engine, agent)))
    }

    fn with_slot(config: ChatConfig, slot: Arc<EngineSlot<E>>) -> Self {
        let registry = ThreadRegistry::new(Arc::clone(&slot));
        Self {
            inner: Arc::new(Inner {
                config,
                slot,
                registry,
            }),
        }
    }

    /// Engine slot, for attaching the engine or agent later
    #[must_use]
    pub fn slot(&self) -> &Arc<EngineSlot<E>> {
        &self.inner.slot
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    /// Session to thread registry
    #[must_use]
    pub fn registry(&self) -> &ThreadRegistry<E> {
        &self.inner.registry
    }

    /// Whether an engine and an agent are attached
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.slot.is_initialized()
    }

    /// Thread for `session_id`, created on first use
    pub async fn get_or_create_thread(
        &self,
        session_id: &SessionId,
    ) -> Result<ConversationThread, ChatError> {
        self.inner.registry.get_or_create(session_id).await
    }

    /// Drop the session's thread (no-op for unknown sessions)
    pub async fn clear_session_thread(&self, session_id: &SessionId) {
        self.inner.registry.clear(session_id).await;
    }

    /// Process one chat message as a lazy response stream
    ///
    /// Validation failures yield a single error. After validation the stream
    /// yields one response per run item, then an optional usage summary and
    /// incompletion note, then `done`. A per-item timeout yields one timeout
    /// error and skips to cleanup. Failures while starting the run yield a
    /// single `Streaming error: ...` response.
    pub fn process_chat_message(&self, request: ChatRequest) -> BoxStream<'static, ChatResponse> {
        let this = self.clone();

        Box::pin(async_stream::stream! {
            let validated = match request.validate() {
                Ok(validated) => validated,
                Err(err) => {
                    warn!(error = %err, "Rejected chat request");
                    yield ChatResponse::from(&err);
                    return;
                }
            };

            let (engine, agent) = match this.inner.slot.binding() {
                Some(binding) => binding,
                None => {
                    let err = ChatError::AgentNotInitialized;
                    warn!(error = %err, "Rejected chat request");
                    yield ChatResponse::from(&err);
                    return;
                }
            };

            let span = info_span!(
                "chat_request",
                message_preview = %validated.preview(),
                session_id = %validated.session_id,
                agent_id = %agent.id,
                rls_user_id = %validated.rls_user_id,
                thread_id = tracing::field::Empty,
                error = tracing::field::Empty,
                error_message = tracing::field::Empty,
            );

            let (sender, mut receiver) = handoff::channel();
            let started = this
                .start_exchange(&engine, &agent, &validated, sender)
                .instrument(span.clone())
                .await;
            let mut producer = match started {
                Ok(producer) => producer,
                Err(err) => {
                    span.record("error", true);
                    span.record("error_message", tracing::field::display(&err));
                    error!(parent: &span, error = %err, "Failed to start chat exchange");
                    yield ChatResponse::error(format!("Streaming error: {err}"));
                    return;
                }
            };

            let config = &this.inner.config;
            let mut processed = 0usize;
            loop {
                let depth = receiver.depth();
                if depth > config.queue_warning_threshold {
                    warn!(
                        parent: &span,
                        depth,
                        threshold = config.queue_warning_threshold,
                        "Stream queue is backing up"
                    );
                }

                match receiver.pop_with_timeout(config.response_timeout).await {
                    Ok(StreamItem::EndOfStream) | Err(HandoffError::Closed) => break,
                    Ok(StreamItem::Text(text)) => {
                        processed += 1;
                        yield ChatResponse::content(text);
                    }
                    Ok(StreamItem::File(file)) => {
                        processed += 1;
                        yield ChatResponse::file(file);
                    }
                    Ok(StreamItem::Error(message)) => {
                        processed += 1;
                        yield ChatResponse::error(message);
                    }
                    Err(HandoffError::TimedOut(elapsed)) => {
                        let err = ChatError::Timeout(elapsed);
                        span.record("error", true);
                        span.record("error_message", tracing::field::display(&err));
                        warn!(parent: &span, timeout_secs = elapsed.as_secs_f64(), "Response timeout");
                        yield ChatResponse::from(&err);
                        break;
                    }
                }
            }

            let outcome = producer.shutdown(config.producer_shutdown_grace).await;
            let residual = receiver.drain_and_close();
            if residual > 0 {
                info!(parent: &span, residual, "Discarded residual stream items");
            }

            if let Some(outcome) = outcome {
                if let Some(usage) = outcome.usage {
                    yield ChatResponse::content(usage_summary(&usage));
                }
                if let Some(reason) = outcome.incomplete_reason {
                    yield ChatResponse::content(format!("</br>{reason}"));
                }
            }

            info!(parent: &span, processed, "Chat stream finished");
            yield ChatResponse::done();
        })
    }

    /// Resolve the thread, append the message and spawn the run
    async fn start_exchange(
        &self,
        engine: &Arc<E>,
        agent: &Agent,
        request: &ValidatedRequest,
        sender: HandoffSender,
    ) -> Result<ProducerHandle, ChatError> {
        let thread = self.inner.registry.get_or_create(&request.session_id).await?;
        Span::current().record("thread_id", tracing::field::display(&thread.id));

        engine
            .append_message(&thread.id, MessageRole::User, &request.message)
            .await?;
        debug!(thread_id = %thread.id, "Appended user message");

        let producer = StreamProducer::new(
            Arc::clone(engine),
            thread.id,
            agent.id.clone(),
            &self.inner.config,
            Some(&request.rls_user_id),
        )
        .with_span(Span::current());

        Ok(producer.spawn(sender))
    }
}
