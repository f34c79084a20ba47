//! Stream Producer
//!
//! Drives exactly one remote streaming run on a background task and publishes
//! its output on the handoff channel.
//!
//! The only hard guarantee towards the consumer is that the channel always
//! terminates: [`StreamItem::EndOfStream`] is pushed from a drop guard, so it
//! is sent on success, on failure, on cancellation, and when the task is
//! aborted outright.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Span};

use super::handoff::{HandoffSender, StreamItem};
use super::sink::{RunEventSink, RunOutcome};
use crate::config::ChatConfig;
use crate::engine::{
    CompletionEngine, GenerationConfig, McpToolResource, RunRequest, ToolResources,
    TruncationStrategy,
};
use crate::messages::{AgentId, RunId, ThreadId};

/// Build the generation parameters for one run
///
/// History is limited to the last `truncation_last_messages` messages. When an
/// RLS principal is present, the RLS tool server is bound for this run only,
/// with the principal in its header.
#[must_use]
pub fn build_generation_config(config: &ChatConfig, rls_user_id: Option<&str>) -> GenerationConfig {
    let mut tool_resources = ToolResources::default();
    if let Some(rls_user_id) = rls_user_id {
        tool_resources.mcp.push(
            McpToolResource::new(&config.rls_tool_server_label)
                .with_header(&config.rls_header_name, rls_user_id),
        );
    }

    GenerationConfig {
        max_completion_tokens: config.max_completion_tokens,
        max_prompt_tokens: config.max_prompt_tokens,
        temperature: config.temperature,
        top_p: config.top_p,
        tool_resources,
        truncation_strategy: TruncationStrategy::LastMessages {
            last_messages: config.truncation_last_messages,
        },
    }
}

/// Pushes the end-of-stream sentinel when dropped
struct EndOfStreamGuard {
    sender: HandoffSender,
}

impl Drop for EndOfStreamGuard {
    fn drop(&mut self) {
        self.sender.push(StreamItem::EndOfStream);
    }
}

/// One streaming run, ready to be spawned
pub struct StreamProducer<E> {
    engine: Arc<E>,
    request: RunRequest,
    span: Span,
}

impl<E: CompletionEngine + 'static> StreamProducer<E> {
    /// Prepare a run of `agent_id` against `thread_id`
    pub fn new(
        engine: Arc<E>,
        thread_id: ThreadId,
        agent_id: AgentId,
        config: &ChatConfig,
        rls_user_id: Option<&str>,
    ) -> Self {
        Self {
            engine,
            request: RunRequest {
                thread_id,
                agent_id,
                config: build_generation_config(config, rls_user_id),
            },
            span: Span::current(),
        }
    }

    /// Attach the task to a parent span
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The request this producer will send
    #[must_use]
    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    /// Start the run on a background task
    pub fn spawn(self, sender: HandoffSender) -> ProducerHandle {
        let token = CancellationToken::new();
        let span = self.span.clone();
        let task = tokio::spawn(self.run(sender, token.clone()).instrument(span));
        ProducerHandle {
            token,
            task: Some(task),
        }
    }

    async fn run(self, sender: HandoffSender, cancel: CancellationToken) -> Option<RunOutcome> {
        // Declared first so it drops last, after anything the sink pushes.
        let _end_of_stream = EndOfStreamGuard {
            sender: sender.clone(),
        };
        let mut sink = RunEventSink::new(sender);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            res = self.engine.stream_run(&self.request, &mut sink) => Some(res),
        };

        match result {
            Some(Ok(())) => {
                debug!(
                    forwarded = sink.forwarded(),
                    status = ?sink.status(),
                    "Run stream finished"
                );
                Some(sink.outcome())
            }
            Some(Err(err)) => {
                self.cancel_remote_run(sink.run_id()).await;
                error!(error = %err, "Error in agent stream");
                Span::current().record("error", true);
                Span::current().record("error_message", tracing::field::display(&err));
                sink.on_error(err.to_string());
                None
            }
            None => {
                debug!("Run stream cancelled");
                self.cancel_remote_run(sink.run_id()).await;
                None
            }
        }
    }

    /// Best-effort remote cancellation; failures are only logged
    async fn cancel_remote_run(&self, run_id: Option<&RunId>) {
        let Some(run_id) = run_id else {
            return;
        };
        if let Err(err) = self
            .engine
            .cancel_run(&self.request.thread_id, run_id)
            .await
        {
            warn!(run_id = %run_id, error = %err, "Failed to cancel run");
        } else {
            debug!(run_id = %run_id, "Cancelled remote run");
        }
    }
}

/// Control handle for a spawned producer
///
/// Dropping the handle cancels the producer without waiting for it.
#[derive(Debug)]
pub struct ProducerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<Option<RunOutcome>>>,
}

impl ProducerHandle {
    /// Whether the background task has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal cancellation (idempotent)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the producer and collect its outcome
    ///
    /// A running producer is cancelled and given `grace` to wind down
    /// (including its remote cancel request) before it is aborted. Safe to call
    /// on a finished producer and more than once; later calls return `None`.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<RunOutcome> {
        let mut task = self.task.take()?;
        if !task.is_finished() {
            self.token.cancel();
        }

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    error!(error = %join_err, "Producer task panicked");
                }
                None
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis(), "Producer did not stop in time, aborting");
                task.abort();
                None
            }
        }
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_utils::{ScriptedEngine, ScriptedEvent};
    use crate::messages::FileInfo;
    use crate::streaming::handoff::{self, HandoffError};
    use crate::streaming::sink::RunUsage;
    use pretty_assertions::assert_eq;

    fn producer(engine: &Arc<ScriptedEngine>, rls: Option<&str>) -> StreamProducer<ScriptedEngine> {
        StreamProducer::new(
            Arc::clone(engine),
            ThreadId::new("thread_1"),
            AgentId::new("asst_1"),
            &ChatConfig::default(),
            rls,
        )
    }

    async fn collect(rx: &mut handoff::HandoffReceiver) -> Vec<StreamItem> {
        let mut items = Vec::new();
        loop {
            match rx.pop_with_timeout(Duration::from_secs(5)).await {
                Ok(StreamItem::EndOfStream) => {
                    items.push(StreamItem::EndOfStream);
                    break;
                }
                Ok(item) => items.push(item),
                Err(HandoffError::Closed | HandoffError::TimedOut(_)) => break,
            }
        }
        items
    }

    #[test]
    fn test_generation_config_binds_rls_header() {
        let config = ChatConfig::default();
        let generation = build_generation_config(&config, Some("user-42"));

        assert_eq!(generation.tool_resources.mcp.len(), 1);
        let tool = &generation.tool_resources.mcp[0];
        assert_eq!(tool.server_label, config.rls_tool_server_label);
        assert_eq!(tool.headers.get("x-rls-user-id").map(String::as_str), Some("user-42"));
        assert_eq!(
            generation.truncation_strategy,
            TruncationStrategy::LastMessages { last_messages: 5 }
        );
        assert_eq!(generation.max_completion_tokens, config.max_completion_tokens);
    }

    #[test]
    fn test_generation_config_without_rls() {
        let generation = build_generation_config(&ChatConfig::default(), None);
        assert!(generation.tool_resources.is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_ends_with_sentinel() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::Text("a".to_string()),
            ScriptedEvent::File(FileInfo::new("f1")),
            ScriptedEvent::Text("b".to_string()),
            ScriptedEvent::Complete(Some(RunUsage::new(10, 5, 15))),
        ]));
        let (tx, mut rx) = handoff::channel();
        let mut handle = producer(&engine, Some("u1")).spawn(tx);

        let items = collect(&mut rx).await;
        assert_eq!(
            items,
            vec![
                StreamItem::Text("a".to_string()),
                StreamItem::File(FileInfo::new("f1")),
                StreamItem::Text("b".to_string()),
                StreamItem::EndOfStream,
            ]
        );

        let outcome = handle.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.usage, Some(RunUsage::new(10, 5, 15)));
        assert!(engine.cancelled_runs().is_empty());

        let requests = engine.run_requests();
        let request = &requests[0];
        assert_eq!(request.thread_id.as_str(), "thread_1");
        assert_eq!(request.config.tool_resources.mcp.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_pushes_error_then_sentinel() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::Text("partial".to_string()),
            ScriptedEvent::StreamError("connection reset".to_string()),
        ]));
        let (tx, mut rx) = handoff::channel();
        let mut handle = producer(&engine, None).spawn(tx);

        let items = collect(&mut rx).await;
        assert_eq!(
            items,
            vec![
                StreamItem::Text("partial".to_string()),
                StreamItem::Error("connection reset".to_string()),
                StreamItem::EndOfStream,
            ]
        );
        assert!(handle.shutdown(Duration::from_secs(1)).await.is_none());
        assert_eq!(engine.cancelled_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_failure_is_not_fatal() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::StreamError("boom".to_string()),
        ]));
        engine.fail_cancel(true);
        let (tx, mut rx) = handoff::channel();
        let _handle = producer(&engine, None).spawn(tx);

        let items = collect(&mut rx).await;
        assert_eq!(
            items,
            vec![StreamItem::Error("boom".to_string()), StreamItem::EndOfStream]
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_hanging_run() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::Hang,
        ]));
        let (tx, mut rx) = handoff::channel();
        let mut handle = producer(&engine, None).spawn(tx);

        // Wait until the run is in flight.
        while engine.run_requests().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());

        assert!(handle.shutdown(Duration::from_secs(1)).await.is_none());
        assert!(handle.is_finished());
        assert_eq!(engine.cancelled_runs().len(), 1);
        assert_eq!(engine.interrupted_runs(), 1);

        let items = collect(&mut rx).await;
        assert_eq!(items, vec![StreamItem::EndOfStream]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_grace() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::Hang,
        ]));
        engine.set_cancel_delay(Duration::from_secs(3600));
        let (tx, mut rx) = handoff::channel();
        let mut handle = producer(&engine, None).spawn(tx);

        while engine.run_requests().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(handle.shutdown(Duration::from_secs(1)).await.is_none());
        assert!(handle.is_finished());
        assert_eq!(engine.cancelled_runs().len(), 1);

        assert_eq!(collect(&mut rx).await, vec![StreamItem::EndOfStream]);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_after_finish() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![ScriptedEvent::Complete(None)]));
        let (tx, mut rx) = handoff::channel();
        let mut handle = producer(&engine, None).spawn(tx);

        assert_eq!(collect(&mut rx).await, vec![StreamItem::EndOfStream]);

        handle.cancel();
        handle.cancel();
        assert!(handle.shutdown(Duration::from_secs(1)).await.is_some());
        assert!(handle.shutdown(Duration::from_secs(1)).await.is_none());
        assert!(engine.cancelled_runs().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_producer() {
        let engine = Arc::new(ScriptedEngine::with_script(vec![
            ScriptedEvent::RunCreated,
            ScriptedEvent::Hang,
        ]));
        let (tx, mut rx) = handoff::channel();
        let handle = producer(&engine, None).spawn(tx);

        while engine.run_requests().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(handle);

        assert_eq!(collect(&mut rx).await, vec![StreamItem::EndOfStream]);
        assert_eq!(engine.interrupted_runs(), 1);
    }
}
