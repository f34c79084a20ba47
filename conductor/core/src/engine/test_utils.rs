//! Scripted Engine
//!
//! In-memory [`CompletionEngine`] for tests. Every run replays a script of
//! [`ScriptedEvent`]s into the sink, and every remote call is recorded so tests
//! can assert on side effects (threads created and deleted, messages appended,
//! runs cancelled or interrupted).
//!
//! Scripts queued with [`ScriptedEngine::push_script`] are consumed one per
//! run; once the queue is empty the default script is replayed.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{CompletionEngine, ConversationThread, MessageRole, RunRequest};
use crate::error::EngineError;
use crate::messages::{FileInfo, RunId, ThreadId};
use crate::streaming::{RunEventSink, RunStatus, RunUsage};

/// One step of a scripted run
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedEvent {
    /// The engine assigns a run id
    RunCreated,
    /// Text fragment
    Text(String),
    /// File artifact
    File(FileInfo),
    /// Non-fatal error item
    Error(String),
    /// Pause before the next step
    Delay(Duration),
    /// Run completes
    Complete(Option<RunUsage>),
    /// Run stops early
    Incomplete {
        /// Reason reported by the engine
        reason: Option<String>,
        /// Token usage
        usage: Option<RunUsage>,
    },
    /// Run fails on the engine side
    Fail(String),
    /// The event stream breaks
    StreamError(String),
    /// The run never ends
    Hang,
}

/// Message appended through the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendedMessage {
    /// Target thread
    pub thread_id: ThreadId,
    /// Author
    pub role: MessageRole,
    /// Body
    pub content: String,
}

#[derive(Default)]
struct Recorded {
    scripts: VecDeque<Vec<ScriptedEvent>>,
    live_threads: HashSet<ThreadId>,
    deleted_threads: Vec<ThreadId>,
    messages: Vec<AppendedMessage>,
    run_requests: Vec<RunRequest>,
    cancelled_runs: Vec<RunId>,
    create_delay: Duration,
    cancel_delay: Duration,
}

/// Test double for [`CompletionEngine`]
#[derive(Default)]
pub struct ScriptedEngine {
    default_script: Vec<ScriptedEvent>,
    recorded: Mutex<Recorded>,
    threads_created: AtomicUsize,
    interrupted_runs: AtomicUsize,
    fail_create: AtomicBool,
    fail_append: AtomicBool,
    fail_delete: AtomicBool,
    fail_cancel: AtomicBool,
}

/// Counts runs whose future was dropped before the script finished
struct InterruptGuard<'a> {
    counter: &'a AtomicUsize,
    finished: bool,
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn scripted_failure(operation: &str) -> EngineError {
    EngineError::Status {
        status: 503,
        body: format!("scripted {operation} failure"),
    }
}

impl ScriptedEngine {
    /// Engine whose runs complete immediately without output
    #[must_use]
    pub fn new() -> Self {
        Self::with_script(vec![ScriptedEvent::RunCreated, ScriptedEvent::Complete(None)])
    }

    /// Engine replaying `script` for every run
    #[must_use]
    pub fn with_script(script: Vec<ScriptedEvent>) -> Self {
        Self {
            default_script: script,
            ..Self::default()
        }
    }

    /// Queue a script for the next run only
    pub fn push_script(&self, script: Vec<ScriptedEvent>) {
        self.recorded.lock().scripts.push_back(script);
    }

    /// Make `create_thread` fail
    pub fn fail_thread_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `append_message` fail
    pub fn fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Make `delete_thread` fail
    pub fn fail_thread_deletion(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Make `cancel_run` fail (the attempt is still recorded)
    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Latency of `create_thread`
    pub fn set_create_delay(&self, delay: Duration) {
        self.recorded.lock().create_delay = delay;
    }

    /// Latency of `cancel_run`, applied after the attempt is recorded
    pub fn set_cancel_delay(&self, delay: Duration) {
        self.recorded.lock().cancel_delay = delay;
    }

    /// Number of successful `create_thread` calls
    #[must_use]
    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    /// Threads created and not yet deleted
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.recorded.lock().live_threads.len()
    }

    /// Deleted threads, in call order
    #[must_use]
    pub fn deleted_threads(&self) -> Vec<ThreadId> {
        self.recorded.lock().deleted_threads.clone()
    }

    /// Appended messages, in call order
    #[must_use]
    pub fn messages(&self) -> Vec<AppendedMessage> {
        self.recorded.lock().messages.clone()
    }

    /// Started runs, in call order
    #[must_use]
    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.recorded.lock().run_requests.clone()
    }

    /// Runs a cancel was requested for
    #[must_use]
    pub fn cancelled_runs(&self) -> Vec<RunId> {
        self.recorded.lock().cancelled_runs.clone()
    }

    /// Runs dropped mid-script
    #[must_use]
    pub fn interrupted_runs(&self) -> usize {
        self.interrupted_runs.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Vec<ScriptedEvent> {
        self.recorded
            .lock()
            .scripts
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

#[async_trait]
impl CompletionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn create_thread(&self) -> Result<ConversationThread, EngineError> {
        let delay = self.recorded.lock().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(scripted_failure("create_thread"));
        }

        let thread = ConversationThread::new(format!("thread_{}", uuid::Uuid::new_v4().simple()));
        self.recorded.lock().live_threads.insert(thread.id.clone());
        self.threads_created.fetch_add(1, Ordering::SeqCst);
        Ok(thread)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), EngineError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(scripted_failure("delete_thread"));
        }
        let mut recorded = self.recorded.lock();
        recorded.live_threads.remove(thread_id);
        recorded.deleted_threads.push(thread_id.clone());
        Ok(())
    }

    async fn append_message(
        &self,
        thread_id: &ThreadId,
        role: MessageRole,
        content: &str,
    ) -> Result<(), EngineError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(scripted_failure("append_message"));
        }
        self.recorded.lock().messages.push(AppendedMessage {
            thread_id: thread_id.clone(),
            role,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn stream_run(
        &self,
        request: &RunRequest,
        sink: &mut RunEventSink,
    ) -> Result<(), EngineError> {
        self.recorded.lock().run_requests.push(request.clone());
        let script = self.next_script();
        let mut guard = InterruptGuard {
            counter: &self.interrupted_runs,
            finished: false,
        };

        for event in script {
            match event {
                ScriptedEvent::RunCreated => {
                    sink.on_run_created(RunId::new(format!("run_{}", uuid::Uuid::new_v4().simple())));
                    sink.on_status(RunStatus::InProgress);
                }
                ScriptedEvent::Text(text) => sink.on_text(text),
                ScriptedEvent::File(file) => sink.on_file(file),
                ScriptedEvent::Error(message) => sink.on_error(message),
                ScriptedEvent::Delay(delay) => tokio::time::sleep(delay).await,
                ScriptedEvent::Complete(usage) => sink.on_run_completed(RunStatus::Completed, usage),
                ScriptedEvent::Incomplete { reason, usage } => sink.on_run_incomplete(reason, usage),
                ScriptedEvent::Fail(message) => sink.on_run_failed(message, None),
                ScriptedEvent::StreamError(message) => {
                    guard.finished = true;
                    return Err(EngineError::Stream(message));
                }
                ScriptedEvent::Hang => std::future::pending::<()>().await,
            }
        }

        guard.finished = true;
        Ok(())
    }

    async fn cancel_run(&self, _thread_id: &ThreadId, run_id: &RunId) -> Result<(), EngineError> {
        let delay = {
            let mut recorded = self.recorded.lock();
            recorded.cancelled_runs.push(run_id.clone());
            recorded.cancel_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(scripted_failure("cancel_run"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::handoff::{self, StreamItem};
    use pretty_assertions::assert_eq;

    fn request() -> RunRequest {
        RunRequest {
            thread_id: ThreadId::new("t"),
            agent_id: "a".into(),
            config: crate::engine::GenerationConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_queued_scripts_run_before_default() {
        let engine = ScriptedEngine::with_script(vec![ScriptedEvent::Text("default".to_string())]);
        engine.push_script(vec![ScriptedEvent::Text("first".to_string())]);

        let (tx, mut rx) = handoff::channel();
        let mut sink = RunEventSink::new(tx);
        engine.stream_run(&request(), &mut sink).await.unwrap();
        engine.stream_run(&request(), &mut sink).await.unwrap();

        let t = Duration::from_secs(1);
        assert_eq!(rx.pop_with_timeout(t).await.unwrap(), StreamItem::Text("first".to_string()));
        assert_eq!(rx.pop_with_timeout(t).await.unwrap(), StreamItem::Text("default".to_string()));
        assert_eq!(engine.run_requests().len(), 2);
        assert_eq!(engine.interrupted_runs(), 0);
    }

    #[tokio::test]
    async fn test_thread_bookkeeping() {
        let engine = ScriptedEngine::new();
        let thread = engine.create_thread().await.unwrap();
        engine
            .append_message(&thread.id, MessageRole::User, "hi")
            .await
            .unwrap();
        assert_eq!(engine.live_threads(), 1);

        engine.delete_thread(&thread.id).await.unwrap();
        assert_eq!(engine.live_threads(), 0);
        assert_eq!(engine.messages()[0].content, "hi");
        assert_eq!(engine.deleted_threads(), vec![thread.id]);
    }
}
