//! Agents Service Client
//!
//! [`CompletionEngine`] over the hosted agents REST API (threads, messages,
//! runs). Runs are streamed as server-sent events and decoded into
//! [`RunEventSink`] calls.
//!
//! # Endpoints
//!
//! - `POST   /threads` - create a thread
//! - `DELETE /threads/{thread}` - delete a thread
//! - `POST   /threads/{thread}/messages` - append a message
//! - `POST   /threads/{thread}/runs` - start a streaming run
//! - `POST   /threads/{thread}/runs/{run}/cancel` - cancel a run
//!
//! Every request carries `api-version` as a query parameter and, when an API
//! key is configured, a bearer token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::{
    Agent, CompletionEngine, ConversationThread, GenerationConfig, MessageRole, RunRequest,
};
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::messages::{FileInfo, RunId, ThreadId};
use crate::streaming::{RunEventSink, RunStatus, RunUsage};

/// HTTP client for the agents service
#[derive(Clone)]
pub struct AgentsClient {
    settings: EngineSettings,
    http_client: reqwest::Client,
}

impl AgentsClient {
    /// Create a client for `settings`
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            settings,
            http_client,
        })
    }

    /// Connection settings
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Agent named by the settings, if any
    #[must_use]
    pub fn configured_agent(&self) -> Option<Agent> {
        self.settings.agent_id.as_deref().map(Agent::new)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, self.url(path))
            .query(&[("api-version", self.settings.api_version.as_str())]);
        match &self.settings.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Request with the per-call timeout (not used for streams)
    fn call(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.request(method, path).timeout(self.settings.request_timeout)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::Status { status, body })
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct ThreadObject {
    id: String,
    #[serde(default)]
    created_at: Option<i64>,
}

impl From<ThreadObject> for ConversationThread {
    fn from(object: ThreadObject) -> Self {
        let created_at = object
            .created_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        Self {
            id: ThreadId::new(object.id),
            created_at,
        }
    }
}

#[derive(Serialize)]
struct MessageBody<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Serialize)]
struct RunBody<'a> {
    assistant_id: &'a str,
    stream: bool,
    #[serde(flatten)]
    config: &'a GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    #[serde(default)]
    usage: Option<RunUsage>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    last_error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LastError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl LastError {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => "Run failed".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: DeltaBody,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Vec<DeltaContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaContent {
    Text { text: DeltaText },
    ImageFile { image_file: FileRef },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct DeltaText {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Annotation {
    FilePath {
        #[serde(default)]
        text: Option<String>,
        file_path: FileRef,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Server-Sent Events
// ============================================================================

/// One decoded SSE event
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SseFrame {
    event: Option<String>,
    data: String,
}

/// Incremental SSE decoder
///
/// Bytes are buffered and split on `\n` only, so multi-byte characters split
/// across network chunks are reassembled before decoding.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    pending: SseFrame,
    has_data: bool,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.feed_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush an unterminated trailing event
    fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.feed_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.feed_line("")
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if !self.has_data && self.pending.event.is_none() {
                return None;
            }
            self.has_data = false;
            return Some(std::mem::take(&mut self.pending));
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.has_data = true;
            }
            _ => {}
        }
        None
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

fn file_name_from_link(text: &str) -> Option<&str> {
    text.rsplit(['/', ':'])
        .next()
        .map(|name| name.trim_end_matches(')'))
        .filter(|name| !name.is_empty())
}

/// Apply one run event to the sink
fn dispatch(frame: &SseFrame, sink: &mut RunEventSink) -> Result<Flow, EngineError> {
    let Some(event) = frame.event.as_deref() else {
        return Ok(Flow::Continue);
    };

    match event {
        "thread.run.created" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            sink.on_run_created(RunId::new(run.id));
        }
        "thread.run.queued" => sink.on_status(RunStatus::Queued),
        "thread.run.in_progress" => sink.on_status(RunStatus::InProgress),
        "thread.run.cancelling" => sink.on_status(RunStatus::Cancelling),
        "thread.run.requires_action" => {
            warn!("Run requires action; tool approvals are not handled here");
            sink.on_status(RunStatus::RequiresAction);
        }
        "thread.message.delta" => {
            let delta: MessageDelta = serde_json::from_str(&frame.data)?;
            for content in delta.delta.content {
                match content {
                    DeltaContent::Text { text } => {
                        if let Some(value) = text.value {
                            sink.on_text(value);
                        }
                        for annotation in text.annotations {
                            if let Annotation::FilePath { text, file_path } = annotation {
                                let mut file = FileInfo::new(file_path.file_id);
                                if let Some(name) = text.as_deref().and_then(file_name_from_link) {
                                    file = file.with_name(name);
                                }
                                sink.on_file(file);
                            }
                        }
                    }
                    DeltaContent::ImageFile { image_file } => {
                        sink.on_file(FileInfo::new(image_file.file_id).with_mime_type("image/png"));
                    }
                    DeltaContent::Unsupported => {}
                }
            }
        }
        "thread.run.completed" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            sink.on_run_completed(RunStatus::Completed, run.usage);
        }
        "thread.run.cancelled" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            sink.on_run_completed(RunStatus::Cancelled, run.usage);
        }
        "thread.run.expired" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            sink.on_run_completed(RunStatus::Expired, run.usage);
        }
        "thread.run.incomplete" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            let reason = run.incomplete_details.and_then(|details| details.reason);
            sink.on_run_incomplete(reason, run.usage);
        }
        "thread.run.failed" => {
            let run: RunObject = serde_json::from_str(&frame.data)?;
            let message = run
                .last_error
                .as_ref()
                .map_or_else(|| "Run failed".to_string(), LastError::describe);
            sink.on_run_failed(message, run.usage);
        }
        "error" => {
            let message = serde_json::from_str::<ErrorEvent>(&frame.data)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| frame.data.clone());
            return Err(EngineError::Stream(message));
        }
        "done" => return Ok(Flow::Done),
        other => debug!(event = other, "Ignoring run event"),
    }

    Ok(Flow::Continue)
}

// ============================================================================
// Engine Implementation
// ============================================================================

#[async_trait]
impl CompletionEngine for AgentsClient {
    fn name(&self) -> &'static str {
        "Agents"
    }

    async fn create_thread(&self) -> Result<ConversationThread, EngineError> {
        let response = self
            .call(Method::POST, "threads")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let thread: ThreadObject = ensure_success(response).await?.json().await?;
        Ok(thread.into())
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), EngineError> {
        let response = self
            .call(Method::DELETE, &format!("threads/{thread_id}"))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn append_message(
        &self,
        thread_id: &ThreadId,
        role: MessageRole,
        content: &str,
    ) -> Result<(), EngineError> {
        let response = self
            .call(Method::POST, &format!("threads/{thread_id}/messages"))
            .json(&MessageBody { role, content })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn stream_run(
        &self,
        request: &RunRequest,
        sink: &mut RunEventSink,
    ) -> Result<(), EngineError> {
        let body = RunBody {
            assistant_id: request.agent_id.as_str(),
            stream: true,
            config: &request.config,
        };
        let response = self
            .request(Method::POST, &format!("threads/{}/runs", request.thread_id))
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let mut stream = ensure_success(response).await?.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk) = stream.next().await {
            for frame in parser.push(&chunk?) {
                if dispatch(&frame, sink)? == Flow::Done {
                    return Ok(());
                }
            }
        }

        if let Some(frame) = parser.finish() {
            dispatch(&frame, sink)?;
        }
        Ok(())
    }

    async fn cancel_run(&self, thread_id: &ThreadId, run_id: &RunId) -> Result<(), EngineError> {
        let response = self
            .call(Method::POST, &format!("threads/{thread_id}/runs/{run_id}/cancel"))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
