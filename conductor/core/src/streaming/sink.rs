//! Run Event Sink
//!
//! The engine reports a run through this sink. Content events become
//! [`StreamItem`]s on the handoff channel; terminal run events are recorded
//! and collected into a [`RunOutcome`] once the run ends.

use serde::{Deserialize, Serialize};

use super::handoff::{HandoffSender, StreamItem};
use crate::messages::{FileInfo, RunId};

/// Token usage reported for a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u64,
}

impl RunUsage {
    /// Create a usage record
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Run lifecycle status as reported by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to start
    Queued,
    /// Generating
    InProgress,
    /// Blocked on a tool approval or output
    RequiresAction,
    /// Cancellation requested
    Cancelling,
    /// Cancelled
    Cancelled,
    /// Failed
    Failed,
    /// Finished normally
    Completed,
    /// Stopped early (token budget, content filter)
    Incomplete,
    /// Timed out on the engine side
    Expired,
}

impl RunStatus {
    /// Whether the run can no longer change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }
}

/// Terminal metadata of one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Token usage
    pub usage: Option<RunUsage>,
    /// Final status
    pub status: Option<RunStatus>,
    /// Why the run stopped early
    pub incomplete_reason: Option<String>,
}

/// Engine-facing sink for one run
#[derive(Debug)]
pub struct RunEventSink {
    sender: HandoffSender,
    run_id: Option<RunId>,
    usage: Option<RunUsage>,
    status: Option<RunStatus>,
    incomplete_reason: Option<String>,
    forwarded: usize,
}

impl RunEventSink {
    /// Create a sink feeding `sender`
    #[must_use]
    pub fn new(sender: HandoffSender) -> Self {
        Self {
            sender,
            run_id: None,
            usage: None,
            status: None,
            incomplete_reason: None,
            forwarded: 0,
        }
    }

    /// The engine assigned an id to the run
    pub fn on_run_created(&mut self, run_id: RunId) {
        tracing::debug!(run_id = %run_id, "Run created");
        self.run_id = Some(run_id);
        self.status = Some(RunStatus::Queued);
    }

    /// Non-terminal status change
    pub fn on_status(&mut self, status: RunStatus) {
        self.status = Some(status);
    }

    /// Text fragment (empty fragments are skipped)
    pub fn on_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.forward(StreamItem::Text(text));
        }
    }

    /// File artifact
    pub fn on_file(&mut self, file: FileInfo) {
        self.forward(StreamItem::File(file));
    }

    /// Failure worth showing to the user; the run may still continue
    pub fn on_error(&mut self, message: impl Into<String>) {
        self.forward(StreamItem::Error(message.into()));
    }

    /// Run finished with a terminal status
    pub fn on_run_completed(&mut self, status: RunStatus, usage: Option<RunUsage>) {
        self.status = Some(status);
        if usage.is_some() {
            self.usage = usage;
        }
    }

    /// Run stopped early
    pub fn on_run_incomplete(&mut self, reason: Option<String>, usage: Option<RunUsage>) {
        self.status = Some(RunStatus::Incomplete);
        self.incomplete_reason = reason;
        if usage.is_some() {
            self.usage = usage;
        }
    }

    /// Run failed on the engine side
    pub fn on_run_failed(&mut self, message: impl Into<String>, usage: Option<RunUsage>) {
        self.status = Some(RunStatus::Failed);
        if usage.is_some() {
            self.usage = usage;
        }
        self.on_error(message);
    }

    /// Run identifier, once known
    #[must_use]
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Last reported status
    #[must_use]
    pub fn status(&self) -> Option<RunStatus> {
        self.status
    }

    /// Number of items pushed to the consumer
    #[must_use]
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Terminal metadata recorded so far
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            usage: self.usage,
            status: self.status,
            incomplete_reason: self.incomplete_reason.clone(),
        }
    }

    fn forward(&mut self, item: StreamItem) {
        if self.sender.push(item) {
            self.forwarded += 1;
        }
    }
}
