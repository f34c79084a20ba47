//! Streaming Infrastructure
//!
//! Everything between a remote run and the response stream handed to the
//! caller.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   StreamItem    ┌──────────────────┐
//! │   StreamProducer   │ ──────────────► │  HandoffReceiver │
//! │  (background task) │  (unbounded,    │   (conductor)    │
//! │                    │   FIFO, depth)  │                  │
//! │  engine.stream_run │                 │ pop_with_timeout │
//! │    └─► RunEventSink│                 │                  │
//! └─────────┬──────────┘                 └────────┬─────────┘
//!           │ RunOutcome (via ProducerHandle)     │
//!           └─────────────────────────────────────┘
//! ```
//!
//! - [`handoff`]: the single-producer/single-consumer queue
//! - [`RunEventSink`]: what the engine reports into during a run
//! - [`StreamProducer`]: the cancellable background task driving one run

pub mod handoff;
mod producer;
mod sink;

pub use handoff::{HandoffError, HandoffReceiver, HandoffSender, StreamItem};
pub use producer::{build_generation_config, ProducerHandle, StreamProducer};
pub use sink::{RunEventSink, RunOutcome, RunStatus, RunUsage};
