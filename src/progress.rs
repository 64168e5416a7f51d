//! Ordered progress events and the per-run channel that delivers them.
//!
//! Every run writes a sequence of [`ProgressEvent`]s to one
//! [`ProgressChannel`]. Events are timestamped on emission and observed by a
//! single external consumer in exactly the order they were appended. On the
//! wire each record is a newline-delimited `data: {json}` line; malformed
//! records are skipped by the decoder rather than aborting the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Events emitted while a pattern or graph run executes.
///
/// Serialized with `type` as the tag and `data` as the payload, matching the
/// wire format consumed by external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ProgressEvent {
    /// A run has begun.
    Start {
        /// The pattern (or `"graph"`) being executed.
        pattern: String,
    },
    /// Free-form progress description.
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Human-readable description of what is happening.
        message: String,
        /// For backoff waits, the delay in milliseconds.
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },
    /// A single step finished successfully.
    #[serde(rename_all = "camelCase")]
    StepComplete {
        /// Name of the completed step.
        step: String,
        /// Declaration index of the task, for parallel fan-out attribution.
        #[serde(skip_serializing_if = "Option::is_none")]
        task_index: Option<usize>,
        /// The step's result.
        result: Value,
    },
    /// All parallel tasks joined; `results` is in task-declaration order.
    ParallelComplete {
        /// One entry per task, in declaration order.
        results: Vec<Value>,
    },
    /// Both analyses of the complex pattern are available.
    ParallelAnalysisComplete {
        /// The technical analysis text.
        technical: Value,
        /// The business analysis text.
        business: Value,
    },
    /// A condition predicate was evaluated.
    #[serde(rename_all = "camelCase")]
    ConditionEvaluated {
        /// Whether the predicate held.
        condition_met: bool,
        /// The measured length of the evaluated text.
        text_length: usize,
    },
    /// One of two pre-declared branches was executed.
    BranchExecuted {
        /// `"true"` or `"false"`.
        branch: String,
        /// The branch's result.
        result: Value,
    },
    /// The synthesis step of the complex pattern finished.
    SynthesisComplete {
        /// The synthesized conclusion.
        result: Value,
    },
    /// A retried task eventually succeeded.
    RetryComplete {
        /// Total attempts made, including the successful one.
        attempts: u32,
        /// The task's result.
        result: Value,
    },
    /// Incremental partial text from a still-running generation.
    TextChunk {
        /// The text delta.
        chunk: String,
    },
    /// Terminal success event with the pattern-specific payload.
    Complete(Value),
    /// Terminal failure event.
    Error {
        /// The failure message.
        message: String,
        /// For retry runs, how many attempts were made.
        #[serde(skip_serializing_if = "Option::is_none")]
        attempts: Option<u32>,
    },
}

/// A timestamped progress record as it appears on the wire.
///
/// Timestamps are Unix epoch milliseconds, forced strictly monotonically
/// increasing within one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// The event, flattened into `type`/`data` fields.
    #[serde(flatten)]
    pub event: ProgressEvent,
    /// Monotonic Unix epoch milliseconds.
    pub timestamp: u128,
}

/// Literal prefix of each wire record.
pub const WIRE_PREFIX: &str = "data: ";

/// Encode one record as a newline-terminated wire line.
#[must_use]
pub fn encode_record(record: &ProgressRecord) -> String {
    let json = serde_json::to_string(record).unwrap_or_default();
    format!("{WIRE_PREFIX}{json}\n")
}

/// Decode one wire line, returning `None` for malformed records.
///
/// Consumers skip malformed records rather than aborting the stream.
#[must_use]
pub fn decode_record(line: &str) -> Option<ProgressRecord> {
    let json = line.trim_end().strip_prefix(WIRE_PREFIX)?;
    serde_json::from_str(json).ok()
}

/// A single-run, append-only, ordered event sink.
///
/// The handle is cheap to clone; concurrent writers (the parallel fan-out)
/// are serialized internally so records never interleave mid-payload. The
/// receiving half is handed to the consumer at construction.
///
/// # Example
///
/// ```rust
/// use graphflow::{ProgressChannel, ProgressEvent};
///
/// let (channel, mut rx) = ProgressChannel::new();
/// channel.emit(ProgressEvent::Start { pattern: "sequential".to_string() });
/// channel.close();
///
/// let record = rx.try_recv().unwrap();
/// assert!(matches!(record.event, ProgressEvent::Start { .. }));
/// ```
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

#[derive(Debug)]
struct ChannelInner {
    tx: Option<UnboundedSender<ProgressRecord>>,
    last_timestamp: u128,
}

impl ProgressChannel {
    /// Create a channel, returning the writer handle and the consumer's
    /// receiving half.
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiver<ProgressRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                tx: Some(tx),
                last_timestamp: 0,
            })),
        };
        (channel, rx)
    }

    /// Append one event, stamping it with the next monotonic timestamp.
    ///
    /// Synchronous from the writer's perspective: when this returns, the
    /// record has been handed to the channel. Events emitted after
    /// [`close`](Self::close) are dropped.
    pub fn emit(&self, event: ProgressEvent) {
        let mut inner = self.inner.lock().unwrap();
        let Some(tx) = inner.tx.as_ref() else {
            debug!(?event, "progress event dropped after channel close");
            return;
        };
        let timestamp = next_timestamp(inner.last_timestamp);
        let record = ProgressRecord { event, timestamp };
        if tx.send(record).is_err() {
            debug!("progress consumer gone; event discarded");
        }
        inner.last_timestamp = timestamp;
    }

    /// Close the channel. Idempotent; the terminal event must already have
    /// been emitted.
    pub fn close(&self) {
        self.inner.lock().unwrap().tx = None;
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().tx.is_none()
    }
}

fn next_timestamp(last: u128) -> u128 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    now.max(last + 1)
}
