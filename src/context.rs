//! Per-run execution context shared by the executor and patterns.
//!
//! The context carries the run's progress channel, its cancellation signal,
//! the injected key-value store, and the metrics accumulator. It is cheap to
//! clone and safe to share across the parallel fan-out.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::invocable::TokenUsage;
use crate::metrics::RunMetrics;
use crate::progress::{ProgressChannel, ProgressEvent};
use crate::store::{KeyValueStore, MemoryStore};
use crate::{Error, Result};

/// Ephemeral per-run state passed into every node and pattern step.
///
/// Created at run start and discarded at run end; never persisted.
///
/// # Example
///
/// ```rust
/// use graphflow::{ExecutionContext, ProgressChannel, ProgressEvent};
///
/// let (channel, mut rx) = ProgressChannel::new();
/// let ctx = ExecutionContext::new(channel);
/// ctx.emit(ProgressEvent::Progress {
///     message: "warming up".to_string(),
///     delay_ms: None,
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct ExecutionContext {
    progress: ProgressChannel,
    cancel: CancellationToken,
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<Mutex<RunMetrics>>,
}

impl ExecutionContext {
    /// Create a context writing to the given progress channel, with a fresh
    /// cancellation token and an in-memory store.
    #[must_use]
    pub fn new(progress: ProgressChannel) -> Self {
        Self {
            progress,
            cancel: CancellationToken::new(),
            store: Arc::new(MemoryStore::new()),
            metrics: Arc::new(Mutex::new(RunMetrics::default())),
        }
    }

    /// Create a context with no observer; emitted events are discarded.
    ///
    /// Useful for tests and for graph runs that only need the result map.
    #[must_use]
    pub fn detached() -> Self {
        let (channel, _rx) = ProgressChannel::new();
        Self::new(channel)
    }

    /// Use a caller-provided cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a caller-provided key-value store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    /// The run's progress channel.
    #[must_use]
    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The injected key-value store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] if cancellation has been requested.
    ///
    /// Checked before every invocable call and every event emission so a
    /// cancelled run stops scheduling work without reporting a failure.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emit a progress event, unless the run has been cancelled.
    pub fn emit(&self, event: ProgressEvent) {
        if self.is_cancelled() {
            return;
        }
        self.progress.emit(event);
    }

    /// Record token usage reported by an invocable.
    pub fn record_usage(&self, usage: TokenUsage) {
        let mut m = self.metrics.lock().unwrap();
        m.add_usage(usage.prompt_tokens, usage.completion_tokens);
    }

    /// Record an initiated invocation.
    pub fn record_invocation(&self) {
        self.metrics.lock().unwrap().record_invocation();
    }

    /// Record a completed step.
    pub fn record_step(&self) {
        self.metrics.lock().unwrap().record_step();
    }

    /// Record a failure message.
    pub fn record_failure(&self, error: impl Into<String>) {
        self.metrics.lock().unwrap().record_failure(error.into());
    }

    /// Get a snapshot of the current metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> RunMetrics {
        self.metrics.lock().unwrap().clone()
    }
}
