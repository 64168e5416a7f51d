//! The five built-in orchestration patterns and the pattern-selection entry
//! point.
//!
//! Each pattern is a standalone procedure over an [`Invocable`]: it takes an
//! input payload and an [`ExecutionContext`], emits `start`, zero or more
//! intermediate events, and exactly one terminal `complete` or `error`
//! event, and returns the pattern-specific payload. Cancellation is the
//! exception to the terminal-event rule: a cancelled run stops emitting
//! entirely and surfaces [`Error::Cancelled`] to the caller instead.

pub mod complex;
pub mod conditional;
pub mod parallel;
pub mod retry;
pub mod sequential;

pub use complex::ComplexPattern;
pub use conditional::{Branch, ConditionalPattern};
pub use parallel::{ParallelPattern, ParallelTask};
pub use retry::RetryPattern;
pub use sequential::{SequentialPattern, SequentialStep};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::invocable::{Invocable, InvokeRequest};
use crate::metrics::RunMetrics;
use crate::progress::ProgressEvent;
use crate::resolver::stringify;
use crate::{Error, Result};

/// Selects one of the five built-in patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternName {
    /// Fixed list of steps, output threaded forward.
    Sequential,
    /// Concurrent fan-out over independent tasks.
    Parallel,
    /// Predicate-selected branch execution.
    Conditional,
    /// Bounded re-attempts with exponential backoff.
    Retry,
    /// Two analyses composed with a synthesis step.
    Complex,
}

impl PatternName {
    /// The kebab-case name used in run requests and `start` events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternName::Sequential => "sequential",
            PatternName::Parallel => "parallel",
            PatternName::Conditional => "conditional",
            PatternName::Retry => "retry",
            PatternName::Complex => "complex",
        }
    }
}

impl fmt::Display for PatternName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(PatternName::Sequential),
            "parallel" => Ok(PatternName::Parallel),
            "conditional" => Ok(PatternName::Conditional),
            "retry" => Ok(PatternName::Retry),
            "complex" => Ok(PatternName::Complex),
            other => Err(Error::Configuration(format!("unknown pattern '{other}'"))),
        }
    }
}

/// A run request as received from an external caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// The pattern to run.
    #[serde(rename = "patternName")]
    pub pattern: PatternName,
    /// The model identifier handed to the invocable.
    pub model: String,
    /// The seed payload.
    pub input: Value,
}

/// The terminal value of a run: the pattern payload plus run metrics.
///
/// Created once per run and immutable after creation. Failures surface as
/// the `Err` side of [`run_pattern`] after the `error` event has been
/// emitted.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    /// Which pattern ran.
    pub pattern: PatternName,
    /// The pattern-specific success payload.
    pub output: Value,
    /// Accumulated run metrics.
    pub metrics: RunMetrics,
}

/// Dispatch a run request to its pattern with default configuration.
///
/// Owns the terminal lifecycle: after the pattern finishes (either way), the
/// progress channel is closed exactly once.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use graphflow::{
///     ExecutionContext, InvokeRequest, InvokeResponse, LambdaInvocable,
///     PatternName, ProgressChannel, RunRequest,
/// };
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let invocable = Arc::new(LambdaInvocable::new(|request: InvokeRequest| async move {
///     Ok(InvokeResponse::text(format!("out: {}", request.prompt)))
/// }));
/// let (channel, _rx) = ProgressChannel::new();
/// let ctx = ExecutionContext::new(channel);
///
/// let request = RunRequest {
///     pattern: PatternName::Sequential,
///     model: "demo-model".to_string(),
///     input: json!("some article text"),
/// };
/// let result = graphflow::run_pattern(invocable, &ctx, request).await.unwrap();
/// assert_eq!(result.pattern, PatternName::Sequential);
/// assert!(result.output["finalOutput"].is_string());
/// # });
/// ```
pub async fn run_pattern(
    invocable: Arc<dyn Invocable>,
    ctx: &ExecutionContext,
    request: RunRequest,
) -> Result<WorkflowResult> {
    let input = stringify(&request.input);
    let outcome = match request.pattern {
        PatternName::Sequential => {
            SequentialPattern::new(invocable, &request.model)
                .run(ctx, &input)
                .await
        }
        PatternName::Parallel => {
            ParallelPattern::new(invocable, &request.model)
                .run(ctx, &input)
                .await
        }
        PatternName::Conditional => {
            ConditionalPattern::new(invocable, &request.model)
                .run(ctx, &input)
                .await
        }
        PatternName::Retry => {
            RetryPattern::new(invocable, &request.model)
                .run(ctx, &input)
                .await
        }
        PatternName::Complex => {
            ComplexPattern::new(invocable, &request.model)
                .run(ctx, &input)
                .await
        }
    };
    ctx.progress().close();

    let output = outcome?;
    Ok(WorkflowResult {
        pattern: request.pattern,
        output,
        metrics: ctx.metrics_snapshot(),
    })
}

/// Issue one generation call for a pattern step, returning the rendered
/// text. With `streaming` set, the deltas are forwarded as `text-chunk`
/// events while they arrive.
pub(crate) async fn generate_step(
    invocable: &dyn Invocable,
    ctx: &ExecutionContext,
    step: &str,
    model: &str,
    prompt: String,
    streaming: bool,
) -> Result<String> {
    ctx.ensure_active()?;
    ctx.record_invocation();
    let request = InvokeRequest::generate(model, prompt);

    if streaming {
        let mut deltas = invocable
            .invoke_streaming(ctx, request)
            .await
            .map_err(|e| e.into_step(step))?;
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            let chunk = delta.map_err(|e| e.into_step(step))?;
            ctx.ensure_active()?;
            ctx.emit(ProgressEvent::TextChunk {
                chunk: chunk.clone(),
            });
            text.push_str(&chunk);
        }
        Ok(text)
    } else {
        let response = invocable
            .invoke(ctx, request)
            .await
            .map_err(|e| e.into_step(step))?;
        if let Some(usage) = response.usage {
            ctx.record_usage(usage);
        }
        Ok(stringify(&response.output))
    }
}

/// Substitute `{{input}}` in a pattern step's prompt template.
pub(crate) fn render_prompt(template: &str, input: &str) -> String {
    crate::resolver::substitute_with(template, |key| {
        (key == "input").then(|| input.to_string())
    })
}

/// Report a failure: record it and emit the terminal `error` event, unless
/// the run was cancelled (cancellation is not a failure and emits nothing).
pub(crate) fn fail(ctx: &ExecutionContext, error: Error) -> Error {
    if !matches!(error, Error::Cancelled) {
        ctx.record_failure(error.to_string());
        ctx.emit(ProgressEvent::Error {
            message: error.to_string(),
            attempts: None,
        });
    }
    error
}
