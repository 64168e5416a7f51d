//! Bounded retry pattern with exponential backoff.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::{generate_step, render_prompt};
use crate::context::ExecutionContext;
use crate::invocable::Invocable;
use crate::progress::ProgressEvent;
use crate::{Error, Result};

/// Attempts a single task up to `max_retries + 1` times, waiting
/// `2^attempt` seconds between failures (1s, 2s, 4s, ...).
///
/// Success emits `retry-complete` with the attempt count; exhaustion emits
/// `error` carrying the last failure and the attempt count.
pub struct RetryPattern {
    invocable: Arc<dyn Invocable>,
    model: String,
    task_name: String,
    prompt: String,
    max_retries: u32,
}

impl RetryPattern {
    /// Create the pattern with its default task and three retries.
    pub fn new(invocable: Arc<dyn Invocable>, model: impl Into<String>) -> Self {
        Self {
            invocable,
            model: model.into(),
            task_name: "retry-task".to_string(),
            prompt: "Process the following input:\n\n{{input}}".to_string(),
            max_retries: 3,
        }
    }

    /// Replace the task name and prompt template.
    #[must_use]
    pub fn with_task(mut self, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.task_name = name.into();
        self.prompt = prompt.into();
        self
    }

    /// Replace the retry budget (`max_retries + 1` total attempts).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Run the task over `input`, retrying on failure.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::Start {
            pattern: "retry".to_string(),
        });
        match self.execute(ctx, input).await {
            Ok(payload) => {
                ctx.ensure_active()?;
                ctx.emit(ProgressEvent::Complete(payload.clone()));
                Ok(payload)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(error) => {
                ctx.record_failure(error.to_string());
                ctx.emit(ProgressEvent::Error {
                    message: error.to_string(),
                    attempts: Some(self.max_retries + 1),
                });
                Err(error)
            }
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        let prompt = render_prompt(&self.prompt, input);
        let mut last_error = Error::Configuration("retry pattern made no attempts".to_string());

        for attempt in 0..=self.max_retries {
            ctx.ensure_active()?;
            match generate_step(
                self.invocable.as_ref(),
                ctx,
                &self.task_name,
                &self.model,
                prompt.clone(),
                false,
            )
            .await
            {
                Ok(text) => {
                    let attempts = attempt + 1;
                    ctx.ensure_active()?;
                    ctx.emit(ProgressEvent::RetryComplete {
                        attempts,
                        result: Value::String(text.clone()),
                    });
                    ctx.record_step();
                    return Ok(json!({ "attempts": attempts, "result": text }));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!(
                        task = %self.task_name,
                        attempt = attempt + 1,
                        error = %error,
                        "attempt failed"
                    );
                    if attempt == self.max_retries {
                        last_error = error;
                        break;
                    }
                    let delay = Duration::from_secs(1u64 << attempt);
                    ctx.ensure_active()?;
                    ctx.emit(ProgressEvent::Progress {
                        message: format!(
                            "attempt {} failed; retrying in {}s",
                            attempt + 1,
                            delay.as_secs()
                        ),
                        delay_ms: Some(delay.as_millis() as u64),
                    });
                    sleep(delay).await;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocable::{InvokeRequest, InvokeResponse, LambdaInvocable};
    use crate::progress::{ProgressChannel, ProgressRecord};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<ProgressRecord>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(record) = rx.try_recv() {
            events.push(record.event);
        }
        events
    }

    /// An invocable that fails its first `failures` calls, then succeeds.
    fn flaky_invocable(failures: u32) -> Arc<dyn Invocable> {
        let calls = Arc::new(AtomicU32::new(0));
        Arc::new(LambdaInvocable::new(move |_request: InvokeRequest| {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < failures {
                    Err(Error::from("transient outage"))
                } else {
                    Ok(InvokeResponse::text("finally worked"))
                }
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn reports_attempt_count_and_backoff_sequence() {
        let (channel, mut rx) = ProgressChannel::new();
        let ctx = ExecutionContext::new(channel);
        let pattern = RetryPattern::new(flaky_invocable(2), "test-model").with_max_retries(3);

        let payload = pattern.run(&ctx, "payload").await.unwrap();
        assert_eq!(payload["attempts"], 3);
        assert_eq!(payload["result"], "finally worked");

        let events = drain(&mut rx);
        let waits: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { delay_ms, .. } => *delay_ms,
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![1_000, 2_000], "backoff doubles per attempt");

        let retry_complete = events.iter().find_map(|e| match e {
            ProgressEvent::RetryComplete { attempts, .. } => Some(*attempts),
            _ => None,
        });
        assert_eq!(retry_complete, Some(3));
        assert!(matches!(events.last(), Some(ProgressEvent::Complete(_))));
    }

    #[tokio::test]
    async fn immediate_success_needs_no_backoff() {
        let (channel, mut rx) = ProgressChannel::new();
        let ctx = ExecutionContext::new(channel);
        let pattern = RetryPattern::new(flaky_invocable(0), "test-model");

        let payload = pattern.run(&ctx, "payload").await.unwrap();
        assert_eq!(payload["attempts"], 1);

        let events = drain(&mut rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Progress { delay_ms: Some(_), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error_and_attempt_count() {
        let (channel, mut rx) = ProgressChannel::new();
        let ctx = ExecutionContext::new(channel);
        let pattern = RetryPattern::new(flaky_invocable(10), "test-model").with_max_retries(2);

        let err = pattern.run(&ctx, "payload").await.unwrap_err();
        assert!(err.to_string().contains("transient outage"));

        let events = drain(&mut rx);
        let error_attempts = events.iter().find_map(|e| match e {
            ProgressEvent::Error { attempts, .. } => Some(*attempts),
            _ => None,
        });
        assert_eq!(error_attempts, Some(Some(3)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Complete(_))));
        // Two waits happened before the final failed attempt.
        let waits: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { delay_ms, .. } => *delay_ms,
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![1_000, 2_000]);
    }
}
