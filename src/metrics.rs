//! Per-run accounting of invocations, token usage, and failures.

use serde::{Deserialize, Serialize};

/// Aggregated metrics for one workflow run.
///
/// Returned to the caller inside a
/// [`WorkflowResult`](crate::patterns::WorkflowResult).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Total prompt tokens consumed across all invocations.
    pub prompt_tokens: usize,
    /// Total completion tokens generated across all invocations.
    pub completion_tokens: usize,
    /// Total tokens (prompt + completion).
    pub total_tokens: usize,
    /// Number of invocable calls initiated.
    pub invocations: usize,
    /// Number of pattern steps completed successfully.
    pub steps_completed: usize,
    /// Collected failure messages.
    pub failures: Vec<String>,
}

impl RunMetrics {
    /// Record both prompt and completion tokens for one invocation.
    pub fn add_usage(&mut self, prompt: usize, completion: usize) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += prompt + completion;
    }

    /// Increment the initiated-invocation counter.
    pub fn record_invocation(&mut self) {
        self.invocations += 1;
    }

    /// Increment the steps completed counter.
    pub fn record_step(&mut self) {
        self.steps_completed += 1;
    }

    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
