//! Conditional branch pattern: a predicate selects one of two pre-declared
//! branches.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{fail, generate_step, render_prompt};
use crate::context::ExecutionContext;
use crate::invocable::Invocable;
use crate::progress::ProgressEvent;
use crate::Result;

/// One branch of a conditional pattern.
#[derive(Debug, Clone)]
pub struct Branch {
    /// The branch name reported in progress events.
    pub name: String,
    /// Prompt template; `{{input}}` is replaced by the run input.
    pub prompt: String,
}

impl Branch {
    /// Create a branch.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Evaluates a length predicate over the input and executes exactly one of
/// two branches.
///
/// The default predicate is "longer than 100 characters"; long input is
/// summarized, short input is expanded.
pub struct ConditionalPattern {
    invocable: Arc<dyn Invocable>,
    model: String,
    threshold: usize,
    when_true: Branch,
    when_false: Branch,
}

impl ConditionalPattern {
    /// Create the pattern with its default threshold and branches.
    pub fn new(invocable: Arc<dyn Invocable>, model: impl Into<String>) -> Self {
        Self {
            invocable,
            model: model.into(),
            threshold: 100,
            when_true: Branch::new(
                "summarize",
                "Summarize the following long text concisely:\n\n{{input}}",
            ),
            when_false: Branch::new(
                "expand",
                "Expand the following short text with supporting detail:\n\n{{input}}",
            ),
        }
    }

    /// Replace the length threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Replace both branches.
    #[must_use]
    pub fn with_branches(mut self, when_true: Branch, when_false: Branch) -> Self {
        self.when_true = when_true;
        self.when_false = when_false;
        self
    }

    /// Run the pattern over `input`.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::Start {
            pattern: "conditional".to_string(),
        });
        match self.execute(ctx, input).await {
            Ok(payload) => {
                ctx.ensure_active()?;
                ctx.emit(ProgressEvent::Complete(payload.clone()));
                Ok(payload)
            }
            Err(error) => Err(fail(ctx, error)),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        let text_length = input.chars().count();
        let condition_met = text_length > self.threshold;
        ctx.emit(ProgressEvent::ConditionEvaluated {
            condition_met,
            text_length,
        });

        let branch = if condition_met {
            &self.when_true
        } else {
            &self.when_false
        };
        let tag = if condition_met { "true" } else { "false" };

        let prompt = render_prompt(&branch.prompt, input);
        let text = generate_step(
            self.invocable.as_ref(),
            ctx,
            &branch.name,
            &self.model,
            prompt,
            false,
        )
        .await?;

        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::BranchExecuted {
            branch: tag.to_string(),
            result: Value::String(text.clone()),
        });
        ctx.record_step();

        Ok(json!({ "branch": tag, "step": branch.name.clone(), "result": text }))
    }
}
