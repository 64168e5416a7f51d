//! Sequential chain pattern: each step's output becomes the next step's
//! input.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{fail, generate_step, render_prompt};
use crate::context::ExecutionContext;
use crate::invocable::Invocable;
use crate::progress::ProgressEvent;
use crate::{Error, Result};

/// One step of a sequential chain.
#[derive(Debug, Clone)]
pub struct SequentialStep {
    /// The step name reported in progress events.
    pub name: String,
    /// Prompt template; `{{input}}` is replaced by the previous step's
    /// output (the run input for the first step).
    pub prompt: String,
}

impl SequentialStep {
    /// Create a step.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Runs a list of steps in order, threading each step's output forward and
/// stopping on the first failure.
///
/// The default chain is summarize → extract-keywords → generate-title.
pub struct SequentialPattern {
    invocable: Arc<dyn Invocable>,
    model: String,
    steps: Vec<SequentialStep>,
    streaming: bool,
}

impl SequentialPattern {
    /// Create the pattern with its default step chain.
    pub fn new(invocable: Arc<dyn Invocable>, model: impl Into<String>) -> Self {
        Self {
            invocable,
            model: model.into(),
            steps: default_steps(),
            streaming: false,
        }
    }

    /// Replace the step chain.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<SequentialStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Forward generation deltas as `text-chunk` events.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Run the chain over `input`.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::Start {
            pattern: "sequential".to_string(),
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
        if self.steps.is_empty() {
            return Err(Error::Configuration(
                "sequential pattern requires at least one step".to_string(),
            ));
        }

        let mut current = input.to_string();
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let prompt = render_prompt(&step.prompt, &current);
            let text = generate_step(
                self.invocable.as_ref(),
                ctx,
                &step.name,
                &self.model,
                prompt,
                self.streaming,
            )
            .await?;

            ctx.ensure_active()?;
            ctx.emit(ProgressEvent::StepComplete {
                step: step.name.clone(),
                task_index: None,
                result: Value::String(text.clone()),
            });
            ctx.record_step();
            steps.push(json!({ "step": step.name.clone(), "output": text.clone() }));
            current = text;
        }

        Ok(json!({ "finalOutput": current, "steps": steps }))
    }
}

fn default_steps() -> Vec<SequentialStep> {
    vec![
        SequentialStep::new(
            "summarize",
            "Summarize the following text in two sentences:\n\n{{input}}",
        ),
        SequentialStep::new(
            "extract-keywords",
            "Extract the five most important keywords from this summary:\n\n{{input}}",
        ),
        SequentialStep::new(
            "generate-title",
            "Write a short, compelling title based on these keywords:\n\n{{input}}",
        ),
    ]
}
