//! Composed pattern: two analyses followed by a synthesis step.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{fail, generate_step};
use crate::context::ExecutionContext;
use crate::invocable::Invocable;
use crate::progress::ProgressEvent;
use crate::Result;

/// Runs a technical analysis, then a business analysis, then a synthesis
/// step that combines both texts into one conclusion.
///
/// The analyses run back to back; the `parallel-analysis-complete` event
/// fires only once both are available, followed by `synthesis-complete` and
/// the terminal `complete`.
pub struct ComplexPattern {
    invocable: Arc<dyn Invocable>,
    model: String,
    streaming: bool,
}

impl ComplexPattern {
    /// Create the pattern.
    pub fn new(invocable: Arc<dyn Invocable>, model: impl Into<String>) -> Self {
        Self {
            invocable,
            model: model.into(),
            streaming: false,
        }
    }

    /// Forward synthesis deltas as `text-chunk` events.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Run the composition over `input`.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::Start {
            pattern: "complex".to_string(),
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
        let technical = self
            .analysis(
                ctx,
                "technical-analysis",
                format!(
                    "Provide a technical analysis of the following topic, \
                     covering feasibility and architecture:\n\n{input}"
                ),
            )
            .await?;
        let business = self
            .analysis(
                ctx,
                "business-analysis",
                format!(
                    "Provide a business analysis of the following topic, \
                     covering market impact and risk:\n\n{input}"
                ),
            )
            .await?;

        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::ParallelAnalysisComplete {
            technical: Value::String(technical.clone()),
            business: Value::String(business.clone()),
        });

        let synthesis_prompt = format!(
            "Combine the two analyses below into one balanced conclusion.\n\n\
             Technical analysis:\n{technical}\n\nBusiness analysis:\n{business}"
        );
        let conclusion = generate_step(
            self.invocable.as_ref(),
            ctx,
            "synthesis",
            &self.model,
            synthesis_prompt,
            self.streaming,
        )
        .await?;

        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::SynthesisComplete {
            result: Value::String(conclusion.clone()),
        });
        ctx.record_step();

        Ok(json!({
            "technical": technical,
            "business": business,
            "conclusion": conclusion,
        }))
    }

    async fn analysis(&self, ctx: &ExecutionContext, step: &str, prompt: String) -> Result<String> {
        let text = generate_step(
            self.invocable.as_ref(),
            ctx,
            step,
            &self.model,
            prompt,
            false,
        )
        .await?;
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::StepComplete {
            step: step.to_string(),
            task_index: None,
            result: Value::String(text.clone()),
        });
        ctx.record_step();
        Ok(text)
    }
}
