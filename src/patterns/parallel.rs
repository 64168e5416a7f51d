//! Parallel fan-out pattern: independent tasks run concurrently and join.

use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{fail, generate_step, render_prompt};
use crate::context::ExecutionContext;
use crate::invocable::Invocable;
use crate::progress::ProgressEvent;
use crate::{Error, Result};

/// One task of a parallel fan-out.
#[derive(Debug, Clone)]
pub struct ParallelTask {
    /// The task name reported in progress events.
    pub name: String,
    /// Prompt template; `{{input}}` is replaced by the run input.
    pub prompt: String,
}

impl ParallelTask {
    /// Create a task.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Launches all configured tasks concurrently, emitting a `step-complete`
/// per task as it finishes (arrival order), then joins and emits one
/// `parallel-complete` whose `results` are in task-declaration order.
///
/// Failure semantics are fail-fast: the first task error resolves the join
/// and the remaining task futures are dropped, so no further invocations are
/// issued for a run that has already failed.
pub struct ParallelPattern {
    invocable: Arc<dyn Invocable>,
    model: String,
    tasks: Vec<ParallelTask>,
}

impl ParallelPattern {
    /// Create the pattern with its default translation tasks.
    pub fn new(invocable: Arc<dyn Invocable>, model: impl Into<String>) -> Self {
        Self {
            invocable,
            model: model.into(),
            tasks: default_tasks(),
        }
    }

    /// Replace the task list.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<ParallelTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Run all tasks over `input`.
    pub async fn run(&self, ctx: &ExecutionContext, input: &str) -> Result<Value> {
        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::Start {
            pattern: "parallel".to_string(),
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
        if self.tasks.is_empty() {
            return Err(Error::Configuration(
                "parallel pattern requires at least one task".to_string(),
            ));
        }

        let futures = self.tasks.iter().enumerate().map(|(index, task)| {
            let invocable = Arc::clone(&self.invocable);
            let ctx = ctx.clone();
            let model = self.model.clone();
            let name = task.name.clone();
            let prompt = render_prompt(&task.prompt, input);
            async move {
                let text =
                    generate_step(invocable.as_ref(), &ctx, &name, &model, prompt, false).await?;
                ctx.ensure_active()?;
                ctx.emit(ProgressEvent::StepComplete {
                    step: name.clone(),
                    task_index: Some(index),
                    result: Value::String(text.clone()),
                });
                ctx.record_step();
                Ok::<Value, Error>(json!({ "task": name, "result": text }))
            }
        });

        // try_join_all keeps declaration order in its output regardless of
        // the order tasks actually finished in.
        let results = try_join_all(futures).await?;

        ctx.ensure_active()?;
        ctx.emit(ProgressEvent::ParallelComplete {
            results: results.clone(),
        });
        Ok(json!({ "results": results }))
    }
}

fn default_tasks() -> Vec<ParallelTask> {
    vec![
        ParallelTask::new(
            "translate-french",
            "Translate the following text to French:\n\n{{input}}",
        ),
        ParallelTask::new(
            "translate-spanish",
            "Translate the following text to Spanish:\n\n{{input}}",
        ),
        ParallelTask::new(
            "translate-german",
            "Translate the following text to German:\n\n{{input}}",
        ),
    ]
}
