//! The capability boundary between the engine and generative providers.
//!
//! An [`Invocable`] is the narrow "given parameters, produce a result or
//! fail" interface behind which text generation, structured extraction, and
//! similar operations live. The engine never sees provider selection,
//! authentication, or rate limiting; it only issues [`InvokeRequest`]s and
//! consumes [`InvokeResponse`]s. Implementations must be safe to call
//! concurrently from multiple runs.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

use crate::{resolver::stringify, ExecutionContext, Result};

/// Token accounting reported by a provider for one invocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: usize,
    /// Tokens produced by the completion.
    pub completion_tokens: usize,
}

/// The generative operation requested from an invocable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Operation {
    /// Free-form text generation.
    Generate,
    /// Structured extraction against a JSON schema.
    Extract {
        /// The schema the output must conform to.
        schema: Value,
    },
}

/// Parameters for a single capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// The operation to perform.
    pub operation: Operation,
    /// The model identifier selected by the caller.
    pub model: String,
    /// The fully resolved prompt or data payload.
    pub prompt: String,
}

impl InvokeRequest {
    /// Build a text-generation request.
    pub fn generate(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            operation: Operation::Generate,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    /// Build a structured-extraction request.
    pub fn extract(model: impl Into<String>, data: impl Into<String>, schema: Value) -> Self {
        Self {
            operation: Operation::Extract { schema },
            model: model.into(),
            prompt: data.into(),
        }
    }
}

/// The outcome of a successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// The produced value: a string for generation, a structured value for
    /// extraction.
    pub output: Value,
    /// Usage metadata, when the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl InvokeResponse {
    /// A plain-text response without usage metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            output: Value::String(text.into()),
            usage: None,
        }
    }

    /// A structured response without usage metadata.
    #[must_use]
    pub fn structured(output: Value) -> Self {
        Self {
            output,
            usage: None,
        }
    }

    /// Attach usage metadata.
    #[must_use]
    pub fn with_usage(mut self, prompt_tokens: usize, completion_tokens: usize) -> Self {
        self.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
        });
        self
    }
}

/// A lazy, finite, non-restartable sequence of text deltas from a
/// still-running generation. The caller drains it; dropping it abandons the
/// generation.
pub type TextStream = BoxStream<'static, Result<String>>;

/// The capability interface implemented by generative collaborators.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Perform one operation, producing a result or failing.
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        request: InvokeRequest,
    ) -> Result<InvokeResponse>;

    /// Streaming variant: the response text as a drained sequence of deltas.
    ///
    /// The default implementation falls back to [`invoke`](Self::invoke) and
    /// yields the whole rendered output as a single delta. Usage metadata is
    /// only reported through the non-streaming path.
    async fn invoke_streaming(
        &self,
        ctx: &ExecutionContext,
        request: InvokeRequest,
    ) -> Result<TextStream> {
        let response = self.invoke(ctx, request).await?;
        let text = stringify(&response.output);
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// Returns a human-readable name for this invocable. Defaults to the
    /// type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An invocable constructed from a closure or function pointer.
///
/// Useful for tests, demos, and callers stubbing out providers.
///
/// # Example
///
/// ```rust
/// use graphflow::{InvokeRequest, InvokeResponse, LambdaInvocable};
///
/// let echo = LambdaInvocable::new(|request: InvokeRequest| async move {
///     Ok(InvokeResponse::text(format!("echo: {}", request.prompt)))
/// });
/// ```
pub struct LambdaInvocable<F> {
    f: F,
}

impl<F, Fut> LambdaInvocable<F>
where
    F: Fn(InvokeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<InvokeResponse>> + Send + 'static,
{
    /// Create a new `LambdaInvocable` from the given closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Invocable for LambdaInvocable<F>
where
    F: Fn(InvokeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<InvokeResponse>> + Send + 'static,
{
    async fn invoke(
        &self,
        _ctx: &ExecutionContext,
        request: InvokeRequest,
    ) -> Result<InvokeResponse> {
        (self.f)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionContext;

    #[tokio::test]
    async fn lambda_invocable_runs_closure() {
        let invocable = LambdaInvocable::new(|request: InvokeRequest| async move {
            Ok(InvokeResponse::text(request.prompt.to_uppercase()).with_usage(3, 5))
        });

        let ctx = ExecutionContext::detached();
        let response = invocable
            .invoke(&ctx, InvokeRequest::generate("test-model", "hello"))
            .await
            .unwrap();

        assert_eq!(response.output, Value::String("HELLO".to_string()));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[tokio::test]
    async fn default_streaming_yields_one_delta() {
        let invocable = LambdaInvocable::new(|_request: InvokeRequest| async move {
            Ok(InvokeResponse::text("whole response"))
        });

        let ctx = ExecutionContext::detached();
        let stream = invocable
            .invoke_streaming(&ctx, InvokeRequest::generate("test-model", "x"))
            .await
            .unwrap();

        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas, vec!["whole response".to_string()]);
    }
}
