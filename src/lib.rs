//! # graphflow
//!
//! Graph-based async workflow execution for LLM pipelines in Rust.
//!
//! A caller describes a computation as a directed graph of typed nodes —
//! inputs, generations, extractions, transforms, merges, conditions,
//! templates, outputs — and executes it while streaming structured progress
//! events to an observer. Five higher-level orchestration patterns
//! (sequential, parallel, conditional, retry, complex) cover the common
//! shapes without assembling a graph by hand.
//!
//! ## Core Concepts
//!
//! - **[`Invocable`]**: the capability interface behind which generative
//!   providers live
//! - **[`Graph`] / [`Node`]**: the structural model, assembled with
//!   [`Graph::add_node`] and [`Graph::connect`]
//! - **[`Executor`]**: dependency-ordered, memoized graph walking with
//!   explicit cycle detection
//! - **[`ProgressChannel`]**: the ordered event sink through which a run is
//!   observed
//! - **[`ExecutionContext`]**: per-run state carrying the channel, the
//!   cancellation token, and the injected key-value store
//! - **[`run_pattern`]**: the pattern-selection entry point for the five
//!   built-in orchestration patterns
//!
//! ## Example: a pattern run with progress events
//!
//! ```rust
//! use std::sync::Arc;
//! use graphflow::{
//!     ExecutionContext, InvokeRequest, InvokeResponse, LambdaInvocable,
//!     PatternName, ProgressChannel, RunRequest,
//! };
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let invocable = Arc::new(LambdaInvocable::new(|req: InvokeRequest| async move {
//!     Ok(InvokeResponse::text(format!("reply to: {}", req.prompt)))
//! }));
//!
//! let (channel, mut events) = ProgressChannel::new();
//! let ctx = ExecutionContext::new(channel);
//! let request = RunRequest {
//!     pattern: PatternName::Conditional,
//!     model: "demo-model".to_string(),
//!     input: json!("AI is cool"),
//! };
//!
//! let result = graphflow::run_pattern(invocable, &ctx, request).await.unwrap();
//! assert_eq!(result.output["branch"], "false");
//! assert!(events.try_recv().is_ok());
//! # });
//! ```

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod invocable;
pub mod metrics;
pub mod node;
pub mod patterns;
pub mod progress;
pub mod resolver;
pub mod store;

pub use context::ExecutionContext;
pub use error::{Error, Result};
pub use executor::Executor;
pub use graph::{ConnectionSpec, FunctionRegistry, Graph, GraphSpec, NodeSpec};
pub use invocable::{
    Invocable, InvokeRequest, InvokeResponse, LambdaInvocable, Operation, TextStream, TokenUsage,
};
pub use metrics::RunMetrics;
pub use node::{
    ExtractConfig, GenerateConfig, InputBinding, MergeStrategy, Node, NodeId, NodeKind,
    OutputBinding, PredicateFn, TransformFn,
};
pub use patterns::{
    run_pattern, Branch, ComplexPattern, ConditionalPattern, ParallelPattern, ParallelTask,
    PatternName, RetryPattern, RunRequest, SequentialPattern, SequentialStep, WorkflowResult,
};
pub use progress::{
    decode_record, encode_record, ProgressChannel, ProgressEvent, ProgressRecord, WIRE_PREFIX,
};
pub use resolver::{resolve, stringify};
pub use store::{KeyValueStore, MemoryStore};
