//! Dependency-ordered, memoized graph execution.
//!
//! The executor walks a [`Graph`] with an explicit worklist rather than
//! call-stack recursion, so a cyclic or very deep graph fails fast with a
//! descriptive error instead of overflowing the stack. Each node executes at
//! most once per run; a diamond-shaped dependency executes its shared
//! ancestor once and both dependents observe the same cached value.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::graph::Graph;
use crate::invocable::{Invocable, InvokeRequest};
use crate::node::{MergeStrategy, Node, NodeId, NodeKind};
use crate::progress::ProgressEvent;
use crate::resolver::{self, stringify};
use crate::{Error, Result};

/// Walks a graph in dependency order, memoizing node results.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use graphflow::{
///     ExecutionContext, Executor, GenerateConfig, Graph, InvokeRequest,
///     InvokeResponse, LambdaInvocable, Node, NodeId,
/// };
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let invocable = Arc::new(LambdaInvocable::new(|request: InvokeRequest| async move {
///     Ok(InvokeResponse::text(format!("summary of: {}", request.prompt)))
/// }));
///
/// let mut graph = Graph::new();
/// graph.add_node(Node::input("article", json!("a long article"))).unwrap();
/// graph
///     .add_node(Node::generate("summary", GenerateConfig::new("demo-model")))
///     .unwrap();
/// graph.add_node(Node::output("result")).unwrap();
/// graph.connect("article", "summary", "default", "prompt").unwrap();
/// graph.connect_default("summary", "result").unwrap();
///
/// let executor = Executor::new(invocable);
/// let ctx = ExecutionContext::detached();
/// let results = executor.run(&mut graph, &ctx).await.unwrap();
/// assert_eq!(results[&NodeId::from("result")], json!("summary of: a long article"));
/// # });
/// ```
pub struct Executor {
    invocable: Arc<dyn Invocable>,
}

impl Executor {
    /// Create an executor that routes Generate and Extract nodes through
    /// the given invocable.
    pub fn new(invocable: Arc<dyn Invocable>) -> Self {
        Self { invocable }
    }

    /// Execute every node of `graph` in dependency order, returning the map
    /// of all node results.
    ///
    /// Nodes already carrying a cached result are skipped; call
    /// [`Graph::reset`] to force recomputation. The first node failure
    /// aborts the run and propagates. A cycle fails fast with
    /// [`Error::CyclicGraph`].
    pub async fn run(
        &self,
        graph: &mut Graph,
        ctx: &ExecutionContext,
    ) -> Result<BTreeMap<NodeId, Value>> {
        let order = topological_order(graph)?;
        for id in order {
            let already_done = graph.node(&id).is_some_and(|node| node.result().is_some());
            if already_done {
                continue;
            }
            ctx.ensure_active()?;
            let value = execute_node(graph, &id, ctx, self.invocable.as_ref()).await?;
            if let Some(node) = graph.node_mut(&id) {
                node.result = Some(value);
            }
        }

        Ok(graph
            .nodes()
            .map(|node| {
                (
                    node.id.clone(),
                    node.result().cloned().unwrap_or(Value::Null),
                )
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Open,
    Done,
}

/// Order every node after all of its inputs via an iterative depth-first
/// walk with tri-state marks. An `Open` node reached again is on a cycle.
fn topological_order(graph: &Graph) -> Result<Vec<NodeId>> {
    let mut marks: HashMap<&NodeId, Mark> =
        graph.nodes().map(|node| (&node.id, Mark::New)).collect();
    let mut order = Vec::with_capacity(graph.len());

    for root in graph.nodes() {
        if marks[&root.id] != Mark::New {
            continue;
        }
        // Each frame is (node, index of the next input binding to visit).
        let mut stack: Vec<(&NodeId, usize)> = vec![(&root.id, 0)];
        while let Some((id, next_input)) = stack.pop() {
            let node = graph
                .node(id)
                .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
            if next_input == 0 {
                marks.insert(id, Mark::Open);
            }
            match node.inputs().get(next_input) {
                Some(binding) => {
                    stack.push((id, next_input + 1));
                    let dep = &binding.source;
                    match marks.get(dep).copied() {
                        None => return Err(Error::UnknownNode(dep.to_string())),
                        Some(Mark::Open) => {
                            return Err(Error::CyclicGraph {
                                node: dep.to_string(),
                            })
                        }
                        Some(Mark::Done) => {}
                        Some(Mark::New) => stack.push((dep, 0)),
                    }
                }
                None => {
                    marks.insert(id, Mark::Done);
                    order.push(id.clone());
                }
            }
        }
    }
    Ok(order)
}

/// The result already recorded for the node wired into `slot`.
fn resolved_input<'a>(graph: &'a Graph, node: &Node, slot: &str) -> Option<&'a Value> {
    let source = node.input_source(slot)?;
    graph.node(source)?.result()
}

/// The result of the first upstream node wired into `node`.
fn first_input<'a>(graph: &'a Graph, node: &Node) -> Option<&'a Value> {
    let binding = node.inputs().first()?;
    graph.node(&binding.source)?.result()
}

fn missing_input(node: &Node) -> Error {
    Error::Configuration(format!(
        "{} node '{}' has no wired input",
        node.kind().name(),
        node.id
    ))
}

async fn execute_node(
    graph: &Graph,
    id: &NodeId,
    ctx: &ExecutionContext,
    invocable: &dyn Invocable,
) -> Result<Value> {
    let node = graph
        .node(id)
        .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
    debug!(node = %id, kind = node.kind().name(), "executing node");

    match node.kind() {
        NodeKind::Input { value } => Ok(value.clone()),

        NodeKind::Generate(config) => {
            let template = match resolved_input(graph, node, "prompt") {
                Some(value) => stringify(value),
                None => config.prompt.clone().ok_or_else(|| {
                    Error::Configuration(format!("generate node '{id}' has no prompt"))
                })?,
            };
            let prompt = resolver::resolve(&template, node, graph);

            if let Some(key) = &config.cache_key {
                if let Some(hit) = ctx.store().get(key) {
                    debug!(node = %id, key = %key, "store hit, skipping invocation");
                    return Ok(hit);
                }
            }

            let output = invoke(
                ctx,
                invocable,
                node,
                InvokeRequest::generate(&config.model, prompt),
            )
            .await?;
            if let Some(key) = &config.cache_key {
                ctx.store().put(key, output.clone());
            }
            Ok(output)
        }

        NodeKind::Extract(config) => {
            if schema_is_empty(&config.schema) {
                return Err(Error::Configuration(format!(
                    "extract node '{id}' has an empty schema"
                )));
            }
            let template = match resolved_input(graph, node, "data") {
                Some(value) => stringify(value),
                None => config.data.clone().ok_or_else(|| {
                    Error::Configuration(format!("extract node '{id}' has no data"))
                })?,
            };
            let data = resolver::resolve(&template, node, graph);
            invoke(
                ctx,
                invocable,
                node,
                InvokeRequest::extract(&config.model, data, config.schema.clone()),
            )
            .await
        }

        NodeKind::Transform(f) => {
            let input = first_input(graph, node).ok_or_else(|| missing_input(node))?;
            f(input.clone()).map_err(|e| e.into_step(id.as_str()))
        }

        NodeKind::Merge { strategy } => Ok(merge_inputs(graph, node, strategy)),

        NodeKind::Condition(predicate) => {
            let input = first_input(graph, node).ok_or_else(|| missing_input(node))?;
            let condition_met = predicate(input);
            ctx.emit(ProgressEvent::ConditionEvaluated {
                condition_met,
                text_length: stringify(input).chars().count(),
            });
            Ok(serde_json::json!({
                "conditionMet": condition_met,
                "data": input,
            }))
        }

        NodeKind::Template { template } => {
            let input = first_input(graph, node).ok_or_else(|| missing_input(node))?;
            Ok(Value::String(render_template(template, input)))
        }

        NodeKind::Output => {
            let input = first_input(graph, node).ok_or_else(|| missing_input(node))?;
            Ok(input.clone())
        }
    }
}

/// Issue one invocable call for a node, bracketed by progress events.
async fn invoke(
    ctx: &ExecutionContext,
    invocable: &dyn Invocable,
    node: &Node,
    request: InvokeRequest,
) -> Result<Value> {
    ctx.emit(ProgressEvent::Progress {
        message: format!("invoking node '{}'", node.id),
        delay_ms: None,
    });
    ctx.ensure_active()?;
    ctx.record_invocation();

    let response = invocable
        .invoke(ctx, request)
        .await
        .map_err(|e| e.into_step(node.id.as_str()))?;
    if let Some(usage) = response.usage {
        ctx.record_usage(usage);
    }

    ctx.emit(ProgressEvent::Progress {
        message: format!("node '{}' complete", node.id),
        delay_ms: None,
    });
    Ok(response.output)
}

fn schema_is_empty(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn merge_inputs(graph: &Graph, node: &Node, strategy: &MergeStrategy) -> Value {
    let resolved = node.inputs().iter().map(|binding| {
        let value = graph
            .node(&binding.source)
            .and_then(Node::result)
            .cloned()
            .unwrap_or(Value::Null);
        (binding.slot.clone(), value)
    });

    match strategy {
        MergeStrategy::Object => Value::Object(resolved.collect()),
        MergeStrategy::Array => Value::Array(resolved.map(|(_, value)| value).collect()),
        MergeStrategy::Concat { separator } => {
            let joined = resolved
                .map(|(_, value)| stringify(&value))
                .collect::<Vec<_>>()
                .join(separator);
            Value::String(joined)
        }
    }
}

/// Template-node substitution: property lookup for structured inputs,
/// `{{input}}` for scalars.
fn render_template(template: &str, input: &Value) -> String {
    resolver::substitute_with(template, |key| match input {
        Value::Object(map) => map.get(key).map(stringify),
        scalar => (key == "input").then(|| stringify(scalar)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocable::{InvokeResponse, LambdaInvocable};
    use crate::node::{ExtractConfig, GenerateConfig};
    use crate::progress::ProgressChannel;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_invocable() -> Arc<dyn Invocable> {
        Arc::new(LambdaInvocable::new(|request: InvokeRequest| async move {
            Ok(InvokeResponse::text(format!("gen({})", request.prompt)).with_usage(2, 4))
        }))
    }

    #[tokio::test]
    async fn diamond_executes_shared_ancestor_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        graph.add_node(Node::input("seed", json!(3))).unwrap();
        let counter = Arc::clone(&calls);
        graph
            .add_node(Node::transform("shared", move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(v.as_i64().unwrap_or(0) * 2))
            }))
            .unwrap();
        graph
            .add_node(Node::transform("left", |v| {
                Ok(json!(v.as_i64().unwrap_or(0) + 1))
            }))
            .unwrap();
        graph
            .add_node(Node::transform("right", |v| {
                Ok(json!(v.as_i64().unwrap_or(0) + 10))
            }))
            .unwrap();
        graph
            .add_node(Node::merge("join", MergeStrategy::Array))
            .unwrap();
        graph.connect_default("seed", "shared").unwrap();
        graph.connect_default("shared", "left").unwrap();
        graph.connect_default("shared", "right").unwrap();
        graph.connect("left", "join", "default", "a").unwrap();
        graph.connect("right", "join", "default", "b").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let results = executor.run(&mut graph, &ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "shared ancestor ran once");
        assert_eq!(results[&NodeId::from("join")], json!([7, 16]));
        // Both dependents observed the identical cached value.
        assert_eq!(results[&NodeId::from("shared")], json!(6));
    }

    #[tokio::test]
    async fn cycle_is_a_descriptive_error() {
        let mut graph = Graph::new();
        graph.add_node(Node::transform("a", Ok)).unwrap();
        graph.add_node(Node::transform("b", Ok)).unwrap();
        graph.add_node(Node::transform("c", Ok)).unwrap();
        graph.connect_default("a", "b").unwrap();
        graph.connect_default("b", "c").unwrap();
        graph.connect_default("c", "a").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let err = executor.run(&mut graph, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::CyclicGraph { .. }));
        assert!(err.to_string().contains("Cycle detected"));
    }

    #[tokio::test]
    async fn self_loop_is_detected() {
        let mut graph = Graph::new();
        graph.add_node(Node::transform("a", Ok)).unwrap();
        graph.connect_default("a", "a").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let err = executor.run(&mut graph, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::CyclicGraph { .. }));
    }

    #[tokio::test]
    async fn generate_resolves_prompt_slot_and_placeholders() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::input("topic", json!("graph engines")))
            .unwrap();
        graph
            .add_node(Node::generate(
                "first",
                GenerateConfig::new("test-model").with_prompt("Describe {{topic}}"),
            ))
            .unwrap();
        graph
            .add_node(Node::generate("second", GenerateConfig::new("test-model")))
            .unwrap();
        graph.connect_default("topic", "first").unwrap();
        graph.connect("first", "second", "default", "prompt").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let results = executor.run(&mut graph, &ctx).await.unwrap();

        assert_eq!(results[&NodeId::from("first")], json!("gen(Describe graph engines)"));
        assert_eq!(
            results[&NodeId::from("second")],
            json!("gen(gen(Describe graph engines))")
        );
        let metrics = ctx.metrics_snapshot();
        assert_eq!(metrics.invocations, 2);
        assert_eq!(metrics.total_tokens, 12);
    }

    #[tokio::test]
    async fn generate_cache_key_skips_second_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let invocable: Arc<dyn Invocable> =
            Arc::new(LambdaInvocable::new(move |_request: InvokeRequest| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(InvokeResponse::text("cached text"))
                }
            }));

        let store = Arc::new(MemoryStore::new());
        let build = || {
            let mut graph = Graph::new();
            graph
                .add_node(Node::generate(
                    "gen",
                    GenerateConfig::new("test-model")
                        .with_prompt("same prompt")
                        .with_cache_key("gen-key"),
                ))
                .unwrap();
            graph
        };

        let executor = Executor::new(invocable);
        for _ in 0..2 {
            let mut graph = build();
            let ctx = ExecutionContext::detached().with_store(store.clone());
            let results = executor.run(&mut graph, &ctx).await.unwrap();
            assert_eq!(results[&NodeId::from("gen")], json!("cached text"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second run hit the store");
    }

    #[tokio::test]
    async fn extract_requires_a_schema() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::extract(
                "ex",
                ExtractConfig::new("test-model", json!({})).with_data("payload"),
            ))
            .unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let err = executor.run(&mut graph, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("schema"));
    }

    #[tokio::test]
    async fn merge_strategies() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("x", json!("one"))).unwrap();
        graph.add_node(Node::input("y", json!(2))).unwrap();
        graph
            .add_node(Node::merge("obj", MergeStrategy::Object))
            .unwrap();
        graph
            .add_node(Node::merge(
                "cat",
                MergeStrategy::Concat {
                    separator: " | ".to_string(),
                },
            ))
            .unwrap();
        graph.connect("x", "obj", "default", "first").unwrap();
        graph.connect("y", "obj", "default", "second").unwrap();
        graph.connect("x", "cat", "default", "first").unwrap();
        graph.connect("y", "cat", "default", "second").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let results = executor.run(&mut graph, &ctx).await.unwrap();
        assert_eq!(results[&NodeId::from("obj")], json!({"first": "one", "second": 2}));
        assert_eq!(results[&NodeId::from("cat")], json!("one | 2"));
    }

    #[tokio::test]
    async fn condition_node_reports_and_wraps() {
        let (channel, mut rx) = ProgressChannel::new();
        let mut graph = Graph::new();
        graph
            .add_node(Node::input("text", json!("short")))
            .unwrap();
        graph
            .add_node(Node::condition("check", |v| {
                v.as_str().map(str::len).unwrap_or(0) > 3
            }))
            .unwrap();
        graph.connect_default("text", "check").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::new(channel);
        let results = executor.run(&mut graph, &ctx).await.unwrap();
        assert_eq!(
            results[&NodeId::from("check")],
            json!({"conditionMet": true, "data": "short"})
        );

        let mut saw_condition_event = false;
        while let Ok(record) = rx.try_recv() {
            if let ProgressEvent::ConditionEvaluated {
                condition_met,
                text_length,
            } = record.event
            {
                assert!(condition_met);
                assert_eq!(text_length, 5);
                saw_condition_event = true;
            }
        }
        assert!(saw_condition_event);
    }

    #[tokio::test]
    async fn template_node_substitutes_properties_and_scalars() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::input(
                "person",
                json!({"name": "Ada", "field": "computing"}),
            ))
            .unwrap();
        graph
            .add_node(Node::template("card", "{{name}} works in {{field}} ({{missing}})"))
            .unwrap();
        graph.add_node(Node::input("word", json!("hello"))).unwrap();
        graph
            .add_node(Node::template("echo", "say {{input}}"))
            .unwrap();
        graph.connect_default("person", "card").unwrap();
        graph.connect_default("word", "echo").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let results = executor.run(&mut graph, &ctx).await.unwrap();
        assert_eq!(
            results[&NodeId::from("card")],
            json!("Ada works in computing ({{missing}})")
        );
        assert_eq!(results[&NodeId::from("echo")], json!("say hello"));
    }

    #[tokio::test]
    async fn failure_aborts_the_run() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("seed", json!(1))).unwrap();
        graph
            .add_node(Node::transform("bad", |_| Err("deliberate".into())))
            .unwrap();
        graph.add_node(Node::transform("after", Ok)).unwrap();
        graph.connect_default("seed", "bad").unwrap();
        graph.connect_default("bad", "after").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        let err = executor.run(&mut graph, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Step { .. }));
        assert!(graph.output_of(&"after".into()).is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("seed", json!(1))).unwrap();
        let ctx = ExecutionContext::detached();
        ctx.cancellation().cancel();

        let executor = Executor::new(echo_invocable());
        let err = executor.run(&mut graph, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn reset_allows_recomputation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut graph = Graph::new();
        graph
            .add_node(Node::input("seed", json!(5)))
            .unwrap();
        graph
            .add_node(Node::transform("double", move |v| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(v.as_i64().unwrap_or(0) * 2))
            }))
            .unwrap();
        graph.connect_default("seed", "double").unwrap();

        let executor = Executor::new(echo_invocable());
        let ctx = ExecutionContext::detached();
        executor.run(&mut graph, &ctx).await.unwrap();
        // A second pass over the same graph is fully memoized.
        executor.run(&mut graph, &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        graph.reset();
        executor.run(&mut graph, &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
