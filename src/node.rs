//! The node data model: kinds, per-kind configuration, and slot bindings.
//!
//! A node is one unit of computation in a [`Graph`](crate::Graph). Its kind
//! is a tagged union with one variant per behavior, so the executor
//! dispatches by pattern matching rather than comparing kind strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// Identifier of a node, unique within its graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// A caller-supplied pure transformation applied by a Transform node.
pub type TransformFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A caller-supplied predicate applied by a Condition node.
pub type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Configuration of a Generate node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    /// The model identifier to invoke.
    pub model: String,
    /// Literal prompt template, used when no `prompt` input slot is wired.
    /// May contain `{{...}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// When set, the injected store is consulted under this key before
    /// invoking, and the result is written back after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

impl GenerateConfig {
    /// Configuration with a model and no literal prompt.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: None,
            cache_key: None,
        }
    }

    /// Set the literal prompt template.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set the store cache key.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Configuration of an Extract node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    /// The model identifier to invoke.
    pub model: String,
    /// The JSON schema the extraction must conform to. An empty schema is a
    /// configuration error at execution time.
    pub schema: Value,
    /// Literal data template, used when no `data` input slot is wired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ExtractConfig {
    /// Configuration with a model and schema.
    pub fn new(model: impl Into<String>, schema: Value) -> Self {
        Self {
            model: model.into(),
            schema,
            data: None,
        }
    }

    /// Set the literal data template.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// How a Merge node combines its wired inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum MergeStrategy {
    /// A map of input slot name to value.
    Object,
    /// Values in slot-declaration order.
    Array,
    /// Values stringified and joined with a separator.
    Concat {
        /// The join separator.
        separator: String,
    },
}

/// The behavior variant of a node.
pub enum NodeKind {
    /// A fixed literal payload supplied at construction.
    Input {
        /// The literal value.
        value: Value,
    },
    /// Text generation through the run's invocable.
    Generate(GenerateConfig),
    /// Structured extraction through the run's invocable.
    Extract(ExtractConfig),
    /// A caller-supplied pure function over the single resolved input.
    Transform(TransformFn),
    /// Combination of every wired input per a configured strategy.
    Merge {
        /// The combination strategy.
        strategy: MergeStrategy,
    },
    /// Predicate evaluation producing `{conditionMet, data}`.
    Condition(PredicateFn),
    /// `{{key}}` substitution over the resolved input.
    Template {
        /// The template string.
        template: String,
    },
    /// A sink forwarding its sole resolved input as the graph's result.
    Output,
}

impl NodeKind {
    /// The kind tag as it appears in serialized graphs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Input { .. } => "input",
            NodeKind::Generate(_) => "generate",
            NodeKind::Extract(_) => "extract",
            NodeKind::Transform(_) => "transform",
            NodeKind::Merge { .. } => "merge",
            NodeKind::Condition(_) => "condition",
            NodeKind::Template { .. } => "template",
            NodeKind::Output => "output",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Input { value } => f.debug_struct("Input").field("value", value).finish(),
            NodeKind::Generate(config) => f.debug_tuple("Generate").field(config).finish(),
            NodeKind::Extract(config) => f.debug_tuple("Extract").field(config).finish(),
            NodeKind::Transform(_) => f.write_str("Transform(..)"),
            NodeKind::Merge { strategy } => {
                f.debug_struct("Merge").field("strategy", strategy).finish()
            }
            NodeKind::Condition(_) => f.write_str("Condition(..)"),
            NodeKind::Template { template } => f
                .debug_struct("Template")
                .field("template", template)
                .finish(),
            NodeKind::Output => f.write_str("Output"),
        }
    }
}

/// An edge endpoint on the receiving side: which node feeds a named slot.
#[derive(Debug, Clone)]
pub struct InputBinding {
    /// The input slot name.
    pub slot: String,
    /// The node supplying this slot.
    pub source: NodeId,
    /// The supplying node's output slot.
    pub source_slot: String,
}

/// An edge endpoint on the sending side: where a named output slot goes.
#[derive(Debug, Clone)]
pub struct OutputBinding {
    /// The output slot name.
    pub slot: String,
    /// The downstream node.
    pub target: NodeId,
    /// The downstream node's input slot.
    pub target_slot: String,
}

/// A single unit of computation in a graph.
///
/// Input bindings are kept in connect order, which defines slot-declaration
/// order for Merge nodes. The cached result is set at most once per run and
/// cleared by [`Graph::reset`](crate::Graph::reset).
#[derive(Debug)]
pub struct Node {
    /// Identity, unique within the owning graph.
    pub id: NodeId,
    /// Optional declared name, matched by the variable resolver.
    pub name: Option<String>,
    /// Optional display label, matched by the variable resolver.
    pub label: Option<String>,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Vec<InputBinding>,
    pub(crate) outputs: Vec<OutputBinding>,
    pub(crate) result: Option<Value>,
}

impl Node {
    /// Create a node with the given id and kind.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            label: None,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            result: None,
        }
    }

    /// An Input node carrying a fixed literal payload.
    pub fn input(id: impl Into<NodeId>, value: Value) -> Self {
        Self::new(id, NodeKind::Input { value })
    }

    /// A Generate node.
    pub fn generate(id: impl Into<NodeId>, config: GenerateConfig) -> Self {
        Self::new(id, NodeKind::Generate(config))
    }

    /// An Extract node.
    pub fn extract(id: impl Into<NodeId>, config: ExtractConfig) -> Self {
        Self::new(id, NodeKind::Extract(config))
    }

    /// A Transform node applying a pure function to its input.
    pub fn transform(
        id: impl Into<NodeId>,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::new(id, NodeKind::Transform(Arc::new(f)))
    }

    /// A Merge node combining all wired inputs.
    pub fn merge(id: impl Into<NodeId>, strategy: MergeStrategy) -> Self {
        Self::new(id, NodeKind::Merge { strategy })
    }

    /// A Condition node evaluating a predicate over its input.
    pub fn condition(
        id: impl Into<NodeId>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(id, NodeKind::Condition(Arc::new(predicate)))
    }

    /// A Template node substituting `{{key}}` placeholders.
    pub fn template(id: impl Into<NodeId>, template: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Template {
                template: template.into(),
            },
        )
    }

    /// An Output sink node.
    pub fn output(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Output)
    }

    /// Set the declared name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The node's behavior variant.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The input slot bindings, in connect order.
    #[must_use]
    pub fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    /// The output slot bindings, in connect order.
    #[must_use]
    pub fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    /// The cached result, if this node has executed.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The node wired into the given input slot, if any.
    #[must_use]
    pub fn input_source(&self, slot: &str) -> Option<&NodeId> {
        self.inputs
            .iter()
            .find(|binding| binding.slot == slot)
            .map(|binding| &binding.source)
    }
}
