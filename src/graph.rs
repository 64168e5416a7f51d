//! The owned collection of nodes and their connections.
//!
//! A graph is assembled programmatically (builder-style `add_node` +
//! `connect` calls) or declaratively from a serialized [`GraphSpec`]. Edges
//! are recorded bidirectionally on both endpoints. Transform and Condition
//! nodes carry functions that cannot round-trip through serialization; on
//! import they must be re-supplied through a [`FunctionRegistry`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::node::{
    InputBinding, Node, NodeId, NodeKind, OutputBinding, PredicateFn, TransformFn,
};
use crate::{Error, Result};

/// A directed graph of typed computation nodes.
///
/// # Example
///
/// ```rust
/// use graphflow::{Graph, MergeStrategy, Node};
/// use serde_json::json;
///
/// let mut graph = Graph::new();
/// graph.add_node(Node::input("greeting", json!("hello"))).unwrap();
/// graph.add_node(Node::input("subject", json!("world"))).unwrap();
/// graph
///     .add_node(Node::merge(
///         "sentence",
///         MergeStrategy::Concat { separator: " ".to_string() },
///     ))
///     .unwrap();
/// graph.connect("greeting", "sentence", "default", "a").unwrap();
/// graph.connect("subject", "sentence", "default", "b").unwrap();
/// assert_eq!(graph.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its id.
    ///
    /// Fails with a configuration error if the id is already taken.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            return Err(Error::Configuration(format!(
                "duplicate node id '{id}'"
            )));
        }
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Iterate over nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record an edge from `source`'s output slot to `target`'s input slot.
    ///
    /// The edge is stored on both endpoints. Fails with
    /// [`Error::UnknownNode`] if either node does not belong to this graph.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        output_slot: impl Into<String>,
        input_slot: impl Into<String>,
    ) -> Result<()> {
        let source = source.into();
        let target = target.into();
        if !self.nodes.contains_key(&source) {
            return Err(Error::UnknownNode(source.to_string()));
        }
        if !self.nodes.contains_key(&target) {
            return Err(Error::UnknownNode(target.to_string()));
        }

        let output_slot = output_slot.into();
        let input_slot = input_slot.into();
        if let Some(node) = self.nodes.get_mut(&source) {
            node.outputs.push(OutputBinding {
                slot: output_slot.clone(),
                target: target.clone(),
                target_slot: input_slot.clone(),
            });
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.inputs.push(InputBinding {
                slot: input_slot,
                source,
                source_slot: output_slot,
            });
        }
        Ok(())
    }

    /// [`connect`](Self::connect) with both slots set to `"default"`.
    pub fn connect_default(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Result<()> {
        self.connect(source, target, "default", "default")
    }

    /// Clear every node's cached result so the graph can be re-executed.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.result = None;
        }
    }

    /// The cached result of a node, if it has executed.
    #[must_use]
    pub fn output_of(&self, id: &NodeId) -> Option<&Value> {
        self.nodes.get(id).and_then(Node::result)
    }

    /// Export the graph structure to its serialized form.
    ///
    /// Transform and Condition functions are not representable; their nodes
    /// export with a null config and must be re-supplied on import.
    /// Connections are recorded from the receiving side so each node's input
    /// slot order survives a round trip (Merge nodes depend on it).
    #[must_use]
    pub fn to_spec(&self) -> GraphSpec {
        let mut nodes = Vec::with_capacity(self.order.len());
        let mut connections = Vec::new();
        for node in self.nodes() {
            nodes.push(NodeSpec {
                id: node.id.to_string(),
                kind: node.kind().name().to_string(),
                config: kind_config(node.kind()),
                name: node.name.clone(),
                label: node.label.clone(),
            });
            for binding in node.inputs() {
                connections.push(ConnectionSpec {
                    from: binding.source.to_string(),
                    to: node.id.to_string(),
                    output_slot: binding.source_slot.clone(),
                    input_slot: binding.slot.clone(),
                });
            }
        }
        GraphSpec { nodes, connections }
    }

    /// Build a graph from its serialized form.
    ///
    /// Functions for Transform and Condition nodes are looked up by node id
    /// in `registry`; a missing function is a configuration error.
    pub fn from_spec(spec: GraphSpec, registry: &FunctionRegistry) -> Result<Self> {
        let mut graph = Graph::new();
        for node_spec in spec.nodes {
            let kind = parse_kind(&node_spec, registry)?;
            let mut node = Node::new(node_spec.id.as_str(), kind);
            node.name = node_spec.name;
            node.label = node_spec.label;
            graph.add_node(node)?;
        }
        for connection in spec.connections {
            graph.connect(
                connection.from.as_str(),
                connection.to.as_str(),
                connection.output_slot,
                connection.input_slot,
            )?;
        }
        Ok(graph)
    }
}

fn kind_config(kind: &NodeKind) -> Value {
    match kind {
        NodeKind::Input { value } => serde_json::json!({ "value": value }),
        NodeKind::Generate(config) => serde_json::to_value(config).unwrap_or(Value::Null),
        NodeKind::Extract(config) => serde_json::to_value(config).unwrap_or(Value::Null),
        NodeKind::Merge { strategy } => serde_json::to_value(strategy).unwrap_or(Value::Null),
        NodeKind::Template { template } => serde_json::json!({ "template": template }),
        NodeKind::Transform(_) | NodeKind::Condition(_) | NodeKind::Output => Value::Null,
    }
}

fn parse_kind(spec: &NodeSpec, registry: &FunctionRegistry) -> Result<NodeKind> {
    let kind = match spec.kind.as_str() {
        "input" => NodeKind::Input {
            value: spec.config.get("value").cloned().unwrap_or(Value::Null),
        },
        "generate" => NodeKind::Generate(serde_json::from_value(spec.config.clone())?),
        "extract" => NodeKind::Extract(serde_json::from_value(spec.config.clone())?),
        "transform" => NodeKind::Transform(registry.transform(&spec.id).ok_or_else(|| {
            Error::Configuration(format!(
                "transform function for node '{}' must be re-supplied on import",
                spec.id
            ))
        })?),
        "merge" => NodeKind::Merge {
            strategy: serde_json::from_value(spec.config.clone())?,
        },
        "condition" => NodeKind::Condition(registry.predicate(&spec.id).ok_or_else(|| {
            Error::Configuration(format!(
                "condition predicate for node '{}' must be re-supplied on import",
                spec.id
            ))
        })?),
        "template" => NodeKind::Template {
            template: spec
                .config
                .get("template")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "output" => NodeKind::Output,
        other => {
            return Err(Error::Configuration(format!(
                "unknown node kind '{other}'"
            )))
        }
    };
    Ok(kind)
}

/// The serialized form of a graph: node records plus connection records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// One record per node.
    pub nodes: Vec<NodeSpec>,
    /// One record per edge.
    pub connections: Vec<ConnectionSpec>,
}

/// A serialized node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// The node id.
    pub id: String,
    /// The kind tag (`"input"`, `"generate"`, ...).
    pub kind: String,
    /// Kind-specific configuration.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    /// Optional declared name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A serialized edge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Source output slot.
    #[serde(default = "default_slot")]
    pub output_slot: String,
    /// Target input slot.
    #[serde(default = "default_slot")]
    pub input_slot: String,
}

fn default_slot() -> String {
    "default".to_string()
}

/// Functions re-supplied by the caller when importing a graph whose
/// Transform or Condition nodes cannot carry them through serialization.
#[derive(Default)]
pub struct FunctionRegistry {
    transforms: HashMap<String, TransformFn>,
    predicates: HashMap<String, PredicateFn>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the transform function for the node with the given id.
    pub fn register_transform(
        &mut self,
        node_id: impl Into<String>,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.transforms
            .insert(node_id.into(), std::sync::Arc::new(f));
    }

    /// Register the predicate for the node with the given id.
    pub fn register_predicate(
        &mut self,
        node_id: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) {
        self.predicates
            .insert(node_id.into(), std::sync::Arc::new(predicate));
    }

    fn transform(&self, node_id: &str) -> Option<TransformFn> {
        self.transforms.get(node_id).cloned()
    }

    fn predicate(&self, node_id: &str) -> Option<PredicateFn> {
        self.predicates.get(node_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{GenerateConfig, MergeStrategy};
    use serde_json::json;

    #[test]
    fn connect_rejects_unknown_nodes() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("a", json!(1))).unwrap();

        let err = graph.connect_default("a", "missing").unwrap_err();
        assert!(matches!(err, Error::UnknownNode(_)));
        let err = graph.connect_default("missing", "a").unwrap_err();
        assert!(matches!(err, Error::UnknownNode(_)));
        // The failed connects must not have recorded a dangling edge.
        assert!(graph.node(&"a".into()).unwrap().outputs().is_empty());
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("a", json!(1))).unwrap();
        let err = graph.add_node(Node::output("a")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn connect_records_edge_on_both_endpoints() {
        let mut graph = Graph::new();
        graph.add_node(Node::input("src", json!(1))).unwrap();
        graph.add_node(Node::output("dst")).unwrap();
        graph.connect("src", "dst", "default", "value").unwrap();

        let src = graph.node(&"src".into()).unwrap();
        assert_eq!(src.outputs().len(), 1);
        assert_eq!(src.outputs()[0].target.as_str(), "dst");
        assert_eq!(src.outputs()[0].target_slot, "value");

        let dst = graph.node(&"dst".into()).unwrap();
        assert_eq!(dst.input_source("value").unwrap().as_str(), "src");
    }

    #[test]
    fn reset_clears_cached_results() {
        let mut graph = Graph::new();
        let id = graph.add_node(Node::input("a", json!(1))).unwrap();
        graph.node_mut(&id).unwrap().result = Some(json!(1));
        assert!(graph.output_of(&id).is_some());

        graph.reset();
        assert!(graph.output_of(&id).is_none());
    }

    #[test]
    fn spec_round_trip_preserves_structure() {
        let mut graph = Graph::new();
        graph
            .add_node(Node::input("seed", json!("text")).with_name("Seed"))
            .unwrap();
        graph
            .add_node(Node::generate(
                "gen",
                GenerateConfig::new("test-model").with_prompt("Summarize {{input}}"),
            ))
            .unwrap();
        graph
            .add_node(Node::merge(
                "combined",
                MergeStrategy::Concat {
                    separator: ", ".to_string(),
                },
            ))
            .unwrap();
        graph.add_node(Node::transform("upper", Ok)).unwrap();
        graph.connect("seed", "gen", "default", "prompt").unwrap();
        graph.connect("gen", "combined", "default", "a").unwrap();
        graph.connect("seed", "combined", "default", "b").unwrap();
        graph.connect_default("combined", "upper").unwrap();

        let spec = graph.to_spec();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["nodes"][0]["id"], "seed");
        assert_eq!(json["nodes"][1]["kind"], "generate");
        assert_eq!(json["connections"][0]["outputSlot"], "default");
        assert_eq!(json["connections"][0]["inputSlot"], "prompt");

        let mut registry = FunctionRegistry::new();
        registry.register_transform("upper", Ok);
        let rebuilt = Graph::from_spec(spec, &registry).unwrap();
        assert_eq!(rebuilt.len(), 4);
        let combined = rebuilt.node(&"combined".into()).unwrap();
        assert_eq!(combined.inputs().len(), 2);
        assert_eq!(combined.inputs()[0].slot, "a");
        assert_eq!(combined.inputs()[1].slot, "b");
        assert_eq!(
            rebuilt.node(&"seed".into()).unwrap().name.as_deref(),
            Some("Seed")
        );
    }

    #[test]
    fn import_without_function_is_a_configuration_error() {
        let mut graph = Graph::new();
        graph.add_node(Node::transform("t", Ok)).unwrap();
        let spec = graph.to_spec();

        let err = Graph::from_spec(spec, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("re-supplied"));
    }
}
