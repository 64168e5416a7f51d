//! Variable resolution: `{{...}}` placeholder substitution against recorded
//! node outputs.
//!
//! Resolution is pure and never fails: a placeholder that cannot be resolved
//! is left verbatim so partially-connected graphs remain inspectable.

use serde_json::Value;

use crate::graph::Graph;
use crate::node::Node;

/// Render a value for substitution into a template.
///
/// Scalars are stringified as-is; structured values are JSON-serialized.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        structured => serde_json::to_string(structured).unwrap_or_default(),
    }
}

/// Substitute every `{{key}}` placeholder for which `lookup` returns a
/// value, leaving unresolved placeholders verbatim.
pub(crate) fn substitute_with(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder: keep the tail as-is.
            out.push_str(&rest[start..]);
            return out;
        };
        let raw = &after[..end];
        match lookup(raw.trim()) {
            Some(replacement) => out.push_str(&replacement),
            None => {
                out.push_str("{{");
                out.push_str(raw);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Resolve every placeholder in `template` against the outputs recorded in
/// `graph`, from the point of view of `node`.
///
/// Recognized grammar, in precedence order:
///
/// 1. `{{input}}` — the result of the first upstream node directly wired
///    into `node`.
/// 2. `{{name}}` — a node's id, declared name, or label (matched
///    case-sensitively, then case-insensitively) that has a recorded output.
/// 3. `{{name.property}}` — as (2), indexing one property of a structured
///    output; the reserved property `data` means the whole output.
///
/// Unresolved placeholders are left verbatim; resolution never fails.
#[must_use]
pub fn resolve(template: &str, node: &Node, graph: &Graph) -> String {
    substitute_with(template, |key| substitute(key, node, graph))
}

fn substitute(key: &str, node: &Node, graph: &Graph) -> Option<String> {
    if key == "input" {
        let binding = node.inputs().first()?;
        let value = graph.node(&binding.source)?.result()?;
        return Some(stringify(value));
    }

    let (name, property) = match key.split_once('.') {
        Some((name, property)) => (name, Some(property)),
        None => (key, None),
    };

    let value = lookup_output(name, graph)?;
    match property {
        None => Some(stringify(value)),
        Some("data") => Some(stringify(value)),
        Some(property) => value.get(property).map(stringify),
    }
}

fn lookup_output<'a>(name: &str, graph: &'a Graph) -> Option<&'a Value> {
    let exact = graph
        .nodes()
        .find(|node| node.result().is_some() && matches_name(node, name, false));
    let found = exact.or_else(|| {
        graph
            .nodes()
            .find(|node| node.result().is_some() && matches_name(node, name, true))
    });
    found.and_then(Node::result)
}

fn matches_name(node: &Node, name: &str, ignore_case: bool) -> bool {
    let candidates = [
        Some(node.id.as_str()),
        node.name.as_deref(),
        node.label.as_deref(),
    ];
    candidates.into_iter().flatten().any(|candidate| {
        if ignore_case {
            candidate.eq_ignore_ascii_case(name)
        } else {
            candidate == name
        }
    })
}
