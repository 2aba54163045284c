//! Resource dependency graph
//!
//! Nodes declare their inputs as trees of literals and references to other
//! nodes' outputs. References are edges; `depends_on` adds ordering edges
//! for side effects with no data flow (e.g. "wait for the instance").
//!
//! Cycles are rejected when the closing declaration is made, so a graph that
//! exists is always acyclic. Forward references to nodes that have not been
//! declared yet are allowed; [`engine::Evaluator`] rejects any still dangling
//! when evaluation starts.

pub mod engine;
pub mod state;

pub use engine::{EvaluationReport, Evaluator, NodeReport, Operation};
pub use state::{ResourceState, StackState};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Lifecycle state of a node during evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Waiting for dependencies
    Pending,
    /// Inputs are being materialized from dependency outputs
    Resolving,
    /// A lifecycle operation is in flight
    Applying,
    /// Outputs are available to dependents
    Ready,
    /// The node or one of its dependencies failed
    Failed,
    /// Evaluation stopped before the node started
    Cancelled,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => write!(f, "Pending"),
            NodeState::Resolving => write!(f, "Resolving"),
            NodeState::Applying => write!(f, "Applying"),
            NodeState::Ready => write!(f, "Ready"),
            NodeState::Failed => write!(f, "Failed"),
            NodeState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A declared input: a literal, a reference, or a tree of them
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    /// A value known at declaration time
    Literal(Value),
    /// A field of another node's outputs, e.g. `identity.publicKey`
    Output {
        /// Node whose outputs are read
        node: String,
        /// Field path into the outputs
        path: Vec<String>,
    },
    /// Pieces rendered as strings and joined, e.g. `${bootstrap.host}:8001`
    Concat(Vec<Input>),
    /// An object whose fields may contain references
    Object(BTreeMap<String, Input>),
    /// A list whose items may contain references
    List(Vec<Input>),
}

impl Input {
    /// Literal input
    pub fn literal(value: impl Into<Value>) -> Self {
        Input::Literal(value.into())
    }

    /// Reference to `node`'s output at a dotted path (`a.b.0`)
    pub fn output(node: impl Into<String>, path: &str) -> Self {
        Input::Output {
            node: node.into(),
            path: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Object from `(field, input)` pairs
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Input)>) -> Self {
        Input::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Input::Literal(_) => {}
            Input::Output { node, .. } => {
                out.insert(node.clone());
            }
            Input::Concat(items) | Input::List(items) => {
                items.iter().for_each(|i| i.collect_references(out));
            }
            Input::Object(fields) => fields.values().for_each(|i| i.collect_references(out)),
        }
    }

    /// Nodes this input reads from
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    /// Materialize the input, reading references through `lookup`
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Input::Literal(value) => Ok(value.clone()),
            Input::Output { node, path } => {
                let outputs = lookup(node).ok_or_else(|| {
                    Error::validation(format!("outputs of {node} are not available"))
                })?;
                select(&outputs, path).cloned().ok_or_else(|| {
                    Error::validation_for(node, format!("no output at {}", path.join(".")))
                })
            }
            Input::Concat(items) => {
                let mut out = String::new();
                for item in items {
                    match item.resolve(lookup)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Input::Object(fields) => fields
                .iter()
                .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), v.resolve(lookup)?)) })
                .collect::<Result<serde_json::Map<_, _>>>()
                .map(Value::Object),
            Input::List(items) => items
                .iter()
                .map(|i| i.resolve(lookup))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

fn select<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// A declared resource
#[derive(Clone, Debug)]
pub struct Node {
    id: String,
    type_token: String,
    inputs: Input,
    depends_on: BTreeSet<String>,
    dependencies: BTreeSet<String>,
}

impl Node {
    /// Node id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resource type token
    pub fn type_token(&self) -> &str {
        &self.type_token
    }

    /// Declared inputs
    pub fn inputs(&self) -> &Input {
        &self.inputs
    }

    /// Explicit ordering edges
    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Every node this one waits for: references plus explicit edges
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }
}

/// An acyclic set of declared resources
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
}

impl Graph {
    /// An empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node
    ///
    /// Fails with a cycle error naming the path when the node would depend
    /// on itself, directly or through already declared nodes.
    pub fn declare<I, S>(
        &mut self,
        id: impl Into<String>,
        type_token: impl Into<String>,
        inputs: Input,
        depends_on: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::validation("node id must not be empty"));
        }
        if self.nodes.contains_key(&id) {
            return Err(Error::validation_for(&id, "node is already declared"));
        }

        let depends_on: BTreeSet<String> = depends_on.into_iter().map(Into::into).collect();
        let mut dependencies = inputs.references();
        dependencies.extend(depends_on.iter().cloned());

        for dep in &dependencies {
            if *dep == id {
                return Err(Error::cycle(vec![id.clone(), id]));
            }
            if let Some(path) = self.find_path(dep, &id) {
                let mut cycle = vec![id.clone()];
                cycle.extend(path);
                return Err(Error::cycle(cycle));
            }
        }

        self.nodes.insert(
            id.clone(),
            Node {
                id,
                type_token: type_token.into(),
                inputs,
                depends_on,
                dependencies,
            },
        );
        Ok(())
    }

    /// Path of dependency edges from `from` to `to`, both ends included
    fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut stack = vec![vec![from.to_string()]];

        while let Some(path) = stack.pop() {
            let current = path.last()?.clone();
            if current == to {
                return Some(path);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for dep in &node.dependencies {
                    if !visited.contains(dep) {
                        let mut next = path.clone();
                        next.push(dep.clone());
                        stack.push(next);
                    }
                }
            }
        }
        None
    }

    /// Look up a node
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Whether a node is declared
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of declared nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes are declared
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `(node, missing)` pairs for references to undeclared nodes
    pub fn dangling_references(&self) -> Vec<(String, String)> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .filter(|dep| !self.nodes.contains_key(*dep))
                    .map(|dep| (node.id.clone(), dep.clone()))
            })
            .collect()
    }

    /// Nodes that list `id` as a dependency
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.contains(id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Dependencies before dependents; ties broken by id
    pub fn topological_order(&self) -> Vec<String> {
        topological_order(
            self.nodes
                .values()
                .map(|n| (n.id.clone(), n.dependencies.clone())),
        )
    }
}

/// Kahn's algorithm over `(id, dependencies)`; unknown dependencies are ignored
pub(crate) fn topological_order<I>(edges: I) -> Vec<String>
where
    I: IntoIterator<Item = (String, BTreeSet<String>)>,
{
    let edges: BTreeMap<String, BTreeSet<String>> = edges.into_iter().collect();
    let mut remaining: BTreeMap<&str, usize> = edges
        .iter()
        .map(|(id, deps)| {
            let known = deps.iter().filter(|d| edges.contains_key(*d)).count();
            (id.as_str(), known)
        })
        .collect();

    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        remaining.remove(id);
        for (other, deps) in &edges {
            if deps.contains(id) {
                if let Some(count) = remaining.get_mut(other.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(other.as_str());
                    }
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn none() -> Vec<String> {
        Vec::new()
    }

    // ==========================================================================
    // Story: Cycles are rejected at declaration time
    // ==========================================================================

    #[test]
    fn self_reference_is_a_cycle() {
        let mut g = Graph::new();
        let err = g
            .declare("a", "svm:KeyPair", Input::output("a", "publicKey"), none())
            .unwrap_err();
        match err {
            Error::Cycle { path } => assert_eq!(path, vec!["a", "a"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
        assert!(g.is_empty());
    }

    #[test]
    fn transitive_cycle_through_forward_reference_is_rejected() {
        let mut g = Graph::new();
        // a -> b (b not declared yet), b -> c, then c -> a closes the loop
        g.declare("a", "t", Input::output("b", "x"), none()).unwrap();
        g.declare("b", "t", Input::literal(json!({})), ["c"]).unwrap();

        let err = g.declare("c", "t", Input::output("a", "x"), none()).unwrap_err();
        match err {
            Error::Cycle { path } => assert_eq!(path, vec!["c", "a", "b", "c"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
        assert!(!g.contains("c"));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut g = Graph::new();
        g.declare("identity", "t", Input::literal(json!({})), none()).unwrap();
        g.declare("genesis", "t", Input::output("identity", "publicKey"), none())
            .unwrap();
        g.declare(
            "validator",
            "t",
            Input::object([
                ("identity", Input::output("identity", "json")),
                ("hash", Input::output("genesis", "genesisHash")),
            ]),
            none(),
        )
        .unwrap();

        assert_eq!(g.topological_order(), vec!["identity", "genesis", "validator"]);
        assert_eq!(g.dependents("identity"), vec!["genesis", "validator"]);
    }

    #[test]
    fn duplicate_id_is_a_validation_error() {
        let mut g = Graph::new();
        g.declare("a", "t", Input::literal(json!({})), none()).unwrap();
        let err = g.declare("a", "t", Input::literal(json!({})), none()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn dangling_references_are_reported() {
        let mut g = Graph::new();
        g.declare("validator", "t", Input::output("genesis", "genesisHash"), ["instance"])
            .unwrap();
        let mut dangling = g.dangling_references();
        dangling.sort();
        assert_eq!(
            dangling,
            vec![
                ("validator".to_string(), "genesis".to_string()),
                ("validator".to_string(), "instance".to_string())
            ]
        );
    }

    // ==========================================================================
    // Story: References resolve against dependency outputs
    // ==========================================================================

    #[test]
    fn resolve_walks_objects_lists_and_concatenations() {
        let input = Input::object([
            ("identityPubkey", Input::output("identity", "publicKey")),
            ("first", Input::output("identity", "privateKey.0")),
            (
                "entryPoint",
                Input::List(vec![Input::Concat(vec![
                    Input::output("bootstrap", "host"),
                    Input::literal(":"),
                    Input::literal(8001),
                ])]),
            ),
        ]);

        let lookup = |node: &str| match node {
            "identity" => Some(json!({"publicKey": "Abc", "privateKey": [7, 8]})),
            "bootstrap" => Some(json!({"host": "10.0.0.1"})),
            _ => None,
        };

        assert_eq!(
            input.resolve(&lookup).unwrap(),
            json!({"identityPubkey": "Abc", "first": 7, "entryPoint": ["10.0.0.1:8001"]})
        );
    }

    #[test]
    fn missing_output_path_is_an_error() {
        let lookup = |_: &str| Some(json!({"publicKey": "Abc"}));
        let err = Input::output("identity", "secret").resolve(&lookup).unwrap_err();
        assert!(err.to_string().contains("no output at secret"));
    }

    #[test]
    fn node_state_display() {
        assert_eq!(NodeState::Cancelled.to_string(), "Cancelled");
        assert_eq!(NodeState::Ready.to_string(), "Ready");
    }
}
