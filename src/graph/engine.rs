//! Concurrent graph evaluation
//!
//! The evaluator walks the graph as a dependency-counting scheduler: a node
//! is spawned onto a [`JoinSet`] as soon as its last dependency becomes
//! Ready, and the loop sleeps on `join_next` rather than polling. Outputs of
//! finished nodes go into a shared table that later nodes resolve their
//! references against.
//!
//! Each node is diffed against the prior state:
//!
//! | prior record          | resolved inputs | action                 |
//! |-----------------------|-----------------|------------------------|
//! | none                  | any             | create                 |
//! | same type             | identical       | pass outputs through   |
//! | same type             | changed         | `diff` → update/replace|
//! | different type        | any             | delete old, create new |
//!
//! Nodes present in the prior state but no longer declared are deleted after
//! the forward pass, dependents first.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::state::{ResourceState, StackState};
use super::{Graph, NodeState};
use crate::resource::{normalize_type_token, ApplyContext, DiffKind, Resource, ResourceRegistry};
use crate::{Error, Result};

/// What the evaluator did to a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Created from scratch
    Create,
    /// Updated in place
    Update,
    /// Deleted and recreated
    Replace,
    /// Inputs unchanged; previous outputs reused
    Same,
    /// Torn down
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Replace => write!(f, "replace"),
            Operation::Same => write!(f, "same"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Final disposition of one node
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    /// Node id
    pub id: String,
    /// Resource type token
    #[serde(rename = "type")]
    pub type_token: String,
    /// Final lifecycle state
    pub state: NodeState,
    /// Operation performed, if one completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Failure reason, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeReport {
    fn new(id: &str, type_token: &str) -> Self {
        Self {
            id: id.to_string(),
            type_token: type_token.to_string(),
            state: NodeState::Pending,
            operation: None,
            error: None,
        }
    }

    fn fail(&mut self, err: &Error) {
        self.state = NodeState::Failed;
        self.error = Some(err.to_string());
    }
}

/// Result of one evaluation or teardown
#[derive(Clone, Debug)]
pub struct EvaluationReport {
    nodes: BTreeMap<String, NodeReport>,
    state: StackState,
}

impl EvaluationReport {
    /// Report for a node
    pub fn get(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.get(id)
    }

    /// All node reports, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.values()
    }

    /// Nodes that failed or were cancelled
    pub fn failures(&self) -> Vec<&NodeReport> {
        self.nodes
            .values()
            .filter(|n| matches!(n.state, NodeState::Failed | NodeState::Cancelled))
            .collect()
    }

    /// Whether every node completed
    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }

    /// State to persist for the next evaluation
    pub fn state(&self) -> &StackState {
        &self.state
    }

    /// Consume the report, keeping the state
    pub fn into_state(self) -> StackState {
        self.state
    }

    /// Outputs a node produced (or kept) in this evaluation
    pub fn outputs(&self, id: &str) -> Option<&Value> {
        self.state.get(id).map(|r| &r.outputs)
    }
}

struct Completed {
    id: String,
    inputs: Value,
    result: Result<(Operation, Value)>,
}

/// Drives graphs through their resources' lifecycles
pub struct Evaluator {
    registry: Arc<ResourceRegistry>,
    ctx: Arc<ApplyContext>,
}

impl Evaluator {
    /// Evaluator over the given resource implementations and context
    pub fn new(registry: ResourceRegistry, ctx: ApplyContext) -> Self {
        Self {
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
        }
    }

    /// Bring every declared node to Ready, diffing against `prior`
    ///
    /// Fails up front (before any lifecycle call) when a reference names an
    /// undeclared node or a type token is unknown. Individual node failures
    /// are reported per node and only stop that node's dependents.
    ///
    /// Pooled sessions are closed before returning, whatever the outcome.
    #[instrument(skip_all, fields(nodes = graph.len()))]
    pub async fn evaluate(
        &self,
        graph: &Graph,
        prior: &StackState,
        cancel: &CancellationToken,
    ) -> Result<EvaluationReport> {
        let report = self.evaluate_graph(graph, prior, cancel).await;
        self.ctx.close().await;
        report
    }

    async fn evaluate_graph(
        &self,
        graph: &Graph,
        prior: &StackState,
        cancel: &CancellationToken,
    ) -> Result<EvaluationReport> {
        if let Some((node, missing)) = graph.dangling_references().into_iter().next() {
            return Err(Error::validation_for(
                node,
                format!("references undeclared node {missing}"),
            ));
        }

        let mut resources: HashMap<String, Arc<dyn Resource>> = HashMap::new();
        for node in graph.nodes() {
            resources.insert(node.id().to_string(), self.registry.get(node.type_token())?);
        }

        let outputs: DashMap<String, Value> = DashMap::new();
        let mut states: HashMap<String, NodeState> = HashMap::new();
        let mut reports: BTreeMap<String, NodeReport> = BTreeMap::new();
        let mut waiting: HashMap<String, usize> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();

        for node in graph.nodes() {
            states.insert(node.id().to_string(), NodeState::Pending);
            reports.insert(node.id().to_string(), NodeReport::new(node.id(), node.type_token()));
            waiting.insert(node.id().to_string(), node.dependencies().len());
            if node.dependencies().is_empty() {
                ready.push_back(node.id().to_string());
            }
        }

        let mut next_state = prior.clone();
        let mut tasks: JoinSet<Completed> = JoinSet::new();

        loop {
            while !cancel.is_cancelled() {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(node) = graph.get(&id) else {
                    continue;
                };

                states.insert(id.clone(), NodeState::Resolving);
                let lookup = |dep: &str| outputs.get(dep).map(|v| v.value().clone());
                let inputs = match node.inputs().resolve(&lookup) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        error!(node = %id, error = %e, "failed to resolve inputs");
                        self.fail(graph, &id, &e, &mut states, &mut reports);
                        continue;
                    }
                };

                let Some(resource) = resources.get(&id).cloned() else {
                    continue;
                };
                states.insert(id.clone(), NodeState::Applying);
                debug!(node = %id, "applying");

                let registry = self.registry.clone();
                let ctx = self.ctx.clone();
                let type_token = node.type_token().to_string();
                let previous = prior.get(&id).cloned();
                tasks.spawn(async move {
                    let work = apply_node(
                        registry,
                        resource,
                        ctx,
                        id.clone(),
                        type_token,
                        inputs.clone(),
                        previous,
                    );
                    let result = AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|_| {
                        Err(Error::internal_with_context("evaluator", format!("{id} panicked")))
                    });
                    Completed { id, inputs, result }
                });
            }

            if cancel.is_cancelled() && !ready.is_empty() {
                warn!(skipped = ready.len(), "evaluation cancelled");
                ready.clear();
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let Completed { id, inputs, result } = joined.map_err(|e| {
                Error::internal_with_context("evaluator", format!("node task failed: {e}"))
            })?;
            let Some(node) = graph.get(&id) else {
                continue;
            };

            match result {
                Ok((operation, produced)) => {
                    info!(node = %id, operation = %operation, "ready");
                    states.insert(id.clone(), NodeState::Ready);
                    if let Some(report) = reports.get_mut(&id) {
                        report.state = NodeState::Ready;
                        report.operation = Some(operation);
                    }
                    next_state.insert(
                        id.clone(),
                        ResourceState {
                            type_token: normalize_type_token(node.type_token()),
                            inputs,
                            outputs: produced.clone(),
                            dependencies: node.dependencies().clone(),
                        },
                    );
                    outputs.insert(id.clone(), produced);

                    for dependent in graph.dependents(&id) {
                        if let Some(count) = waiting.get_mut(dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && states.get(dependent) == Some(&NodeState::Pending) {
                                ready.push_back(dependent.to_string());
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(node = %id, error = %e, "failed");
                    self.fail(graph, &id, &e, &mut states, &mut reports);
                }
            }
        }

        for (id, state) in &states {
            if *state == NodeState::Pending {
                if let Some(report) = reports.get_mut(id) {
                    report.state = NodeState::Cancelled;
                }
            }
        }

        if !cancel.is_cancelled() {
            let orphans: Vec<String> = prior
                .teardown_order()
                .into_iter()
                .filter(|id| !graph.contains(id))
                .collect();
            if !orphans.is_empty() {
                info!(count = orphans.len(), "deleting resources no longer declared");
                self.teardown(orphans, &mut next_state, &mut reports, cancel).await;
            }
        }

        Ok(EvaluationReport {
            nodes: reports,
            state: next_state,
        })
    }

    /// Delete every resource in `prior`, dependents first
    #[instrument(skip_all, fields(resources = prior.len()))]
    pub async fn destroy(&self, prior: &StackState, cancel: &CancellationToken) -> EvaluationReport {
        let mut state = prior.clone();
        let mut reports = BTreeMap::new();
        self.teardown(prior.teardown_order(), &mut state, &mut reports, cancel)
            .await;
        self.ctx.close().await;
        EvaluationReport {
            nodes: reports,
            state,
        }
    }

    fn fail(
        &self,
        graph: &Graph,
        id: &str,
        err: &Error,
        states: &mut HashMap<String, NodeState>,
        reports: &mut BTreeMap<String, NodeReport>,
    ) {
        states.insert(id.to_string(), NodeState::Failed);
        if let Some(report) = reports.get_mut(id) {
            report.fail(err);
        }

        // Every transitive dependent is still Pending: it waits on this node
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in graph.dependents(&current) {
                if states.get(dependent) != Some(&NodeState::Pending) {
                    continue;
                }
                let skipped = Error::dependency_failed(dependent, &current);
                warn!(node = %dependent, dependency = %current, "skipped");
                states.insert(dependent.to_string(), NodeState::Failed);
                if let Some(report) = reports.get_mut(dependent) {
                    report.fail(&skipped);
                }
                queue.push_back(dependent.to_string());
            }
        }
    }

    async fn teardown(
        &self,
        order: Vec<String>,
        state: &mut StackState,
        reports: &mut BTreeMap<String, NodeReport>,
        cancel: &CancellationToken,
    ) {
        for id in order {
            let Some(record) = state.get(&id).cloned() else {
                continue;
            };
            let report = reports
                .entry(id.clone())
                .or_insert_with(|| NodeReport::new(&id, &record.type_token));

            if cancel.is_cancelled() {
                report.state = NodeState::Cancelled;
                continue;
            }

            let blocker = state
                .resources()
                .find(|(other, r)| **other != id && r.dependencies.contains(&id))
                .map(|(other, _)| other.clone());
            if let Some(blocker) = blocker {
                report.fail(&Error::validation_for(&id, format!("still required by {blocker}")));
                continue;
            }

            let deleted = match self.registry.get(&record.type_token) {
                Ok(resource) => {
                    info!(node = %id, "deleting");
                    resource
                        .delete(&self.ctx, &id, &record.inputs, &record.outputs)
                        .await
                }
                Err(e) => Err(e),
            };

            match deleted {
                Ok(()) => {
                    state.remove(&id);
                    report.state = NodeState::Ready;
                    report.operation = Some(Operation::Delete);
                }
                Err(e) => {
                    error!(node = %id, error = %e, "delete failed");
                    report.fail(&e);
                }
            }
        }
    }
}

async fn apply_node(
    registry: Arc<ResourceRegistry>,
    resource: Arc<dyn Resource>,
    ctx: Arc<ApplyContext>,
    id: String,
    type_token: String,
    inputs: Value,
    prior: Option<ResourceState>,
) -> Result<(Operation, Value)> {
    resource.check(&ctx, &id, &inputs)?;

    let Some(prior) = prior else {
        let outputs = resource.create(&ctx, &id, &inputs).await?;
        return Ok((Operation::Create, outputs));
    };

    if normalize_type_token(&prior.type_token) != normalize_type_token(&type_token) {
        info!(node = %id, from = %prior.type_token, to = %type_token, "type changed, replacing");
        registry
            .get(&prior.type_token)?
            .delete(&ctx, &id, &prior.inputs, &prior.outputs)
            .await?;
        let outputs = resource.create(&ctx, &id, &inputs).await?;
        return Ok((Operation::Replace, outputs));
    }

    if prior.inputs == inputs {
        return Ok((Operation::Same, prior.outputs));
    }

    match resource.diff(&id, &prior.inputs, &inputs)? {
        DiffKind::Update => {
            let outputs = resource.update(&ctx, &id, &prior.outputs, &inputs).await?;
            Ok((Operation::Update, outputs))
        }
        DiffKind::Replace => {
            resource
                .delete(&ctx, &id, &prior.inputs, &prior.outputs)
                .await?;
            let outputs = resource.create(&ctx, &id, &inputs).await?;
            Ok((Operation::Replace, outputs))
        }
    }
}
