use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node kinds the engine handles itself instead of only delegating.
pub mod kinds {
    pub const CONDITION: &str = "condition";
    pub const LOOP: &str = "loop";
    pub const PARALLEL: &str = "parallel";
}

/// Well-known edge source handles.
pub mod handles {
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
    pub const ITERATE: &str = "iterate";
    pub const DONE: &str = "done";
    pub const BRANCH: &str = "branch";
    pub const MERGED: &str = "merged";
}

/// A processing step in the graph.
///
/// `config` is opaque to the engine except for the control-flow kinds
/// (`loop`, `parallel`), and is never written during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: String,
    /// Display name used in multi-input headers. Falls back to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            label: None,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    /// Disambiguates named outputs (e.g. `true`/`false`, `iterate`/`done`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    /// Create an edge with no source handle. The id is derived from the endpoints.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source_node_id: source,
            target_node_id: target,
            source_handle: None,
        }
    }

    /// Create an edge leaving a named handle of the source node.
    pub fn with_handle(
        source: impl Into<String>,
        handle: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let handle = handle.into();
        let mut edge = Self::new(source, target);
        edge.id = format!(
            "{}:{}->{}",
            edge.source_node_id, handle, edge.target_node_id
        );
        edge.source_handle = Some(handle);
        edge
    }

    pub fn handle(&self) -> Option<&str> {
        self.source_handle.as_deref()
    }
}

/// The run request: every node and edge of the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }
}

/// Token-like resource usage reported by an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_units: u64,
    pub completion_units: u64,
    pub total_units: u64,
}

impl Usage {
    pub fn new(prompt_units: u64, completion_units: u64) -> Self {
        Self {
            prompt_units,
            completion_units,
            total_units: prompt_units + completion_units,
        }
    }
}

/// What a node executor returns on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Outgoing handle selected by the executor. Edges leaving the node
    /// through any other handle are not followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl ExecutorOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Error,
    /// The loop's wall-clock budget ran out; completed iterations were merged.
    Timeout,
}

/// The record of one node dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,
}

impl NodeResult {
    /// A freshly dispatched node.
    pub fn running(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Running,
            output: None,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            elapsed_ms: None,
            usage: None,
            cost: None,
            iteration_index: None,
            branch_index: None,
        }
    }

    pub fn succeed(mut self, out: &ExecutorOutput) -> Self {
        self.status = NodeStatus::Success;
        self.output = Some(out.output.clone());
        self.usage = out.usage;
        self.cost = out.cost;
        self.finish()
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = NodeStatus::Error;
        self.error = Some(message.into());
        self.finish()
    }

    pub fn time_out(mut self, message: impl Into<String>) -> Self {
        self.status = NodeStatus::Timeout;
        self.error = Some(message.into());
        self.finish()
    }

    fn finish(mut self) -> Self {
        let end = Utc::now();
        self.elapsed_ms = Some((end - self.start_time).num_milliseconds().max(0) as u64);
        self.end_time = Some(end);
        self
    }

    /// Copy of this result filed under a derived id (`x-iter-2`, `p-branch-1`).
    pub fn derived(&self, derived_id: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.node_id = derived_id.into();
        copy
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

/// Derived id for one loop iteration of a body node.
pub fn iteration_result_id(node_id: &str, index: usize) -> String {
    format!("{}-iter-{}", node_id, index)
}

/// Derived id for one branch of a parallel node.
pub fn branch_result_id(parallel_id: &str, index: usize) -> String {
    format!("{}-branch-{}", parallel_id, index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Why a run stopped before its queue drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AbortReason {
    /// These nodes sit on a cycle outside any loop node and cannot be ordered.
    #[serde(rename_all = "camelCase")]
    CycleDetected { node_ids: Vec<String> },
    /// The run hit its dispatch ceiling.
    CircuitBreaker { limit: usize },
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { node_ids } => {
                write!(f, "cycle detected among: {}", node_ids.join(", "))
            }
            Self::CircuitBreaker { limit } => write!(f, "dispatch limit of {} reached", limit),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// The run response returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub node_results: BTreeMap<String, NodeResult>,
    pub total_cost: f64,
    pub total_usage_units: u64,
    pub total_latency_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub skipped_node_ids: Vec<String>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

impl RunResponse {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.get(node_id)
    }

    pub fn output(&self, node_id: &str) -> Option<&str> {
        self.result(node_id).and_then(|r| r.output.as_deref())
    }
}

/// Run lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted { run_id: RunId, node_count: usize },
    NodeStarted { run_id: RunId, node_id: String, kind: String },
    NodeFinished { run_id: RunId, result: NodeResult },
    NodeSkipped { run_id: RunId, node_id: String },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        total_latency_ms: u64,
        abort_reason: Option<AbortReason>,
    },
}
