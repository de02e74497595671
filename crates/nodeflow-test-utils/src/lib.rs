//! Mock executors and graph builders shared by nodeflow's tests.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::NamedTempFile;

use nodeflow_core::config::EngineConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{Edge, ExecutorOutput, Graph, Node, Usage};

/// Returns scripted outputs keyed by node id. Unscripted nodes echo their input.
pub struct MockExecutor {
    kind: String,
    outputs: HashMap<String, ExecutorOutput>,
}

impl MockExecutor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, node_id: impl Into<String>, output: impl Into<String>) -> Self {
        self.outputs
            .insert(node_id.into(), ExecutorOutput::text(output));
        self
    }

    /// Script a full output, including usage, cost, or route.
    pub fn with_result(mut self, node_id: impl Into<String>, output: ExecutorOutput) -> Self {
        self.outputs.insert(node_id.into(), output);
        self
    }

    /// Script an output with usage `(prompt, completion)` and a cost.
    pub fn with_usage(
        self,
        node_id: impl Into<String>,
        output: impl Into<String>,
        usage: (u64, u64),
        cost: f64,
    ) -> Self {
        let out = ExecutorOutput::text(output)
            .with_usage(Usage::new(usage.0, usage.1))
            .with_cost(cost);
        self.with_result(node_id, out)
    }
}

impl NodeExecutor for MockExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            Ok(self
                .outputs
                .get(&node.id)
                .cloned()
                .unwrap_or_else(|| ExecutorOutput::text(input)))
        })
    }
}

/// Fails for the listed node ids (or every node when the list is empty);
/// echoes the input otherwise.
pub struct FailingExecutor {
    kind: String,
    failing: Vec<String>,
}

impl FailingExecutor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            failing: Vec::new(),
        }
    }

    pub fn only(mut self, node_id: impl Into<String>) -> Self {
        self.failing.push(node_id.into());
        self
    }
}

impl NodeExecutor for FailingExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            if self.failing.is_empty() || self.failing.contains(&node.id) {
                Err(NodeflowError::executor(
                    self.kind.clone(),
                    format!("{} failed", node.id),
                ))
            } else {
                Ok(ExecutorOutput::text(input))
            }
        })
    }
}

/// One captured call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub node_id: String,
    pub input: String,
    pub iteration: Option<usize>,
    pub branch: Option<usize>,
    /// Number of merged producers, when there were two or more.
    pub merged_count: Option<usize>,
}

/// Records every call and echoes its input, optionally prefixed.
#[derive(Clone)]
pub struct RecordingExecutor {
    kind: String,
    prefix: Option<String>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl RecordingExecutor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            prefix: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Output `"{prefix}{input}"` instead of the bare input.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, node_id: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.node_id == node_id)
            .collect()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.node_id).collect()
    }
}

impl NodeExecutor for RecordingExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                node_id: node.id.clone(),
                input: input.clone(),
                iteration: ctx.iteration.as_ref().map(|i| i.index),
                branch: ctx.branch_index,
                merged_count: ctx.inputs.as_ref().map(|e| e.count),
            });
            let output = match &self.prefix {
                Some(prefix) => format!("{}{}", prefix, input),
                None => input,
            };
            Ok(ExecutorOutput::text(output))
        })
    }
}

/// Sleeps before echoing its input. Ignores cancellation on purpose so the
/// engine's own cancellation race is what ends the call.
pub struct SlowExecutor {
    kind: String,
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(kind: impl Into<String>, delay: Duration) -> Self {
        Self {
            kind: kind.into(),
            delay,
        }
    }
}

impl NodeExecutor for SlowExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn execute<'a>(
        &'a self,
        _node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(ExecutorOutput::text(input))
        })
    }
}

// ── Graph builders ──────────────────────────────────────────────

pub fn node(id: &str, kind: &str) -> Node {
    Node::new(id, kind)
}

pub fn node_with(id: &str, kind: &str, config: serde_json::Value) -> Node {
    Node::new(id, kind).with_config(config)
}

pub fn edge(source: &str, target: &str) -> Edge {
    Edge::new(source, target)
}

pub fn edge_with_handle(source: &str, handle: &str, target: &str) -> Edge {
    Edge::with_handle(source, handle, target)
}

pub fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> Graph {
    Graph::new(nodes, edges)
}

/// Linear chain `ids[0] -> ids[1] -> ...`, every node of `kind`.
pub fn chain(ids: &[&str], kind: &str) -> Graph {
    let nodes = ids.iter().map(|id| node(id, kind)).collect();
    let edges = ids.windows(2).map(|w| edge(w[0], w[1])).collect();
    Graph::new(nodes, edges)
}

// ── Config fixtures ─────────────────────────────────────────────

/// Write raw TOML to a temp file that lives as long as the handle.
pub fn config_file(toml_text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(toml_text.as_bytes())
        .expect("write temp config");
    file
}

/// Serialize a config to a temp TOML file.
pub fn config_file_from(config: &EngineConfig) -> NamedTempFile {
    let text = toml::to_string(config).expect("serialize config");
    config_file(&text)
}
