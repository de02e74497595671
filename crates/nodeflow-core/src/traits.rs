use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::envelope::MergeEnvelope;
use crate::error::Result;
use crate::state::SharedState;
use crate::types::{ExecutorOutput, Node, RunId};

/// Position of a dispatch inside a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationInfo {
    /// 0-based iteration index.
    pub index: usize,
    /// Known up front for `count`/`foreach` loops, unknown for `while`.
    pub count: Option<usize>,
    pub parent_loop_id: String,
}

/// Context passed to executors during a dispatch.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub node_id: String,
    pub iteration: Option<IterationInfo>,
    /// 0-based branch index when dispatched by a parallel fan-out.
    pub branch_index: Option<usize>,
    /// Present when the input merges two or more producers.
    pub inputs: Option<Arc<MergeEnvelope>>,
    pub state: SharedState,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: RunId, node_id: impl Into<String>) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            iteration: None,
            branch_index: None,
            inputs: None,
            state: SharedState::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_state(mut self, state: SharedState) -> Self {
        self.state = state;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_inputs(mut self, inputs: Option<Arc<MergeEnvelope>>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_iteration(mut self, iteration: IterationInfo) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_branch(mut self, index: usize) -> Self {
        self.branch_index = Some(index);
        self
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("iteration", &self.iteration)
            .field("branch_index", &self.branch_index)
            .field("inputs", &self.inputs.as_ref().map(|e| e.count))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Node executor — the per-kind business logic the engine calls outward to.
pub trait NodeExecutor: Send + Sync + 'static {
    /// Node kind this executor handles (e.g. "llm", "http").
    fn kind(&self) -> &str;

    /// Execute one node with its resolved input.
    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>>;

    /// Timeout in seconds for one call. `None` uses the engine default.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}
