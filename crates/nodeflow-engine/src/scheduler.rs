//! Run driver.
//!
//! Graphs without loop or parallel nodes walk their topological order
//! (static mode). Everything else goes through a FIFO task queue seeded with
//! the entry nodes (dynamic mode). Both share the per-node logic below.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodeflow_core::config::{EngineConfig, LoopFailurePolicy};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::EventBus;
use nodeflow_core::state::SharedState;
use nodeflow_core::traits::{ExecutionContext, IterationInfo};
use nodeflow_core::types::{
    branch_result_id, handles, iteration_result_id, kinds, AbortReason, ExecutorOutput, Node,
    NodeResult, RunEvent, RunId, RunResponse,
};

use crate::accumulator::RunAccumulator;
use crate::condition::parse_bool_output;
use crate::graph::GraphModel;
use crate::loops::{LoopExit, LoopState};
use crate::merge::{merge_inputs, MergedInput, Producer};
use crate::parallel::{
    merge_outputs, scatter_gather, select_branches, BranchOutcome, BranchPlan, ParallelNodeConfig,
};
use crate::registry::ExecutorRegistry;
use crate::skip::BranchSkipTracker;
use crate::topo::CycleDetected;

const CANCELLED: &str = "run cancelled";

/// One unit of work in the dynamic queue.
#[derive(Debug, Clone)]
pub struct ExecutionTask {
    pub node_id: String,
    /// Explicit input. `None` resolves it from live predecessors.
    pub input: Option<String>,
    pub iteration: Option<IterationInfo>,
}

impl ExecutionTask {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input: None,
            iteration: None,
        }
    }

    pub fn iteration(node_id: impl Into<String>, input: String, info: IterationInfo) -> Self {
        Self {
            node_id: node_id.into(),
            input: Some(input),
            iteration: Some(info),
        }
    }
}

/// Mutable bookkeeping for one run.
#[derive(Debug)]
struct RunState {
    /// Latest output per node, as seen by its successors.
    outputs: HashMap<String, String>,
    /// Route chosen by a loop body on its latest iteration, applied when the loop ends.
    routes: HashMap<String, String>,
    finalized: HashSet<String>,
    enqueued: HashSet<String>,
    skip: BranchSkipTracker,
    loops: HashMap<String, LoopState>,
    acc: RunAccumulator,
    abort: Option<AbortReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Result of one executor dispatch.
enum Step {
    Done {
        result: NodeResult,
        /// What successors receive.
        forward: String,
        route: Option<String>,
    },
    Failed {
        result: NodeResult,
        error: NodeflowError,
    },
}

/// Wall-clock bound inherited by a loop iteration.
struct LoopDeadline {
    loop_id: String,
    remaining: Duration,
    timeout_secs: u64,
}

/// Drives a single run over a validated graph.
pub struct Scheduler<'g> {
    graph: &'g GraphModel,
    registry: Arc<ExecutorRegistry>,
    config: &'g EngineConfig,
    events: Option<Arc<EventBus>>,
    cancel: CancellationToken,
    shared: SharedState,
    run_id: RunId,
    state: RunState,
}

impl<'g> Scheduler<'g> {
    pub fn new(
        graph: &'g GraphModel,
        registry: Arc<ExecutorRegistry>,
        config: &'g EngineConfig,
        run_id: RunId,
    ) -> Self {
        Self {
            graph,
            registry,
            config,
            events: None,
            cancel: CancellationToken::new(),
            shared: SharedState::new(),
            state: RunState {
                outputs: HashMap::new(),
                routes: HashMap::new(),
                finalized: HashSet::new(),
                enqueued: HashSet::new(),
                skip: BranchSkipTracker::new(),
                loops: HashMap::new(),
                acc: RunAccumulator::new(run_id.clone()),
                abort: None,
            },
            run_id,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<EventBus>>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_shared_state(mut self, shared: SharedState) -> Self {
        self.shared = shared;
        self
    }

    /// End the run before any dispatch because the graph cannot be ordered.
    pub fn reject_cycle(mut self, cycle: CycleDetected) -> RunResponse {
        self.started();
        warn!(run_id = %self.run_id, nodes = ?cycle.node_ids, "Graph contains a cycle, not running");
        self.state.abort = Some(AbortReason::CycleDetected {
            node_ids: cycle.node_ids,
        });
        self.finish()
    }

    /// Execute nodes in the given topological order.
    pub async fn run_static(mut self, order: &[String]) -> RunResponse {
        self.started();
        let graph = self.graph;

        for node_id in order {
            if self.state.skip.is_skipped(node_id) {
                continue;
            }
            if self.should_stop() {
                break;
            }
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            let input = self.resolve_input(node_id);
            if self.run_step(node, input).await == Flow::Halt {
                break;
            }
        }

        self.finish()
    }

    /// Execute through the task queue, expanding loops and fan-outs as they come.
    pub async fn run_dynamic(mut self) -> RunResponse {
        self.started();
        let graph = self.graph;

        let mut queue = VecDeque::new();
        for node in graph.entry_nodes() {
            self.state.enqueued.insert(node.id.clone());
            queue.push_back(ExecutionTask::new(node.id.clone()));
        }

        while let Some(task) = queue.pop_front() {
            if self.state.skip.is_skipped(&task.node_id) {
                debug!(node_id = %task.node_id, "Dropping task for skipped node");
                continue;
            }
            if task.iteration.is_none() && self.state.finalized.contains(&task.node_id) {
                continue;
            }
            if self.should_stop() {
                break;
            }
            if self.dispatch(task, &mut queue).await == Flow::Halt {
                break;
            }
        }

        let unfinished: Vec<(String, LoopState)> = self.state.loops.drain().collect();
        if !unfinished.is_empty() && self.state.abort.is_none() && !self.state.acc.has_failed() {
            let ids: Vec<&String> = unfinished.iter().map(|(id, _)| id).collect();
            warn!(loops = ?ids, "Queue drained with unfinished loops");
            self.state.acc.fail();
        }
        for (_, state) in unfinished {
            let merged = state.merged_output();
            let mut result = state.record.fail("loop interrupted before completion");
            result.output = Some(merged);
            self.state.acc.record(result);
        }

        self.finish()
    }

    fn started(&self) {
        info!(run_id = %self.run_id, nodes = self.graph.len(), "Run started");
        self.emit(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
            node_count: self.graph.len(),
        });
    }

    fn finish(self) -> RunResponse {
        let Scheduler {
            graph,
            events,
            state,
            run_id,
            ..
        } = self;

        let skipped = state.skip.skipped_ids(graph);
        let response = state.acc.finish(skipped, state.abort);

        info!(
            run_id = %run_id,
            status = ?response.status,
            dispatches = response.execution_order.len(),
            skipped = response.skipped_node_ids.len(),
            latency_ms = response.total_latency_ms,
            "Run finished"
        );
        if let Some(bus) = events {
            bus.publish(RunEvent::RunFinished {
                run_id,
                status: response.status,
                total_latency_ms: response.total_latency_ms,
                abort_reason: response.abort_reason.clone(),
            });
        }
        response
    }

    fn emit(&self, event: RunEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn publish_skipped(&self, node_ids: Vec<String>) {
        for node_id in node_ids {
            debug!(node_id = %node_id, "Node skipped");
            self.emit(RunEvent::NodeSkipped {
                run_id: self.run_id.clone(),
                node_id,
            });
        }
    }

    /// Cancellation and the dispatch ceiling, checked before every dispatch.
    fn should_stop(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            warn!(run_id = %self.run_id, "Run cancelled");
            self.state.abort = Some(AbortReason::Cancelled);
            return true;
        }
        let limit = self.config.engine.max_dispatches;
        if self.state.acc.dispatch_count() >= limit {
            warn!(run_id = %self.run_id, limit, "Dispatch limit reached, aborting run");
            self.state.abort = Some(AbortReason::CircuitBreaker { limit });
            return true;
        }
        false
    }

    async fn dispatch(&mut self, task: ExecutionTask, queue: &mut VecDeque<ExecutionTask>) -> Flow {
        let graph = self.graph;
        let Some(node) = graph.node(&task.node_id) else {
            warn!(node_id = %task.node_id, "Task for unknown node");
            return Flow::Continue;
        };

        if let Some(info) = task.iteration {
            let input = task.input.unwrap_or_default();
            return self.run_iteration(node, input, info, queue).await;
        }

        let input = match task.input {
            Some(text) => MergedInput::plain(text),
            None => self.resolve_input(&node.id),
        };

        match node.kind.as_str() {
            kinds::LOOP => self.start_loop(node, input.text, queue),
            kinds::PARALLEL => self.run_parallel(node, input, queue).await,
            _ => {
                let flow = self.run_step(node, input).await;
                if flow == Flow::Continue {
                    self.enqueue_ready_successors(&node.id, queue);
                }
                flow
            }
        }
    }

    /// Merge the outputs of finalized, live predecessors in edge order.
    fn resolve_input(&self, node_id: &str) -> MergedInput {
        let mut seen = HashSet::new();
        let mut producers = Vec::new();

        for edge in self.graph.incoming(node_id) {
            let source = edge.source_node_id.as_str();
            if !self.state.skip.is_live(edge)
                || !self.state.finalized.contains(source)
                || !seen.insert(source)
            {
                continue;
            }
            if let (Some(node), Some(output)) = (self.graph.node(source), self.state.outputs.get(source)) {
                producers.push(Producer { node, output });
            }
        }

        merge_inputs(&producers)
    }

    /// Every incoming edge is dead, comes from a skipped node, or from a finalized one.
    fn is_ready(&self, node_id: &str) -> bool {
        self.graph.incoming(node_id).all(|e| {
            self.state.skip.is_dead(e)
                || self.state.skip.is_skipped(&e.source_node_id)
                || self.state.finalized.contains(&e.source_node_id)
        })
    }

    fn enqueue_ready_successors(&mut self, node_id: &str, queue: &mut VecDeque<ExecutionTask>) {
        let graph = self.graph;
        let from_loop = graph.node(node_id).is_some_and(|n| n.kind == kinds::LOOP);

        for edge in graph.outgoing(node_id) {
            if from_loop && edge.handle() == Some(handles::ITERATE) {
                continue;
            }
            if !self.state.skip.is_live(edge) {
                continue;
            }
            let target = edge.target_node_id.as_str();
            if self.state.finalized.contains(target)
                || self.state.skip.is_skipped(target)
                || self.state.enqueued.contains(target)
            {
                continue;
            }
            if self.is_ready(target) {
                debug!(node_id = %target, "Enqueued");
                self.state.enqueued.insert(target.to_string());
                queue.push_back(ExecutionTask::new(target));
            }
        }
    }

    /// Kill every outgoing edge whose handle differs from `route`.
    fn apply_route(&mut self, node_id: &str, route: &str) {
        let graph = self.graph;
        for edge in graph.outgoing(node_id) {
            if edge.handle().is_some_and(|h| h != route) {
                let newly = self.state.skip.kill_edge(graph, edge);
                self.publish_skipped(newly);
            }
        }
    }

    fn kill_outgoing(&mut self, node_id: &str) {
        let graph = self.graph;
        for edge in graph.outgoing(node_id) {
            let newly = self.state.skip.kill_edge(graph, edge);
            self.publish_skipped(newly);
        }
    }

    /// Record a failure that ends the run.
    fn halt(&mut self, result: NodeResult, error: NodeflowError) -> Flow {
        if matches!(error, NodeflowError::Cancelled) {
            warn!(node_id = %result.node_id, "Run cancelled during dispatch");
            self.state.abort = Some(AbortReason::Cancelled);
        } else {
            error!(node_id = %result.node_id, error = %error, "Node failed, halting run");
        }
        self.emit(RunEvent::NodeFinished {
            run_id: self.run_id.clone(),
            result: result.clone(),
        });
        self.state.acc.record(result);
        self.state.acc.fail();
        Flow::Halt
    }

    fn complete(&mut self, node_id: &str, result: NodeResult, forward: String, route: Option<String>) {
        self.emit(RunEvent::NodeFinished {
            run_id: self.run_id.clone(),
            result: result.clone(),
        });
        self.state.acc.record(result);
        self.state.outputs.insert(node_id.to_string(), forward);
        self.state.finalized.insert(node_id.to_string());
        if let Some(route) = route {
            self.apply_route(node_id, &route);
        }
    }

    /// A plain or condition node outside any loop or fan-out.
    async fn run_step(&mut self, node: &Node, input: MergedInput) -> Flow {
        self.state.acc.dispatched(&node.id);
        match self.execute_step(node, input, None, None, None).await {
            Step::Done {
                result,
                forward,
                route,
            } => {
                self.complete(&node.id, result, forward, route);
                Flow::Continue
            }
            Step::Failed { result, error } => self.halt(result, error),
        }
    }

    /// Call the executor for one node. Does not touch run state.
    async fn execute_step(
        &self,
        node: &Node,
        input: MergedInput,
        iteration: Option<IterationInfo>,
        branch: Option<usize>,
        deadline: Option<&LoopDeadline>,
    ) -> Step {
        let mut record = NodeResult::running(node.id.clone());
        record.iteration_index = iteration.as_ref().map(|i| i.index);
        record.branch_index = branch;

        info!(
            node_id = %node.id,
            kind = %node.kind,
            iteration = ?record.iteration_index,
            branch = ?branch,
            "Dispatching node"
        );
        self.emit(RunEvent::NodeStarted {
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
            kind: node.kind.clone(),
        });

        let mut ctx = ExecutionContext::new(self.run_id.clone(), node.id.clone())
            .with_state(self.shared.clone())
            .with_cancel(self.cancel.clone())
            .with_inputs(input.envelope.map(Arc::new));
        if let Some(info) = iteration {
            ctx = ctx.with_iteration(info);
        }
        if let Some(index) = branch {
            ctx = ctx.with_branch(index);
        }

        // A condition routes its input instead of transforming it.
        let passthrough = (node.kind == kinds::CONDITION).then(|| input.text.clone());

        match (self.invoke(node, input.text, ctx, deadline).await, passthrough) {
            (Ok(out), Some(passthrough)) => match parse_bool_output(&out.output) {
                Some(verdict) => {
                    let verdict = verdict.to_string();
                    debug!(node_id = %node.id, verdict = %verdict, "Condition evaluated");
                    let shown = ExecutorOutput {
                        output: verdict.clone(),
                        ..out
                    };
                    Step::Done {
                        result: record.succeed(&shown),
                        forward: passthrough,
                        route: Some(verdict),
                    }
                }
                None => {
                    let error = NodeflowError::executor(
                        node.kind.clone(),
                        format!("condition output is not a boolean: {:?}", out.output),
                    );
                    Step::Failed {
                        result: record.fail(error.to_string()),
                        error,
                    }
                }
            },
            (Ok(out), None) => Step::Done {
                forward: out.output.clone(),
                route: out.route.clone(),
                result: record.succeed(&out),
            },
            (Err(error), _) => {
                let result = match &error {
                    NodeflowError::Cancelled => record.fail(CANCELLED),
                    NodeflowError::LoopTimeout { .. } => record.time_out(error.to_string()),
                    other => record.fail(other.to_string()),
                };
                Step::Failed { result, error }
            }
        }
    }

    /// Race the executor against cancellation and, inside a loop, the loop's clock.
    async fn invoke(
        &self,
        node: &Node,
        input: String,
        ctx: ExecutionContext,
        deadline: Option<&LoopDeadline>,
    ) -> Result<ExecutorOutput> {
        let call = self
            .registry
            .execute(node, input, ctx, self.config.engine.node_timeout_secs);

        let bounded = async move {
            match deadline {
                Some(d) => match tokio::time::timeout(d.remaining, call).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeflowError::LoopTimeout {
                        loop_id: d.loop_id.clone(),
                        timeout_secs: d.timeout_secs,
                    }),
                },
                None => call.await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(NodeflowError::Cancelled),
            result = bounded => result,
        }
    }

    fn nested_control_flow(node: &Node, parent_id: &str, record: NodeResult) -> Step {
        let error = NodeflowError::InvalidGraph(format!(
            "nested control flow: {} node '{}' dispatched by '{}'",
            node.kind, node.id, parent_id
        ));
        Step::Failed {
            result: record.fail(error.to_string()),
            error,
        }
    }

    // ── Loops ───────────────────────────────────────────────────

    /// Direct targets of the loop's `iterate` edges, in edge order.
    fn loop_bodies(&self, loop_id: &str) -> Vec<String> {
        let mut bodies: Vec<String> = Vec::new();
        for edge in self.graph.outgoing_with_handle(loop_id, handles::ITERATE) {
            if !bodies.contains(&edge.target_node_id) {
                bodies.push(edge.target_node_id.clone());
            }
        }
        bodies
    }

    fn start_loop(&mut self, node: &Node, input: String, queue: &mut VecDeque<ExecutionTask>) -> Flow {
        self.state.acc.dispatched(&node.id);
        self.emit(RunEvent::NodeStarted {
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
            kind: node.kind.clone(),
        });

        let timeout = Duration::from_secs(self.config.loops.timeout_secs);
        let state = match LoopState::new(node, input, self.config.loops.max_iterations_cap, timeout) {
            Ok(state) => state,
            Err(error) => {
                let result = NodeResult::running(node.id.clone()).fail(error.to_string());
                return self.halt(result, error);
            }
        };

        info!(
            node_id = %node.id,
            mode = ?state.mode(),
            planned = ?state.planned_count(),
            "Loop started"
        );
        self.state.loops.insert(node.id.clone(), state);
        self.advance_loop(&node.id, queue);
        Flow::Continue
    }

    /// Plan the next iteration of a loop, or finalize it.
    fn advance_loop(&mut self, loop_id: &str, queue: &mut VecDeque<ExecutionTask>) {
        let bodies = self.loop_bodies(loop_id);
        let Some(state) = self.state.loops.get_mut(loop_id) else {
            return;
        };

        loop {
            match state.next_iteration() {
                // Without a body the item itself is the iteration output.
                Ok((_, item)) if bodies.is_empty() => state.push_output(item),
                Ok((index, item)) => {
                    debug!(loop_id, index, "Dispatching loop iteration");
                    let info = IterationInfo {
                        index,
                        count: state.planned_count(),
                        parent_loop_id: loop_id.to_string(),
                    };
                    state.begin_iteration(bodies.clone());
                    for body in &bodies {
                        queue.push_back(ExecutionTask::iteration(
                            body.clone(),
                            item.clone(),
                            info.clone(),
                        ));
                    }
                    return;
                }
                Err(exit) => {
                    self.finalize_loop(loop_id, exit, queue);
                    return;
                }
            }
        }
    }

    async fn run_iteration(
        &mut self,
        node: &Node,
        input: String,
        info: IterationInfo,
        queue: &mut VecDeque<ExecutionTask>,
    ) -> Flow {
        let loop_id = info.parent_loop_id.clone();
        let Some(deadline) = self.state.loops.get(&loop_id).map(|s| LoopDeadline {
            loop_id: loop_id.clone(),
            remaining: s.remaining(),
            timeout_secs: s.timeout().as_secs(),
        }) else {
            debug!(node_id = %node.id, loop_id = %loop_id, "Dropping iteration of a finished loop");
            return Flow::Continue;
        };

        let index = info.index;
        let iteration_id = iteration_result_id(&node.id, index);
        self.state.acc.dispatched(&node.id);

        let step = if node.kind == kinds::LOOP || node.kind == kinds::PARALLEL {
            let mut record = NodeResult::running(node.id.clone());
            record.iteration_index = Some(index);
            Self::nested_control_flow(node, &loop_id, record)
        } else {
            self.execute_step(node, MergedInput::plain(input), Some(info), None, Some(&deadline))
                .await
        };

        match step {
            Step::Done {
                result,
                forward,
                route,
            } => {
                self.record_iteration(result.derived(iteration_id));
                match route {
                    Some(route) => self.state.routes.insert(node.id.clone(), route),
                    None => self.state.routes.remove(&node.id),
                };
                self.state.outputs.insert(node.id.clone(), forward.clone());
                self.body_reported(&loop_id, &node.id, forward, queue);
                Flow::Continue
            }
            Step::Failed { result, error } => match error {
                NodeflowError::LoopTimeout { .. } => {
                    warn!(loop_id = %loop_id, node_id = %node.id, "Loop timed out mid-iteration");
                    self.record_iteration(result.derived(iteration_id));
                    self.finalize_loop(&loop_id, LoopExit::TimedOut, queue);
                    Flow::Continue
                }
                NodeflowError::Cancelled => {
                    self.state.acc.record_derived(result.derived(iteration_id));
                    self.halt(result, error)
                }
                _ if self.config.loops.failure_policy == LoopFailurePolicy::Continue => {
                    warn!(
                        loop_id = %loop_id,
                        node_id = %node.id,
                        index,
                        error = %error,
                        "Loop iteration failed, continuing"
                    );
                    self.record_iteration(result.derived(iteration_id));
                    self.state.routes.remove(&node.id);
                    self.state.outputs.insert(node.id.clone(), String::new());
                    self.body_reported(&loop_id, &node.id, String::new(), queue);
                    Flow::Continue
                }
                _ => {
                    self.state.acc.record_derived(result.derived(iteration_id));
                    self.halt(result, error)
                }
            },
        }
    }

    fn record_iteration(&mut self, result: NodeResult) {
        self.emit(RunEvent::NodeFinished {
            run_id: self.run_id.clone(),
            result: result.clone(),
        });
        self.state.acc.record(result);
    }

    fn body_reported(
        &mut self,
        loop_id: &str,
        body_id: &str,
        output: String,
        queue: &mut VecDeque<ExecutionTask>,
    ) {
        let complete = self
            .state
            .loops
            .get_mut(loop_id)
            .is_some_and(|state| state.record_body(body_id, output));
        if complete {
            self.advance_loop(loop_id, queue);
        }
    }

    fn finalize_loop(&mut self, loop_id: &str, exit: LoopExit, queue: &mut VecDeque<ExecutionTask>) {
        let Some(state) = self.state.loops.remove(loop_id) else {
            return;
        };
        let graph = self.graph;

        let merged = state.merged_output();
        let dispatched = state.dispatched_iterations();
        let completed = state.completed_iterations();
        let timeout_secs = state.timeout().as_secs();

        let result = match exit {
            LoopExit::TimedOut => {
                let mut result = state
                    .record
                    .time_out(format!("loop exceeded its {}s time budget", timeout_secs));
                result.output = Some(merged.clone());
                result
            }
            LoopExit::Exhausted | LoopExit::ConditionFalse => {
                state.record.succeed(&ExecutorOutput::text(merged.clone()))
            }
        };

        info!(loop_id, iterations = completed, exit = ?exit, "Loop finished");
        self.complete(loop_id, result, merged, None);

        let bodies = self.loop_bodies(loop_id);
        let mut finished_bodies = Vec::new();
        for body in &bodies {
            let last = (0..dispatched)
                .rev()
                .find_map(|i| self.state.acc.result(&iteration_result_id(body, i)))
                .map(|r| r.derived(body.clone()));

            match last {
                Some(last) => {
                    self.state.acc.record_derived(last);
                    self.state.finalized.insert(body.clone());
                    if let Some(route) = self.state.routes.remove(body) {
                        self.apply_route(body, &route);
                    }
                    finished_bodies.push(body.clone());
                }
                None => {
                    // Never ran: the iterate edges into it are not followed.
                    for edge in graph.outgoing_with_handle(loop_id, handles::ITERATE) {
                        if &edge.target_node_id == body {
                            let newly = self.state.skip.kill_edge(graph, edge);
                            self.publish_skipped(newly);
                        }
                    }
                }
            }
        }

        self.enqueue_ready_successors(loop_id, queue);
        for body in &finished_bodies {
            self.enqueue_ready_successors(body, queue);
        }
    }

    // ── Parallel ────────────────────────────────────────────────

    async fn run_parallel(
        &mut self,
        node: &Node,
        input: MergedInput,
        queue: &mut VecDeque<ExecutionTask>,
    ) -> Flow {
        self.state.acc.dispatched(&node.id);
        self.emit(RunEvent::NodeStarted {
            run_id: self.run_id.clone(),
            node_id: node.id.clone(),
            kind: node.kind.clone(),
        });
        let record = NodeResult::running(node.id.clone());

        let config = match ParallelNodeConfig::from_node(node) {
            Ok(config) => config,
            Err(error) => return self.halt(record.fail(error.to_string()), error),
        };

        let graph = self.graph;
        let selection = select_branches(
            graph,
            &node.id,
            config.branch_count,
            self.config.parallel.max_branches,
        );
        for edge in &selection.surplus {
            let newly = self.state.skip.kill_edge(graph, edge);
            self.publish_skipped(newly);
        }

        // Branches bypass the queue, so the ceiling is checked for all of them here.
        let limit = self.config.engine.max_dispatches;
        let left = limit.saturating_sub(self.state.acc.dispatch_count());
        if selection.branches.len() > left {
            warn!(
                node_id = %node.id,
                branches = selection.branches.len(),
                left,
                limit,
                "Fan-out would pass the dispatch limit, aborting run"
            );
            self.state.abort = Some(AbortReason::CircuitBreaker { limit });
            let result = record.fail(format!("dispatch limit of {} reached", limit));
            self.emit(RunEvent::NodeFinished {
                run_id: self.run_id.clone(),
                result: result.clone(),
            });
            self.state.acc.record(result);
            return Flow::Halt;
        }

        info!(
            node_id = %node.id,
            branches = selection.branches.len(),
            strategy = ?config.merge_strategy,
            "Fanning out"
        );
        for plan in &selection.branches {
            self.state.acc.dispatched(&plan.target);
        }

        let outcomes = {
            let this = &*self;
            let input = &input;
            let parent_id = node.id.as_str();
            scatter_gather(&selection.branches, |plan| async move {
                this.run_branch(parent_id, plan, input).await
            })
            .await
        };

        let mut contributions = Vec::with_capacity(outcomes.len());
        for BranchOutcome {
            plan,
            result,
            output,
            route,
        } in outcomes
        {
            self.emit(RunEvent::NodeFinished {
                run_id: self.run_id.clone(),
                result: result.clone(),
            });
            self.state
                .acc
                .record_derived(result.derived(branch_result_id(&node.id, plan.index)));
            let succeeded = result.is_success();
            self.state.acc.record(result);
            self.state.finalized.insert(plan.target.clone());
            self.state.outputs.insert(plan.target.clone(), output.clone());

            if !succeeded {
                self.kill_outgoing(&plan.target);
            } else if let Some(route) = route {
                self.apply_route(&plan.target, &route);
            }
            contributions.push(output);
        }

        if self.cancel.is_cancelled() {
            return self.halt(record.fail(CANCELLED), NodeflowError::Cancelled);
        }

        let merged = merge_outputs(config.merge_strategy, &contributions);
        let result = record.succeed(&ExecutorOutput::text(merged.clone()));
        self.complete(&node.id, result, merged, None);

        for plan in &selection.branches {
            self.enqueue_ready_successors(&plan.target, queue);
        }
        self.enqueue_ready_successors(&node.id, queue);
        Flow::Continue
    }

    /// One branch of a fan-out. Failures are contained here.
    async fn run_branch(&self, parent_id: &str, plan: &BranchPlan, input: &MergedInput) -> BranchOutcome {
        let graph = self.graph;
        let step = match graph.node(&plan.target) {
            Some(target) if target.kind == kinds::LOOP || target.kind == kinds::PARALLEL => {
                let mut record = NodeResult::running(target.id.clone());
                record.branch_index = Some(plan.index);
                Self::nested_control_flow(target, parent_id, record)
            }
            Some(target) => {
                self.execute_step(target, input.clone(), None, Some(plan.index), None)
                    .await
            }
            None => {
                let error = NodeflowError::InvalidGraph(format!("unknown node '{}'", plan.target));
                Step::Failed {
                    result: NodeResult::running(plan.target.clone()).fail(error.to_string()),
                    error,
                }
            }
        };

        match step {
            Step::Done {
                result,
                forward,
                route,
            } => BranchOutcome {
                plan: plan.clone(),
                result,
                output: forward,
                route,
            },
            Step::Failed { result, error } => {
                warn!(
                    parallel_id = %parent_id,
                    branch = plan.index,
                    node_id = %plan.target,
                    error = %error,
                    "Parallel branch failed"
                );
                BranchOutcome {
                    plan: plan.clone(),
                    result,
                    output: String::new(),
                    route: None,
                }
            }
        }
    }
}
