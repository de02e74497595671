use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use nodeflow_core::config::EngineConfig;
use nodeflow_core::error::Result;
use nodeflow_core::event::EventBus;
use nodeflow_core::state::SharedState;
use nodeflow_core::types::{Graph, RunId, RunResponse};

use crate::graph::GraphModel;
use crate::registry::ExecutorRegistry;
use crate::scheduler::Scheduler;
use crate::topo::topological_order;

/// Entry point for running graphs.
///
/// Holds the executor registry and configuration; every call to [`Engine::run`]
/// is an independent run with its own state.
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    event_bus: Option<Arc<EventBus>>,
}

/// Per-run knobs beyond the graph itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Defaults to a fresh random id.
    pub run_id: Option<RunId>,
    pub cancel: CancellationToken,
    /// Initial shared state, visible to every executor of the run.
    pub state: SharedState,
}

impl Engine {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config: EngineConfig::default(),
            event_bus: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub async fn run(&self, graph: Graph) -> Result<RunResponse> {
        self.run_with(graph, RunOptions::default()).await
    }

    pub async fn run_with_cancel(
        &self,
        graph: Graph,
        cancel: CancellationToken,
    ) -> Result<RunResponse> {
        let options = RunOptions {
            cancel,
            ..Default::default()
        };
        self.run_with(graph, options).await
    }

    /// Run a graph.
    ///
    /// Structural problems (unknown endpoints, duplicate ids) are returned as
    /// `Err`. Everything that happens once the graph is accepted, including a
    /// cycle, is reported through the response.
    pub async fn run_with(&self, graph: Graph, options: RunOptions) -> Result<RunResponse> {
        let model = GraphModel::new(graph)?;
        let run_id = options.run_id.unwrap_or_default();

        let scheduler = Scheduler::new(&model, self.registry.clone(), &self.config, run_id)
            .with_events(self.event_bus.clone())
            .with_cancel(options.cancel)
            .with_shared_state(options.state);

        let order = match topological_order(&model) {
            Ok(order) => order,
            Err(cycle) => return Ok(scheduler.reject_cycle(cycle)),
        };

        let response = if model.has_dynamic_nodes() {
            debug!("Graph has loop or parallel nodes, using the task queue");
            scheduler.run_dynamic().await
        } else {
            scheduler.run_static(&order).await
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::{AbortReason, Edge, Node, RunStatus};

    fn engine() -> Engine {
        Engine::new(ExecutorRegistry::with_builtins())
    }

    fn text(id: &str, value: &str) -> Node {
        Node::new(id, "text").with_config(serde_json::json!({ "text": value }))
    }

    #[tokio::test]
    async fn test_linear_graph_with_builtins() {
        let graph = Graph::new(
            vec![
                text("a", "hello"),
                Node::new("b", "template")
                    .with_config(serde_json::json!({"template": "{{input}} world"})),
                Node::new("c", "output"),
            ],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        );

        let resp = engine().run(graph).await.unwrap();
        assert_eq!(resp.status, RunStatus::Success);
        assert_eq!(resp.output("c"), Some("hello world"));
        assert_eq!(resp.execution_order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_graph_is_err() {
        let graph = Graph::new(vec![text("a", "x")], vec![Edge::new("a", "missing")]);
        assert!(engine().run(graph).await.is_err());
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_running() {
        let graph = Graph::new(
            vec![text("a", "x"), text("b", "y")],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        );
        let resp = engine().run(graph).await.unwrap();
        assert_eq!(resp.status, RunStatus::Error);
        assert!(resp.node_results.is_empty());
        assert!(matches!(
            resp.abort_reason,
            Some(AbortReason::CycleDetected { ref node_ids }) if node_ids == &["a", "b"]
        ));
    }

    #[tokio::test]
    async fn test_explicit_run_id_and_state() {
        let state = SharedState::new();
        state.set("who", serde_json::json!("ada")).await;
        let graph = Graph::new(
            vec![Node::new("g", "state_get").with_config(serde_json::json!({"key": "who"}))],
            vec![],
        );
        let options = RunOptions {
            run_id: Some(RunId::from_str("fixed")),
            state,
            ..Default::default()
        };
        let resp = engine().run_with(graph, options).await.unwrap();
        assert_eq!(resp.run_id.0, "fixed");
        assert_eq!(resp.output("g"), Some("ada"));
    }
}
