use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{ExecutorOutput, Node};

/// Registry of node executors, keyed by node kind.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor. A later registration for the same kind wins.
    pub fn register(&mut self, executor: impl NodeExecutor) {
        self.register_arc(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn NodeExecutor>) {
        let kind = executor.kind().to_string();
        self.executors.insert(kind, executor);
    }

    pub fn unregister(&mut self, kind: &str) -> bool {
        self.executors.remove(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Execute a node with the executor registered for its kind.
    ///
    /// The call is bounded by the executor's own timeout, or `default_timeout_secs`.
    pub async fn execute(
        &self,
        node: &Node,
        input: String,
        ctx: ExecutionContext,
        default_timeout_secs: u64,
    ) -> Result<ExecutorOutput> {
        let executor = self
            .get(&node.kind)
            .ok_or_else(|| NodeflowError::ExecutorNotFound(node.kind.clone()))?;

        let timeout_secs = executor.timeout_secs().unwrap_or(default_timeout_secs);
        let timeout = Duration::from_secs(timeout_secs);

        match tokio::time::timeout(timeout, executor.execute(node, input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(NodeflowError::ExecutorTimeout {
                kind: node.kind.clone(),
                timeout_secs,
            }),
        }
    }

    /// Create a registry with all built-in executors registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(crate::builtin::text::TextExecutor);
        registry.register(crate::builtin::text::OutputExecutor);
        registry.register(crate::builtin::template::TemplateExecutor);
        registry.register(crate::builtin::condition::ConditionExecutor);
        registry.register(crate::builtin::wait::WaitExecutor);
        registry.register(crate::builtin::state::StateSetExecutor);
        registry.register(crate::builtin::state::StateGetExecutor);

        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
