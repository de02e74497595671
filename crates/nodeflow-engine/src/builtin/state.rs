use futures::future::BoxFuture;

use nodeflow_core::error::Result;
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{ExecutorOutput, Node};

use super::required_str;

/// Writes `config.value` (or the input) to the shared state under
/// `config.key`, then passes the input through.
pub struct StateSetExecutor;

impl NodeExecutor for StateSetExecutor {
    fn kind(&self) -> &str {
        "state_set"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let key = required_str(node, "key")?;
            let value = node
                .config
                .get("value")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::String(input.clone()));
            ctx.state.set(key, value).await;
            Ok(ExecutorOutput::text(input))
        })
    }
}

/// Emits the shared-state value under `config.key`, or `config.default`.
pub struct StateGetExecutor;

impl NodeExecutor for StateGetExecutor {
    fn kind(&self) -> &str {
        "state_get"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        _input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let key = required_str(node, "key")?;
            let output = match ctx.state.get_string(key).await {
                Some(value) => value,
                None => super::config_str(node, "default").unwrap_or_default().to_string(),
            };
            Ok(ExecutorOutput::text(output))
        })
    }
}
