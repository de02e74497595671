use std::time::Duration;

use futures::future::BoxFuture;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{ExecutorOutput, Node};

/// Sleeps `config.ms` milliseconds, then passes its input through.
pub struct WaitExecutor;

impl NodeExecutor for WaitExecutor {
    fn kind(&self) -> &str {
        "wait"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let ms = node.config.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::select! {
                _ = ctx.cancel.cancelled() => Err(NodeflowError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(ExecutorOutput::text(input)),
            }
        })
    }
}
