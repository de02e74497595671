use futures::future::BoxFuture;

use nodeflow_core::error::Result;
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{ExecutorOutput, Node};

use super::config_str;

/// Emits `config.text`, or passes its input through when unset.
pub struct TextExecutor;

impl NodeExecutor for TextExecutor {
    fn kind(&self) -> &str {
        "text"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let output = config_str(node, "text").map(str::to_string).unwrap_or(input);
            Ok(ExecutorOutput::text(output))
        })
    }
}

/// Terminal pass-through.
pub struct OutputExecutor;

impl NodeExecutor for OutputExecutor {
    fn kind(&self) -> &str {
        "output"
    }

    fn execute<'a>(
        &'a self,
        _node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move { Ok(ExecutorOutput::text(input)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::RunId;

    #[tokio::test]
    async fn test_text_prefers_config() {
        let ctx = ExecutionContext::new(RunId::new(), "t");
        let node = Node::new("t", "text").with_config(serde_json::json!({"text": "fixed"}));
        let out = TextExecutor.execute(&node, "in".into(), ctx.clone()).await.unwrap();
        assert_eq!(out.output, "fixed");

        let bare = Node::new("t", "text");
        let out = TextExecutor.execute(&bare, "in".into(), ctx).await.unwrap();
        assert_eq!(out.output, "in");
    }

    #[tokio::test]
    async fn test_output_passes_through() {
        let ctx = ExecutionContext::new(RunId::new(), "o");
        let node = Node::new("o", "output");
        let out = OutputExecutor.execute(&node, " a\nb ".into(), ctx).await.unwrap();
        assert_eq!(out.output, " a\nb ");
    }
}
