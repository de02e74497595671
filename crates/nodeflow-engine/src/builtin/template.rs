use futures::future::BoxFuture;
use regex::Regex;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{ExecutorOutput, Node};

use super::required_str;

/// Renders `config.template`.
///
/// `{{input}}` is replaced with the node's input and `{{state.KEY}}` with a
/// shared-state value (empty when unset).
pub struct TemplateExecutor;

impl NodeExecutor for TemplateExecutor {
    fn kind(&self) -> &str {
        "template"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let template = required_str(node, "template")?;
            let snapshot = ctx.state.snapshot().await;

            let re = Regex::new(r"\{\{\s*(?:state\.([A-Za-z0-9_.-]+)|input)\s*\}\}")
                .map_err(|e| NodeflowError::executor("template", e.to_string()))?;
            // One pass, so substituted text is never expanded again.
            let rendered = re.replace_all(template, |caps: &regex::Captures| {
                let Some(key) = caps.get(1) else {
                    return input.clone();
                };
                match snapshot.get(key.as_str()) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                }
            });
            Ok(ExecutorOutput::text(rendered.into_owned()))
        })
    }
}
