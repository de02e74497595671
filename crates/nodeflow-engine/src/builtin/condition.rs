use futures::future::BoxFuture;

use nodeflow_core::error::Result;
use nodeflow_core::traits::{ExecutionContext, NodeExecutor};
use nodeflow_core::types::{kinds, ExecutorOutput, Node};

use super::required_str;
use crate::condition::{evaluate_condition, Vars};

/// Evaluates `config.expression` against `{input}` and emits `true`/`false`.
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn kind(&self) -> &str {
        kinds::CONDITION
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        input: String,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<ExecutorOutput>> {
        Box::pin(async move {
            let expression = required_str(node, "expression")?;
            let vars = Vars::from([("input".to_string(), serde_json::Value::String(input))]);
            let verdict = evaluate_condition(expression, &vars);
            Ok(ExecutorOutput::text(verdict.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::RunId;

    async fn eval(expression: &str, input: &str) -> String {
        let ctx = ExecutionContext::new(RunId::new(), "c");
        let node = Node::new("c", "condition")
            .with_config(serde_json::json!({ "expression": expression }));
        ConditionExecutor
            .execute(&node, input.into(), ctx)
            .await
            .unwrap()
            .output
    }

    #[tokio::test]
    async fn test_expression_against_input() {
        assert_eq!(eval(r#"input contains "ok""#, "all ok").await, "true");
        assert_eq!(eval(r#"input == "yes""#, "no").await, "false");
        assert_eq!(eval("input > 10", "42").await, "true");
    }
}
