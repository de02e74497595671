//! Loop expander: turns one loop node into a sequence of iteration dispatches.

use std::time::{Duration, Instant};

use serde::Deserialize;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::{Node, NodeResult};

use crate::condition::{evaluate_condition, Vars};

/// Joins iteration outputs into the loop node's final output.
pub const ITERATION_SEPARATOR: &str = "\n\n--- iteration ---\n\n";
/// Joins the outputs of several body nodes within one iteration.
pub const BODY_SEPARATOR: &str = "\n";

const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Count,
    Foreach,
    While,
}

/// `config` of a `loop` node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopNodeConfig {
    #[serde(default)]
    pub mode: LoopMode,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl LoopNodeConfig {
    pub fn from_node(node: &Node) -> Result<Self> {
        if node.config.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(node.config.clone()).map_err(|e| {
            NodeflowError::InvalidNodeConfig {
                node_id: node.id.clone(),
                message: e.to_string(),
            }
        })
    }
}

/// Split a `foreach` input into iteration items: trimmed, empties dropped.
pub fn split_items(input: &str, delimiter: Option<&str>) -> Vec<String> {
    let delimiter = match delimiter {
        None | Some("") => ",",
        Some("\\n") => "\n",
        Some("\\t") => "\t",
        Some(other) => other,
    };
    input
        .split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Items or iteration budget exhausted.
    Exhausted,
    /// A `while` condition evaluated false.
    ConditionFalse,
    /// The wall-clock budget ran out.
    TimedOut,
}

/// Per-instance loop bookkeeping, owned by the scheduler while the loop runs.
#[derive(Debug)]
pub struct LoopState {
    pub loop_id: String,
    mode: LoopMode,
    input: String,
    items: Vec<String>,
    max_iterations: usize,
    condition: Option<String>,
    next_index: usize,
    outputs: Vec<String>,
    /// Body nodes of the in-flight iteration, in edge order.
    bodies: Vec<String>,
    /// Bodies of the in-flight iteration that have not reported yet.
    pending: Vec<String>,
    /// Outputs reported so far for the in-flight iteration.
    current: Vec<(String, String)>,
    started: Instant,
    timeout: Duration,
    /// Dispatch record of the loop node itself.
    pub record: NodeResult,
}

impl LoopState {
    pub fn new(
        node: &Node,
        input: String,
        max_iterations_cap: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let config = LoopNodeConfig::from_node(node)?;
        let cap = max_iterations_cap.max(1);

        let (items, max_iterations) = match config.mode {
            LoopMode::Foreach => {
                let mut items = split_items(&input, config.delimiter.as_deref());
                items.truncate(config.max_iterations.unwrap_or(cap).min(cap));
                let n = items.len();
                (items, n)
            }
            LoopMode::Count | LoopMode::While => (
                Vec::new(),
                config
                    .max_iterations
                    .unwrap_or(DEFAULT_MAX_ITERATIONS)
                    .min(cap),
            ),
        };

        Ok(Self {
            loop_id: node.id.clone(),
            mode: config.mode,
            input,
            items,
            max_iterations,
            condition: config.condition,
            next_index: 0,
            outputs: Vec::new(),
            bodies: Vec::new(),
            pending: Vec::new(),
            current: Vec::new(),
            started: Instant::now(),
            timeout,
            record: NodeResult::running(node.id.clone()),
        })
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    /// Iteration count when known up front (`count`, `foreach`).
    pub fn planned_count(&self) -> Option<usize> {
        match self.mode {
            LoopMode::While => None,
            _ => Some(self.max_iterations),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    /// Plan the next iteration: `Ok((index, input))`, or why the loop is over.
    pub fn next_iteration(&mut self) -> std::result::Result<(usize, String), LoopExit> {
        if self.is_expired() {
            return Err(LoopExit::TimedOut);
        }
        let index = self.next_index;
        if index >= self.max_iterations {
            return Err(LoopExit::Exhausted);
        }

        let item = match self.mode {
            LoopMode::Foreach => self.items[index].clone(),
            LoopMode::Count => self.input.clone(),
            LoopMode::While => {
                if let Some(condition) = &self.condition {
                    if !evaluate_condition(condition, &self.condition_vars(index)) {
                        return Err(LoopExit::ConditionFalse);
                    }
                }
                self.input.clone()
            }
        };

        self.next_index += 1;
        Ok((index, item))
    }

    fn condition_vars(&self, index: usize) -> Vars {
        let last_output = self.outputs.last().cloned().unwrap_or_default();
        Vars::from([
            ("index".to_string(), serde_json::json!(index)),
            ("iteration".to_string(), serde_json::json!(index + 1)),
            ("input".to_string(), serde_json::json!(self.input)),
            ("lastOutput".to_string(), serde_json::json!(last_output)),
            (
                "isEmpty".to_string(),
                serde_json::json!(self.input.trim().is_empty()),
            ),
        ])
    }

    /// Start waiting for the given body nodes to report for this iteration.
    pub fn begin_iteration(&mut self, bodies: Vec<String>) {
        self.pending = bodies.clone();
        self.bodies = bodies;
        self.current.clear();
    }

    pub fn awaiting(&self, body_id: &str) -> bool {
        self.pending.iter().any(|b| b == body_id)
    }

    /// Record one body's output. Returns `true` once the iteration is complete,
    /// at which point its outputs, joined in body order, have been appended.
    pub fn record_body(&mut self, body_id: &str, output: String) -> bool {
        let Some(pos) = self.pending.iter().position(|b| b == body_id) else {
            return false;
        };
        self.pending.remove(pos);
        self.current.push((body_id.to_string(), output));

        if !self.pending.is_empty() {
            return false;
        }
        let bodies = &self.bodies;
        self.current
            .sort_by_key(|(id, _)| bodies.iter().position(|b| b == id));
        let joined = self
            .current
            .drain(..)
            .map(|(_, out)| out)
            .collect::<Vec<_>>()
            .join(BODY_SEPARATOR);
        self.outputs.push(joined);
        true
    }

    /// Append an iteration output directly (loops without body nodes).
    pub fn push_output(&mut self, output: String) {
        self.outputs.push(output);
    }

    /// Iterations planned so far, finished or not.
    pub fn dispatched_iterations(&self) -> usize {
        self.next_index
    }

    pub fn completed_iterations(&self) -> usize {
        self.outputs.len()
    }

    pub fn iteration_outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn merged_output(&self) -> String {
        self.outputs.join(ITERATION_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_node(config: serde_json::Value) -> Node {
        Node::new("loop", "loop").with_config(config)
    }

    fn state(config: serde_json::Value, input: &str) -> LoopState {
        LoopState::new(&loop_node(config), input.into(), 100, Duration::from_secs(30)).unwrap()
    }

    fn drain(state: &mut LoopState) -> (Vec<String>, LoopExit) {
        let mut items = Vec::new();
        loop {
            match state.next_iteration() {
                Ok((i, item)) => {
                    assert_eq!(i, items.len());
                    state.push_output(format!("out:{}", item));
                    items.push(item);
                }
                Err(exit) => return (items, exit),
            }
        }
    }

    #[test]
    fn test_split_items() {
        assert_eq!(split_items(" a, b ,,c ", Some(",")), vec!["a", "b", "c"]);
        assert_eq!(split_items("x\ny\n\n", Some("\\n")), vec!["x", "y"]);
        assert_eq!(split_items("1;2", Some(";")), vec!["1", "2"]);
        assert!(split_items("  ", None).is_empty());
    }

    #[test]
    fn test_foreach_yields_each_item() {
        let mut s = state(serde_json::json!({"mode": "foreach", "delimiter": ","}), "a,b,c");
        assert_eq!(s.planned_count(), Some(3));
        let (items, exit) = drain(&mut s);
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(exit, LoopExit::Exhausted);
        assert_eq!(
            s.merged_output(),
            format!("out:a{sep}out:b{sep}out:c", sep = ITERATION_SEPARATOR)
        );
    }

    #[test]
    fn test_count_repeats_input() {
        let mut s = state(serde_json::json!({"mode": "count", "maxIterations": 5}), "same");
        let (items, _) = drain(&mut s);
        assert_eq!(items, vec!["same"; 5]);
    }

    #[test]
    fn test_max_iterations_is_capped() {
        let node = loop_node(serde_json::json!({"mode": "count", "maxIterations": 5000}));
        let mut s = LoopState::new(&node, "x".into(), 100, Duration::from_secs(30)).unwrap();
        assert_eq!(s.planned_count(), Some(100));
        assert_eq!(drain(&mut s).0.len(), 100);

        let mut s = state(
            serde_json::json!({"mode": "foreach", "maxIterations": 2}),
            "a,b,c",
        );
        assert_eq!(drain(&mut s).0, vec!["a", "b"]);
    }

    #[test]
    fn test_while_stops_on_condition() {
        let mut s = state(
            serde_json::json!({"mode": "while", "maxIterations": 10, "condition": "index < 3"}),
            "in",
        );
        assert_eq!(s.planned_count(), None);
        let (items, exit) = drain(&mut s);
        assert_eq!(items.len(), 3);
        assert_eq!(exit, LoopExit::ConditionFalse);
    }

    #[test]
    fn test_while_sees_last_output() {
        let mut s = state(
            serde_json::json!({"mode": "while", "maxIterations": 10,
                "condition": "iteration == 1 || lastOutput not_empty"}),
            "in",
        );
        assert!(s.next_iteration().is_ok());
        s.push_output(String::new());
        assert_eq!(s.next_iteration(), Err(LoopExit::ConditionFalse));
    }

    #[test]
    fn test_expired_loop_stops() {
        let node = loop_node(serde_json::json!({"mode": "count", "maxIterations": 3}));
        let mut s = LoopState::new(&node, "x".into(), 100, Duration::ZERO).unwrap();
        assert!(s.is_expired());
        assert_eq!(s.next_iteration(), Err(LoopExit::TimedOut));
    }

    #[test]
    fn test_iteration_completes_after_all_bodies() {
        let mut s = state(serde_json::json!({"mode": "count", "maxIterations": 1}), "x");
        s.begin_iteration(vec!["b1".into(), "b2".into()]);
        assert!(s.awaiting("b2"));
        assert!(!s.record_body("b2", "two".into()));
        assert!(!s.record_body("ghost", "?".into()));
        assert!(s.record_body("b1", "one".into()));
        assert_eq!(s.iteration_outputs(), &["one\ntwo".to_string()]);
    }

    #[test]
    fn test_invalid_config() {
        let node = loop_node(serde_json::json!({"mode": "forever"}));
        let err = LoopState::new(&node, String::new(), 100, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, NodeflowError::InvalidNodeConfig { .. }));
    }
}
