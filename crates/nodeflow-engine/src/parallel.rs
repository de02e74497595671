//! Parallel fan-out: branch selection, scatter-gather, and merge strategies.

use std::collections::HashSet;
use std::future::Future;

use serde::Deserialize;

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::{handles, Edge, Node, NodeResult};

use crate::graph::GraphModel;

/// Joins branch outputs for the `all` strategy.
pub const BRANCH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Every branch output in declared order.
    #[default]
    All,
    /// Branch 1's output, whatever the others produced.
    First,
    /// The first non-empty output in declared order.
    Any,
}

/// `config` of a `parallel` node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelNodeConfig {
    /// Defaults to every branch candidate (still capped).
    #[serde(default)]
    pub branch_count: Option<usize>,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
}

impl ParallelNodeConfig {
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

/// One branch to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPlan {
    /// 0-based, in edge declaration order.
    pub index: usize,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct BranchSelection {
    pub branches: Vec<BranchPlan>,
    /// Candidate edges beyond the branch budget; they are never followed.
    pub surplus: Vec<Edge>,
}

fn is_branch_candidate(edge: &Edge) -> bool {
    matches!(edge.handle(), None | Some(handles::BRANCH))
}

/// Pick the branches of a parallel node.
///
/// Candidates are outgoing edges without a handle (or with handle `branch`),
/// one per distinct target, in declaration order; the first
/// `min(branch_count, max_branches)` are dispatched.
pub fn select_branches(
    graph: &GraphModel,
    parallel_id: &str,
    branch_count: Option<usize>,
    max_branches: usize,
) -> BranchSelection {
    let limit = branch_count.unwrap_or(max_branches).min(max_branches);
    let mut seen = HashSet::new();
    let mut selection = BranchSelection::default();

    for edge in graph.outgoing(parallel_id).filter(|e| is_branch_candidate(e)) {
        let fresh = seen.insert(edge.target_node_id.clone());
        if fresh && selection.branches.len() < limit {
            selection.branches.push(BranchPlan {
                index: selection.branches.len(),
                target: edge.target_node_id.clone(),
            });
        } else if !selection
            .branches
            .iter()
            .any(|b| b.target == edge.target_node_id)
        {
            selection.surplus.push(edge.clone());
        }
    }

    selection
}

/// Settled branch: its dispatch record and what it contributes to the merge.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub plan: BranchPlan,
    pub result: NodeResult,
    /// Empty when the branch failed.
    pub output: String,
    pub route: Option<String>,
}

/// Dispatch every branch concurrently and wait for all of them to settle.
///
/// Outcomes come back in branch order regardless of completion order.
pub async fn scatter_gather<'a, F, Fut, T>(branches: &'a [BranchPlan], dispatch: F) -> Vec<T>
where
    F: Fn(&'a BranchPlan) -> Fut,
    Fut: Future<Output = T>,
{
    futures::future::join_all(branches.iter().map(dispatch)).await
}

/// Combine branch outputs per strategy. `outputs` are in branch order.
pub fn merge_outputs(strategy: MergeStrategy, outputs: &[String]) -> String {
    match strategy {
        MergeStrategy::All => outputs.join(BRANCH_SEPARATOR),
        MergeStrategy::First => outputs.first().cloned().unwrap_or_default(),
        MergeStrategy::Any => outputs
            .iter()
            .find(|o| !o.trim().is_empty())
            .cloned()
            .unwrap_or_default(),
    }
}
