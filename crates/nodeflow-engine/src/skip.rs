use std::collections::HashSet;

use nodeflow_core::types::Edge;

use crate::graph::GraphModel;

/// Tracks pruned branches: dead edges and the nodes they leave unreachable.
///
/// An edge is live unless it was killed (not-taken branch) or its source is
/// skipped. A node is skipped only once none of its incoming edges is live, so
/// a merge point still fed by the taken branch keeps running.
#[derive(Debug, Default)]
pub struct BranchSkipTracker {
    skipped: HashSet<String>,
    dead_edges: HashSet<String>,
}

impl BranchSkipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self, node_id: &str) -> bool {
        self.skipped.contains(node_id)
    }

    pub fn is_dead(&self, edge: &Edge) -> bool {
        self.dead_edges.contains(&edge.id)
    }

    pub fn is_live(&self, edge: &Edge) -> bool {
        !self.is_dead(edge) && !self.is_skipped(&edge.source_node_id)
    }

    pub fn has_live_input(&self, graph: &GraphModel, node_id: &str) -> bool {
        graph.incoming(node_id).any(|e| self.is_live(e))
    }

    /// Kill an edge. Returns the nodes that became skipped as a consequence.
    pub fn kill_edge(&mut self, graph: &GraphModel, edge: &Edge) -> Vec<String> {
        self.dead_edges.insert(edge.id.clone());
        let target = edge.target_node_id.as_str();
        if self.is_skipped(target) || self.has_live_input(graph, target) {
            return Vec::new();
        }
        self.mark_skipped(graph, target)
    }

    /// Mark `start` skipped and walk everything reachable from it that has no
    /// live input left. Idempotent; returns only newly skipped ids.
    pub fn mark_skipped(&mut self, graph: &GraphModel, start: &str) -> Vec<String> {
        let mut newly = Vec::new();
        let mut stack = vec![start.to_string()];

        while let Some(id) = stack.pop() {
            if !self.skipped.insert(id.clone()) {
                continue;
            }
            for edge in graph.outgoing(&id) {
                let target = &edge.target_node_id;
                if !self.is_skipped(target) && !self.has_live_input(graph, target) {
                    stack.push(target.clone());
                }
            }
            newly.push(id);
        }

        newly
    }

    /// All skipped ids in declaration order.
    pub fn skipped_ids(&self, graph: &GraphModel) -> Vec<String> {
        graph
            .nodes()
            .iter()
            .filter(|n| self.is_skipped(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }
}
