use std::collections::{BTreeSet, HashMap};

use crate::graph::GraphModel;

/// Nodes that never reached in-degree zero: they sit on (or behind) a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDetected {
    /// Unscheduled node ids, in declaration order.
    pub node_ids: Vec<String>,
}

impl std::fmt::Display for CycleDetected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle detected among: {}", self.node_ids.join(", "))
    }
}

/// Topological sort using Kahn's algorithm.
///
/// Among nodes that are ready at the same time, the one declared first runs
/// first, so the order is stable for a given graph.
///
/// # Time Complexity
///
/// O((V + E) log V) where V = number of nodes, E = number of edges
pub fn topological_order(graph: &GraphModel) -> Result<Vec<String>, CycleDetected> {
    let nodes = graph.nodes();
    let mut in_degree: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.in_degree(&n.id)))
        .collect();

    // Ready set keyed by declaration position.
    let mut ready: BTreeSet<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| in_degree[n.id.as_str()] == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(pos) = ready.pop_first() {
        let id = nodes[pos].id.as_str();
        order.push(id.to_string());

        for edge in graph.outgoing(id) {
            let target = edge.target_node_id.as_str();
            if let Some(degree) = in_degree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    if let Some(target_pos) = graph.position(target) {
                        ready.insert(target_pos);
                    }
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let node_ids = nodes
        .iter()
        .filter(|n| in_degree[n.id.as_str()] > 0)
        .map(|n| n.id.clone())
        .collect();
    Err(CycleDetected { node_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::{Edge, Graph, Node};

    fn model(ids: &[&str], edges: &[(&str, &str)]) -> GraphModel {
        GraphModel::new(Graph::new(
            ids.iter().map(|id| Node::new(*id, "text")).collect(),
            edges.iter().map(|(a, b)| Edge::new(*a, *b)).collect(),
        ))
        .unwrap()
    }

    fn assert_linear_extension(graph: &GraphModel, order: &[String]) {
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for edge in graph.edges() {
            assert!(
                pos(&edge.source_node_id) < pos(&edge.target_node_id),
                "{} must precede {}",
                edge.source_node_id,
                edge.target_node_id
            );
        }
    }

    #[test]
    fn test_diamond_is_linear_extension() {
        let g = model(
            &["d", "b", "c", "a"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let order = topological_order(&g).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_linear_extension(&g, &order);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let g = model(&["z", "y", "x"], &[]);
        assert_eq!(topological_order(&g).unwrap(), vec!["z", "y", "x"]);

        // x becomes ready after z, but was declared before w.
        let g = model(&["z", "x", "w"], &[("z", "x")]);
        assert_eq!(topological_order(&g).unwrap(), vec!["z", "x", "w"]);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let g = model(
            &["a", "b", "c", "d", "e"],
            &[("a", "c"), ("b", "c"), ("c", "d"), ("b", "e")],
        );
        let first = topological_order(&g).unwrap();
        for _ in 0..10 {
            assert_eq!(topological_order(&g).unwrap(), first);
        }
        assert_linear_extension(&g, &first);
    }

    #[test]
    fn test_cycle_reports_unscheduled_nodes() {
        let g = model(
            &["start", "a", "b", "after"],
            &[("start", "a"), ("a", "b"), ("b", "a"), ("b", "after")],
        );
        let err = topological_order(&g).unwrap_err();
        assert_eq!(err.node_ids, vec!["a", "b", "after"]);
        assert!(err.to_string().contains("a, b, after"));
    }

    #[test]
    fn test_empty_graph() {
        let g = model(&[], &[]);
        assert!(topological_order(&g).unwrap().is_empty());
    }
}
