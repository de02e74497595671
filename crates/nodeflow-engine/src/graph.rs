use std::collections::{HashMap, HashSet};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::{kinds, Edge, Graph, Node};

/// Immutable, indexed view of one run's graph.
///
/// Nodes and edges keep their declaration order; every lookup that returns
/// several items returns them in that order.
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_index: HashMap<String, usize>,
    /// node_id -> indices into `edges`, outgoing.
    outgoing: HashMap<String, Vec<usize>>,
    /// node_id -> indices into `edges`, incoming.
    incoming: HashMap<String, Vec<usize>>,
}

impl GraphModel {
    /// Build and validate the model.
    ///
    /// Rejects duplicate node ids, duplicate edge ids and edges whose
    /// endpoints do not exist.
    pub fn new(graph: Graph) -> Result<Self> {
        let Graph { nodes, edges } = graph;

        let mut node_index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), i).is_some() {
                return Err(NodeflowError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let mut edge_ids = HashSet::with_capacity(edges.len());
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(NodeflowError::InvalidGraph(format!(
                    "duplicate edge id '{}'",
                    edge.id
                )));
            }
            for endpoint in [&edge.source_node_id, &edge.target_node_id] {
                if !node_index.contains_key(endpoint) {
                    return Err(NodeflowError::InvalidGraph(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
            outgoing
                .entry(edge.source_node_id.clone())
                .or_default()
                .push(i);
            incoming
                .entry(edge.target_node_id.clone())
                .or_default()
                .push(i);
        }

        Ok(Self {
            nodes,
            edges,
            node_index,
            outgoing,
            incoming,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Declaration position of a node.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Outgoing edges leaving through `handle`.
    pub fn outgoing_with_handle<'a>(
        &'a self,
        id: &str,
        handle: &'a str,
    ) -> impl Iterator<Item = &'a Edge> {
        self.outgoing(id).filter(move |e| e.handle() == Some(handle))
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.incoming.get(id).map_or(0, Vec::len)
    }

    /// Nodes without incoming edges, in declaration order.
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| self.in_degree(&n.id) == 0)
            .collect()
    }

    /// Whether the graph needs the dynamic scheduler (loop or parallel nodes).
    pub fn has_dynamic_nodes(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.kind == kinds::LOOP || n.kind == kinds::PARALLEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&str, &str)], edges: Vec<Edge>) -> Graph {
        Graph::new(
            nodes.iter().map(|(id, kind)| Node::new(*id, *kind)).collect(),
            edges,
        )
    }

    #[test]
    fn test_indexes_edges_in_declaration_order() {
        let model = GraphModel::new(graph(
            &[("a", "text"), ("b", "text"), ("c", "text")],
            vec![Edge::new("a", "c"), Edge::new("b", "c"), Edge::new("a", "b")],
        ))
        .unwrap();

        let into_c: Vec<_> = model.incoming("c").map(|e| e.source_node_id.as_str()).collect();
        assert_eq!(into_c, vec!["a", "b"]);
        let from_a: Vec<_> = model.outgoing("a").map(|e| e.target_node_id.as_str()).collect();
        assert_eq!(from_a, vec!["c", "b"]);
        assert_eq!(model.in_degree("c"), 2);
        assert_eq!(model.entry_nodes().len(), 1);
        assert_eq!(model.position("b"), Some(1));
    }

    #[test]
    fn test_rejects_unknown_endpoint() {
        let err = GraphModel::new(graph(&[("a", "text")], vec![Edge::new("a", "ghost")]))
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = GraphModel::new(graph(&[("a", "text"), ("a", "text")], vec![])).unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));

        let err = GraphModel::new(graph(
            &[("a", "text"), ("b", "text")],
            vec![Edge::new("a", "b"), Edge::new("a", "b")],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate edge id"));
    }

    #[test]
    fn test_handles_and_dynamic_detection() {
        let model = GraphModel::new(graph(
            &[("c", "condition"), ("t", "text"), ("f", "text")],
            vec![
                Edge::with_handle("c", "true", "t"),
                Edge::with_handle("c", "false", "f"),
            ],
        ))
        .unwrap();
        let t: Vec<_> = model.outgoing_with_handle("c", "true").collect();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].target_node_id, "t");
        assert!(!model.has_dynamic_nodes());

        let looped = GraphModel::new(graph(&[("l", "loop")], vec![])).unwrap();
        assert!(looped.has_dynamic_nodes());
    }
}
