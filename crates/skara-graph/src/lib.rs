//! Small directed-graph utility with topological ordering.
//!
//! This crate is deliberately generic: nodes carry an arbitrary payload and
//! edges are plain `from -> to` ordering constraints. The only algorithm it
//! ships is Kahn's topological sort, which is what the ECS scheduler needs
//! to turn declared dependencies into a linear execution order. Cycles are
//! reported as an error value carrying one node on the offending cycle.

#![deny(unsafe_code)]

use std::collections::VecDeque;

use thiserror::Error;

/// Errors produced by graph algorithms.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The graph contains at least one cycle; no topological order exists.
    /// Carries the id of one node that is part of a cycle.
    #[error("graph contains a cycle through node {0:?}")]
    Cycle(NodeId),
}

/// Index-based node handle. Stable for the lifetime of the graph; nodes are
/// never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A directed graph with payload-carrying nodes and unweighted edges.
#[derive(Debug)]
pub struct Graph<N> {
    nodes: Vec<N>,
    // Outgoing adjacency, parallel to `nodes`.
    edges: Vec<Vec<NodeId>>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Graph<N> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, payload: N) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(payload);
        self.edges.push(Vec::new());
        id
    }

    /// Adds the ordering constraint `from` before `to`. Duplicate edges are
    /// collapsed; self-edges are rejected in debug builds (they would make
    /// every sort fail, which is never what a caller meant).
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        debug_assert!(from != to, "self-edge on {from:?}");
        debug_assert!(from.index() < self.nodes.len() && to.index() < self.nodes.len());
        let out = &mut self.edges[from.index()];
        if !out.contains(&to) {
            out.push(to);
        }
    }

    pub fn node(&self, id: NodeId) -> &N {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut N {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Kahn's algorithm. The returned order is deterministic: among nodes
    /// whose dependencies are all satisfied, lower insertion ids come first.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for out in &self.edges {
            for &to in out {
                in_degree[to.index()] += 1;
            }
        }

        let mut ready: VecDeque<NodeId> = self
            .node_ids()
            .filter(|id| in_degree[id.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for &to in &self.edges[id.index()] {
                in_degree[to.index()] -= 1;
                if in_degree[to.index()] == 0 {
                    ready.push_back(to);
                }
            }
        }

        if order.len() != self.nodes.len() {
            // Any node with a remaining in-degree sits on or behind a cycle;
            // report the lowest id among them.
            let stuck = self
                .node_ids()
                .find(|id| in_degree[id.index()] > 0)
                .unwrap_or(NodeId(0));
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn empty_graph_sorts_empty() {
        let g: Graph<()> = Graph::new();
        assert_eq!(g.topological_order().unwrap(), Vec::<NodeId>::new());
    }

    #[test]
    fn linear_chain_preserved() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.add_edge(a, b);
        g.add_edge(b, c);
        assert_eq!(g.topological_order().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn diamond_respects_all_edges() {
        let mut g = Graph::new();
        let top = g.add_node(0);
        let left = g.add_node(1);
        let right = g.add_node(2);
        let bottom = g.add_node(3);
        g.add_edge(top, left);
        g.add_edge(top, right);
        g.add_edge(left, bottom);
        g.add_edge(right, bottom);

        let order = g.topological_order().unwrap();
        assert!(position(&order, top) < position(&order, left));
        assert!(position(&order, top) < position(&order, right));
        assert!(position(&order, left) < position(&order, bottom));
        assert!(position(&order, right) < position(&order, bottom));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut g = Graph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        g.add_edge(a, b);
        g.add_edge(a, b);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn two_node_cycle_is_an_error() {
        let mut g = Graph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        g.add_edge(a, b);
        g.add_edge(b, a);
        assert!(matches!(g.topological_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn cycle_off_the_main_path_still_detected() {
        let mut g = Graph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b);
        g.add_edge(b, c);
        g.add_edge(c, b);
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn payload_access() {
        let mut g = Graph::new();
        let a = g.add_node(String::from("movement"));
        *g.node_mut(a) = String::from("physics");
        assert_eq!(g.node(a), "physics");
    }
}
