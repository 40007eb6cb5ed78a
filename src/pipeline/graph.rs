//! Link topology of a bin's children, using daggy.
//!
//! Nodes are the direct children of one bin; an edge `a -> b` means a
//! source pad of `a` (or of an element inside `a`) is linked to a pad of
//! `b`. State changes walk this graph sinks first so that no element
//! produces data before its downstream is ready for it.

use crate::element::Element;
use daggy::petgraph::Direction;
use daggy::{Dag, NodeIndex};

/// Link graph over a snapshot of children.
pub(crate) struct LinkGraph {
    dag: Dag<usize, ()>,
    cyclic: bool,
}

impl LinkGraph {
    /// Build the graph of `children` (node weights are indices into it).
    pub(crate) fn new(children: &[Element]) -> Self {
        let mut dag: Dag<usize, ()> = Dag::new();
        for i in 0..children.len() {
            dag.add_node(i);
        }

        let mut cyclic = false;
        for (from, child) in children.iter().enumerate() {
            for to in downstream_of(child, children) {
                if to == from {
                    continue;
                }
                let (a, b) = (NodeIndex::new(from), NodeIndex::new(to));
                if dag.find_edge(a, b).is_some() {
                    continue;
                }
                if dag.add_edge(a, b, ()).is_err() {
                    cyclic = true;
                }
            }
        }
        Self { dag, cyclic }
    }

    /// Whether some link would have closed a cycle.
    pub(crate) fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Children indices, every element after all of its downstream peers.
    ///
    /// Among elements that are ready at the same time the one added first
    /// comes first. A cyclic graph yields plain insertion order.
    pub(crate) fn sinks_first(&self) -> Vec<usize> {
        let count = self.dag.node_count();
        if self.cyclic {
            return (0..count).collect();
        }

        let graph = self.dag.graph();
        let mut remaining: Vec<usize> = (0..count)
            .map(|i| {
                graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Outgoing)
                    .count()
            })
            .collect();
        let mut done = vec![false; count];
        let mut order = Vec::with_capacity(count);

        while order.len() < count {
            let Some(next) = (0..count).find(|&i| !done[i] && remaining[i] == 0) else {
                // Unreachable for a DAG; keep the rest in insertion order.
                order.extend((0..count).filter(|&i| !done[i]));
                break;
            };
            done[next] = true;
            order.push(next);
            for upstream in graph.neighbors_directed(NodeIndex::new(next), Direction::Incoming) {
                remaining[upstream.index()] -= 1;
            }
        }
        order
    }

    /// Children indices with no upstream sibling.
    pub(crate) fn sources(&self) -> Vec<usize> {
        self.without_neighbors(Direction::Incoming)
    }

    /// Children indices with no downstream sibling.
    pub(crate) fn sinks(&self) -> Vec<usize> {
        self.without_neighbors(Direction::Outgoing)
    }

    fn without_neighbors(&self, direction: Direction) -> Vec<usize> {
        let graph = self.dag.graph();
        graph
            .node_indices()
            .filter(|&idx| graph.neighbors_directed(idx, direction).count() == 0)
            .map(|idx| idx.index())
            .collect()
    }
}

/// Indices of the siblings `element` feeds data to.
fn downstream_of(element: &Element, siblings: &[Element]) -> Vec<usize> {
    let mut out = Vec::new();
    collect_downstream(element, siblings, &mut out);
    out
}

fn collect_downstream(element: &Element, siblings: &[Element], out: &mut Vec<usize>) {
    for pad in element.src_pads() {
        let Some(peer_element) = pad.peer().and_then(|p| p.parent_element()) else {
            continue;
        };
        if let Some(i) = siblings.iter().position(|s| s.is_ancestor_of(&peer_element)) {
            if !out.contains(&i) {
                out.push(i);
            }
        }
    }
    // Links made from inside a child bin count for the bin.
    if let Some(bin) = element.as_bin() {
        for child in bin.children() {
            collect_downstream(&child, siblings, out);
        }
    }
}
