use crate::id::NodeId;
use slotmap::SecondaryMap;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during topology operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("edge {from:?} -> {to:?} would close a cycle")]
    CycleDetected { from: NodeId, to: NodeId },
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Outgoing links and reverse adjacency for a single node.
#[derive(Debug, Clone, Default)]
struct NodeLinks {
    /// The single forward target.
    target: Option<NodeId>,
    /// A splitter's right-hand output.
    secondary: Option<NodeId>,
    /// Nodes whose target or secondary is this node.
    inputs: Vec<NodeId>,
}

/// Which of a node's two outgoing link slots an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSlot {
    Target,
    Secondary,
}

// ---------------------------------------------------------------------------
// TopologyGraph
// ---------------------------------------------------------------------------

/// Directed adjacency of node -> target(s), guarded against cycles.
///
/// Every link assignment runs the loop guard first: the chain of outgoing
/// links is walked from the proposed target and the assignment is rejected
/// if the source is reachable. Nodes without outgoing links end the walk, so
/// partially built lines are fine.
///
/// Intersections keep no static links here; their shipping direction is
/// chosen per resource at runtime.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    links: SecondaryMap<NodeId, NodeLinks>,
    edge_count: usize,
}

impl TopologyGraph {
    /// Create a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    pub fn insert_node(&mut self, node: NodeId) {
        if !self.links.contains_key(node) {
            self.links.insert(node, NodeLinks::default());
        }
    }

    /// Remove a node and every link touching it. Returns the nodes it was
    /// linked with (targets first, then feeders), deduplicated.
    pub fn remove_node(&mut self, node: NodeId) -> Vec<NodeId> {
        let Some(entry) = self.links.get(node) else {
            return Vec::new();
        };
        let mut touched: Vec<NodeId> = entry.target.into_iter().chain(entry.secondary).collect();
        for &input in &entry.inputs {
            if !touched.contains(&input) {
                touched.push(input);
            }
        }

        // Clearing both slots also unregisters us from our targets' inputs.
        self.set_unchecked(node, LinkSlot::Target, None);
        self.set_unchecked(node, LinkSlot::Secondary, None);

        let feeders = self
            .links
            .get(node)
            .map(|e| e.inputs.clone())
            .unwrap_or_default();
        for feeder in feeders {
            if self.target(feeder) == Some(node) {
                self.set_unchecked(feeder, LinkSlot::Target, None);
            }
            if self.secondary(feeder) == Some(node) {
                self.set_unchecked(feeder, LinkSlot::Secondary, None);
            }
        }

        self.links.remove(node);
        touched
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.links.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.links.len()
    }

    /// Total number of outgoing links (targets plus secondaries).
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn clear(&mut self) {
        self.links.clear();
        self.edge_count = 0;
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Assign `from`'s forward target through the loop guard.
    ///
    /// Returns `Ok(true)` if the link changed, `Ok(false)` if it already had
    /// that value. On rejection the previous link is kept.
    pub fn set_target(&mut self, from: NodeId, to: Option<NodeId>) -> Result<bool, TopologyError> {
        self.set_link(from, LinkSlot::Target, to)
    }

    /// Assign a splitter's right-hand output through the loop guard.
    pub fn set_secondary(
        &mut self,
        from: NodeId,
        to: Option<NodeId>,
    ) -> Result<bool, TopologyError> {
        self.set_link(from, LinkSlot::Secondary, to)
    }

    pub fn set_link(
        &mut self,
        from: NodeId,
        slot: LinkSlot,
        to: Option<NodeId>,
    ) -> Result<bool, TopologyError> {
        let current = self
            .links
            .get(from)
            .ok_or(TopologyError::NodeNotFound(from))?;
        let current = match slot {
            LinkSlot::Target => current.target,
            LinkSlot::Secondary => current.secondary,
        };
        if current == to {
            return Ok(false);
        }
        if let Some(to) = to {
            if !self.links.contains_key(to) {
                return Err(TopologyError::NodeNotFound(to));
            }
            if self.would_create_cycle(from, to) {
                tracing::warn!(?from, ?to, "loop guard rejected link");
                return Err(TopologyError::CycleDetected { from, to });
            }
        }
        self.set_unchecked(from, slot, to);
        Ok(true)
    }

    /// Write a link without the loop guard. Only used for removals, which
    /// cannot create cycles.
    fn set_unchecked(&mut self, from: NodeId, slot: LinkSlot, to: Option<NodeId>) {
        let Some(entry) = self.links.get_mut(from) else {
            return;
        };
        let field = match slot {
            LinkSlot::Target => &mut entry.target,
            LinkSlot::Secondary => &mut entry.secondary,
        };
        let old = std::mem::replace(field, to);

        if let Some(old) = old {
            self.edge_count -= 1;
            if let Some(old_entry) = self.links.get_mut(old)
                && let Some(pos) = old_entry.inputs.iter().position(|&n| n == from)
            {
                old_entry.inputs.swap_remove(pos);
            }
        }
        if let Some(new) = to {
            self.edge_count += 1;
            if let Some(new_entry) = self.links.get_mut(new) {
                new_entry.inputs.push(from);
            }
        }
    }

    /// Loop guard: is `from` reachable by following outgoing links from `to`?
    ///
    /// Iterative DFS with an explicit stack; bounded by the node count.
    pub fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut stack = vec![to];
        while let Some(node) = stack.pop() {
            if node == from {
                return true;
            }
            if visited.insert(node, ()).is_some() {
                continue;
            }
            stack.extend(self.outputs(node));
        }
        false
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn target(&self, node: NodeId) -> Option<NodeId> {
        self.links.get(node).and_then(|e| e.target)
    }

    pub fn secondary(&self, node: NodeId) -> Option<NodeId> {
        self.links.get(node).and_then(|e| e.secondary)
    }

    /// Outgoing links (target, then secondary).
    pub fn outputs(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.links
            .get(node)
            .into_iter()
            .flat_map(|e| e.target.into_iter().chain(e.secondary))
    }

    /// Nodes linking into `node`.
    pub fn inputs(&self, node: NodeId) -> &[NodeId] {
        self.links
            .get(node)
            .map(|e| e.inputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.links.keys()
    }

    /// Whether the whole graph is free of directed cycles (Kahn's algorithm).
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for node in self.links.keys() {
            in_degree.insert(node, 0);
        }
        for node in self.links.keys() {
            for out in self.outputs(node) {
                if let Some(deg) = in_degree.get_mut(out) {
                    *deg += 1;
                }
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| n)
            .collect();
        let mut processed = 0usize;
        while let Some(node) = queue.pop_front() {
            processed += 1;
            for out in self.outputs(node) {
                if let Some(deg) = in_degree.get_mut(out) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(out);
                    }
                }
            }
        }
        processed == self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn make_graph_with_nodes(count: usize) -> (SlotMap<NodeId, ()>, TopologyGraph, Vec<NodeId>) {
        let mut sm = SlotMap::with_key();
        let mut graph = TopologyGraph::new();
        let ids: Vec<NodeId> = (0..count).map(|_| sm.insert(())).collect();
        for &id in &ids {
            graph.insert_node(id);
        }
        (sm, graph, ids)
    }

    #[test]
    fn set_target_tracks_inputs() {
        let (_sm, mut graph, n) = make_graph_with_nodes(3);
        assert_eq!(graph.set_target(n[0], Some(n[1])), Ok(true));
        assert_eq!(graph.set_target(n[2], Some(n[1])), Ok(true));
        assert_eq!(graph.set_target(n[0], Some(n[1])), Ok(false));

        let mut inputs = graph.inputs(n[1]).to_vec();
        inputs.sort();
        let mut expected = vec![n[0], n[2]];
        expected.sort();
        assert_eq!(inputs, expected);
        assert_eq!(graph.edge_count(), 2);

        // Retarget moves the input registration.
        graph.set_target(n[0], Some(n[2])).unwrap();
        assert_eq!(graph.inputs(n[1]), &[n[2]]);
        assert_eq!(graph.inputs(n[2]), &[n[0]]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn loop_guard_rejects_closing_edge() {
        let (_sm, mut graph, n) = make_graph_with_nodes(3);
        graph.set_target(n[0], Some(n[1])).unwrap();
        graph.set_target(n[1], Some(n[2])).unwrap();

        let result = graph.set_target(n[2], Some(n[0]));
        assert_eq!(
            result,
            Err(TopologyError::CycleDetected {
                from: n[2],
                to: n[0]
            })
        );
        // Prior state kept.
        assert_eq!(graph.target(n[2]), None);
        assert!(graph.is_acyclic());
    }

    #[test]
    fn loop_guard_rejects_self_loop() {
        let (_sm, mut graph, n) = make_graph_with_nodes(1);
        assert!(matches!(
            graph.set_target(n[0], Some(n[0])),
            Err(TopologyError::CycleDetected { .. })
        ));
    }

    #[test]
    fn loop_guard_follows_secondary_links() {
        let (_sm, mut graph, n) = make_graph_with_nodes(3);
        graph.set_secondary(n[0], Some(n[1])).unwrap();
        graph.set_target(n[1], Some(n[2])).unwrap();
        assert!(graph.would_create_cycle(n[2], n[0]));
        assert!(!graph.would_create_cycle(n[0], n[2]));
    }

    #[test]
    fn rejected_retarget_keeps_previous_link() {
        let (_sm, mut graph, n) = make_graph_with_nodes(4);
        graph.set_target(n[0], Some(n[1])).unwrap();
        graph.set_target(n[1], Some(n[2])).unwrap();
        graph.set_target(n[2], Some(n[3])).unwrap();

        assert!(graph.set_target(n[2], Some(n[0])).is_err());
        assert_eq!(graph.target(n[2]), Some(n[3]));
    }

    #[test]
    fn remove_node_cleans_links() {
        let (_sm, mut graph, n) = make_graph_with_nodes(3);
        graph.set_target(n[0], Some(n[1])).unwrap();
        graph.set_target(n[1], Some(n[2])).unwrap();

        let touched = graph.remove_node(n[1]);
        assert_eq!(touched, vec![n[2], n[0]]);
        assert!(!graph.contains_node(n[1]));
        assert_eq!(graph.target(n[0]), None);
        assert!(graph.inputs(n[2]).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn remove_nonexistent_node_no_panic() {
        let (_sm, mut graph, n) = make_graph_with_nodes(1);
        graph.remove_node(n[0]);
        assert!(graph.remove_node(n[0]).is_empty());
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let (mut sm, mut graph, n) = make_graph_with_nodes(1);
        let stranger = sm.insert(());
        assert_eq!(
            graph.set_target(n[0], Some(stranger)),
            Err(TopologyError::NodeNotFound(stranger))
        );
    }

    #[test]
    fn error_display_messages() {
        let (_sm, _graph, n) = make_graph_with_nodes(2);
        let msg = TopologyError::CycleDetected {
            from: n[0],
            to: n[1],
        }
        .to_string();
        assert!(msg.contains("cycle"), "got: {msg}");
        let msg = TopologyError::NodeNotFound(n[0]).to_string();
        assert!(msg.contains("node not found"), "got: {msg}");
    }
}
