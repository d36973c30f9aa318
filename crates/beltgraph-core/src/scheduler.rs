//! Tick scheduler: node ordering and many-to-one conflict resolution.
//!
//! A tick runs in two phases. The read phase evaluates every node, in the
//! order computed by [`order_by_longest_path`], against the pre-tick state
//! and collects the resulting [`Move`]s. [`resolve_conflicts`] then keeps one
//! move per target. Nothing is mutated until the network commits the
//! survivors, so a resource advances at most one node per tick.

use crate::fixed::Ticks;
use crate::grid::GridPosition;
use crate::id::{NodeId, ResourceId};
use crate::node::{ShipTarget, SplitterOutput};
use slotmap::SecondaryMap;
use std::collections::BTreeMap;

/// A shipment proposed during the read phase of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub source: NodeId,
    pub target: ShipTarget,
    pub resource: ResourceId,
    /// Splitter output the move uses, if the source is a splitter.
    pub output: Option<SplitterOutput>,
    /// When the source's slot was filled.
    pub receipt_time: Ticks,
    pub source_position: GridPosition,
}

impl Move {
    /// Total order for conflicts: oldest resource first, then the source's
    /// grid position.
    fn priority(&self) -> (Ticks, GridPosition) {
        (self.receipt_time, self.source_position)
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(u32),
}

/// Longest number of hops from each node to a node with no successors.
///
/// Memoized iterative DFS. A successor still on the DFS stack closes a
/// cycle and contributes nothing, so the walk terminates on any graph.
pub fn longest_path_lengths<F, I>(
    nodes: impl IntoIterator<Item = NodeId>,
    successors: F,
) -> SecondaryMap<NodeId, u32>
where
    F: Fn(NodeId) -> I,
    I: IntoIterator<Item = NodeId>,
{
    let mut visits: SecondaryMap<NodeId, Visit> = SecondaryMap::new();
    let mut stack: Vec<(NodeId, bool)> = Vec::new();

    for root in nodes {
        if visits.contains_key(root) {
            continue;
        }
        stack.push((root, false));

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                let length = successors(node)
                    .into_iter()
                    .filter_map(|s| match visits.get(s) {
                        Some(Visit::Done(len)) => Some(len + 1),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);
                visits.insert(node, Visit::Done(length));
                continue;
            }
            if visits.contains_key(node) {
                continue;
            }
            visits.insert(node, Visit::InProgress);
            stack.push((node, true));
            for succ in successors(node) {
                if !visits.contains_key(succ) {
                    stack.push((succ, false));
                }
            }
        }
    }

    let mut lengths = SecondaryMap::new();
    for (node, visit) in visits {
        if let Visit::Done(len) = visit {
            lengths.insert(node, len);
        }
    }
    lengths
}

/// Order nodes by descending longest remaining path, ties broken by grid
/// position so the result never depends on registration order.
pub fn order_by_longest_path<F, I>(
    nodes: impl IntoIterator<Item = (NodeId, GridPosition)>,
    successors: F,
) -> Vec<NodeId>
where
    F: Fn(NodeId) -> I,
    I: IntoIterator<Item = NodeId>,
{
    let nodes: Vec<(NodeId, GridPosition)> = nodes.into_iter().collect();
    let lengths = longest_path_lengths(nodes.iter().map(|(id, _)| *id), successors);

    let mut keyed: Vec<(u32, GridPosition, NodeId)> = nodes
        .into_iter()
        .map(|(id, pos)| (lengths.get(id).copied().unwrap_or(0), pos, id))
        .collect();
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    keyed.into_iter().map(|(_, _, id)| id).collect()
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// Outcome of conflict resolution for one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Surviving moves, in proposal order.
    pub moves: Vec<Move>,
    /// Moves that lost a conflict; their sources retry next tick.
    pub deferred: Vec<Move>,
}

/// Keep one move per target node: the one with the earliest receipt time,
/// then the lowest source position. Collections never conflict.
pub fn resolve_conflicts(proposals: Vec<Move>) -> Resolution {
    let mut winners: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (i, mv) in proposals.iter().enumerate() {
        let ShipTarget::Node(target) = mv.target else {
            continue;
        };
        winners
            .entry(target)
            .and_modify(|best| {
                if mv.priority() < proposals[*best].priority() {
                    *best = i;
                }
            })
            .or_insert(i);
    }

    let mut resolution = Resolution::default();
    for (i, mv) in proposals.into_iter().enumerate() {
        let keep = match mv.target {
            ShipTarget::Node(target) => winners.get(&target) == Some(&i),
            ShipTarget::Collect => true,
        };
        if keep {
            resolution.moves.push(mv);
        } else {
            tracing::trace!(source = ?mv.source, target = ?mv.target, "move deferred by conflict");
            resolution.deferred.push(mv);
        }
    }
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids<K: slotmap::Key>(count: usize) -> Vec<K> {
        let mut sm = SlotMap::<K, ()>::with_key();
        (0..count).map(|_| sm.insert(())).collect()
    }

    fn mv(source: NodeId, target: NodeId, resource: ResourceId, receipt: Ticks, x: i32) -> Move {
        Move {
            source,
            target: ShipTarget::Node(target),
            resource,
            output: None,
            receipt_time: receipt,
            source_position: GridPosition::new(x, 0),
        }
    }

    #[test]
    fn chain_lengths_count_hops_to_sink() {
        let n: Vec<NodeId> = ids(4);
        let next = |id: NodeId| -> Option<NodeId> {
            n.iter().position(|&x| x == id).and_then(|i| n.get(i + 1).copied())
        };
        let lengths = longest_path_lengths(n.iter().rev().copied(), next);
        assert_eq!(lengths[n[0]], 3);
        assert_eq!(lengths[n[3]], 0);
    }

    #[test]
    fn cycles_terminate_with_zero_contribution() {
        let n: Vec<NodeId> = ids(2);
        let (a, b) = (n[0], n[1]);
        let lengths = longest_path_lengths([a, b], |id| if id == a { vec![b] } else { vec![a] });
        // b's only successor (a) is still on the stack when b finishes.
        assert_eq!(lengths[b], 0);
        assert_eq!(lengths[a], 1);
    }

    #[test]
    fn order_is_descending_and_registration_independent() {
        let n: Vec<NodeId> = ids(3);
        let pos = |i: i32| GridPosition::new(i, 0);
        // n0 -> n2, n1 isolated.
        let succ = |id: NodeId| if id == n[0] { vec![n[2]] } else { vec![] };

        let forward = order_by_longest_path([(n[0], pos(0)), (n[1], pos(1)), (n[2], pos(2))], succ);
        let backward = order_by_longest_path([(n[2], pos(2)), (n[1], pos(1)), (n[0], pos(0))], succ);
        assert_eq!(forward, vec![n[0], n[1], n[2]]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn oldest_resource_wins_conflict() {
        let n: Vec<NodeId> = ids(3);
        let r: Vec<ResourceId> = ids(2);
        let late = mv(n[0], n[2], r[0], 9, 0);
        let early = mv(n[1], n[2], r[1], 4, 1);

        for proposals in [vec![late, early], vec![early, late]] {
            let res = resolve_conflicts(proposals);
            assert_eq!(res.moves, vec![early]);
            assert_eq!(res.deferred, vec![late]);
        }
    }

    #[test]
    fn equal_receipt_times_break_on_position() {
        let n: Vec<NodeId> = ids(3);
        let r: Vec<ResourceId> = ids(2);
        let west = mv(n[1], n[2], r[0], 5, -1);
        let east = mv(n[0], n[2], r[1], 5, 1);
        let res = resolve_conflicts(vec![east, west]);
        assert_eq!(res.moves, vec![west]);
    }

    #[test]
    fn collections_never_conflict() {
        let n: Vec<NodeId> = ids(2);
        let r: Vec<ResourceId> = ids(2);
        let a = Move {
            target: ShipTarget::Collect,
            ..mv(n[0], n[0], r[0], 0, 0)
        };
        let b = Move {
            target: ShipTarget::Collect,
            ..mv(n[1], n[1], r[1], 0, 1)
        };
        assert_eq!(resolve_conflicts(vec![a, b]).moves.len(), 2);
    }
}
