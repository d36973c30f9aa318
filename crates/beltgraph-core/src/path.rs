//! Path identity: a partition of nodes into connected components.
//!
//! Membership is maintained incrementally. Placements join, create or merge
//! paths from one hop of adjacency; removals flood-fill the remaining members
//! of the affected path and split it when it falls apart. Plain union-find
//! cannot undo a union, hence the explicit reconciliation.
//!
//! The tracker knows nothing about geometry. Callers pass an adjacency
//! function returning every node linked to a given node in either direction
//! (targets, feeders, intersection laterals).

use crate::id::{NodeId, PathId};
use slotmap::SecondaryMap;
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// PathIdAllocator
// ---------------------------------------------------------------------------

/// Hands out path ids, reusing the lowest freed id first.
#[derive(Debug, Clone, Default)]
pub struct PathIdAllocator {
    next: u32,
    free: BTreeSet<u32>,
}

impl PathIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> PathId {
        if let Some(id) = self.free.pop_first() {
            return PathId(id);
        }
        let id = self.next;
        self.next += 1;
        PathId(id)
    }

    /// Return an id to the pool.
    pub fn free(&mut self, id: PathId) {
        if id.0 < self.next {
            self.free.insert(id.0);
        }
    }

    /// Take a specific id out of the pool so it can be assigned explicitly.
    pub fn claim(&mut self, id: PathId) {
        if id.0 >= self.next {
            self.free.extend(self.next..id.0);
            self.next = id.0 + 1;
        } else {
            self.free.remove(&id.0);
        }
    }

    pub fn is_free(&self, id: PathId) -> bool {
        id.0 >= self.next || self.free.contains(&id.0)
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// A structural change to the partition, reported for event emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChange {
    Created(PathId),
    Merged { into: PathId, absorbed: PathId },
    Split { from: PathId, into: PathId },
    Freed(PathId),
}

// ---------------------------------------------------------------------------
// PathTracker
// ---------------------------------------------------------------------------

/// Node -> path and path -> members, kept in lockstep.
#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    allocator: PathIdAllocator,
    membership: SecondaryMap<NodeId, PathId>,
    members: BTreeMap<PathId, BTreeSet<NodeId>>,
}

impl PathTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn path_of(&self, node: NodeId) -> Option<PathId> {
        self.membership.get(node).copied()
    }

    pub fn members(&self, path: PathId) -> Option<&BTreeSet<NodeId>> {
        self.members.get(&path)
    }

    /// Live path ids in ascending order.
    pub fn paths(&self) -> impl Iterator<Item = PathId> + '_ {
        self.members.keys().copied()
    }

    pub fn path_count(&self) -> usize {
        self.members.len()
    }

    /// Number of nodes holding a path id.
    pub fn assigned_count(&self) -> usize {
        self.membership.len()
    }

    /// Whether both maps describe the same partition.
    pub fn is_consistent(&self) -> bool {
        let total: usize = self.members.values().map(BTreeSet::len).sum();
        total == self.membership.len()
            && self.members.iter().all(|(path, set)| {
                !set.is_empty() && set.iter().all(|&n| self.membership.get(n) == Some(path))
            })
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Assign a freshly placed node from the paths of its neighbours: none
    /// creates a path, one is joined, several are merged into the lowest id.
    pub fn place<F, I>(&mut self, node: NodeId, adjacent: F) -> Vec<PathChange>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        if self.membership.contains_key(node) {
            return Vec::new();
        }
        let found = self.ids_of(adjacent(node));
        let mut changes = Vec::new();
        let path = self.unify(found, None, &mut changes);
        self.assign(node, path);
        changes
    }

    /// Assign a group placed together.
    ///
    /// The group is split into its connected components first; separate
    /// runs placed in one batch never share an id. The component holding the
    /// start and end anchors resolves its id from the anchors' outside
    /// neighbours (none creates, one joins, several merge into the lowest),
    /// then absorbs any other path its members touch. An explicit id becomes
    /// the survivor of the first anchored component, provided it is free or
    /// already one of the paths being joined. Components without an anchor
    /// resolve like a single placement.
    pub fn place_group<F, I>(
        &mut self,
        nodes: &[NodeId],
        start: NodeId,
        end: NodeId,
        explicit: Option<PathId>,
        adjacent: F,
    ) -> Vec<PathChange>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        let unassigned: BTreeSet<NodeId> = nodes
            .iter()
            .copied()
            .filter(|&n| !self.membership.contains_key(n))
            .collect();
        let mut explicit = explicit;
        let mut changes = Vec::new();

        for component in components(&unassigned, &adjacent) {
            let anchors: Vec<NodeId> = [start, end]
                .into_iter()
                .filter(|a| component.contains(a))
                .collect();
            let all_touched = self.paths_touching(component.iter().copied(), &component, &adjacent);

            let path = if anchors.is_empty() {
                self.unify(all_touched, None, &mut changes)
            } else {
                let found = self.paths_touching(anchors.iter().copied(), &component, &adjacent);
                let wanted = explicit.take().filter(|&id| {
                    let usable = found.contains(&id)
                        || (!self.members.contains_key(&id) && self.allocator.is_free(id));
                    if !usable {
                        tracing::warn!(%id, "explicit path id belongs to another path, ignoring");
                    }
                    usable
                });
                let path = self.unify(found, wanted, &mut changes);
                for other in all_touched {
                    if other != path {
                        self.merge(path, other, &mut changes);
                    }
                }
                path
            };
            for &node in &component {
                self.assign(node, path);
            }
        }
        changes
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Drop a node from its path and split the remainder if it is no longer
    /// connected. `adjacent` must already reflect the removal.
    pub fn remove<F, I>(&mut self, node: NodeId, adjacent: F) -> Vec<PathChange>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        let Some(path) = self.membership.remove(node) else {
            tracing::trace!(?node, "removed node had no path yet");
            return Vec::new();
        };
        let mut changes = Vec::new();
        let present = self
            .members
            .get_mut(&path)
            .is_some_and(|set| set.remove(&node));
        if !present {
            tracing::error!(?node, %path, "node missing from its recorded path");
            return changes;
        }
        self.split_if_disconnected(path, &adjacent, &mut changes);
        changes
    }

    // -----------------------------------------------------------------------
    // Rewiring
    // -----------------------------------------------------------------------

    /// Bring the partition back in line after the links around `nodes`
    /// changed: split paths that lost a connection, then merge paths that
    /// gained one. Unassigned nodes are left for their pending placement.
    pub fn reconcile<F, I>(&mut self, nodes: &[NodeId], adjacent: F) -> Vec<PathChange>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        let mut changes = Vec::new();

        let touched: BTreeSet<PathId> = nodes
            .iter()
            .flat_map(|&n| std::iter::once(n).chain(adjacent(n)))
            .filter_map(|n| self.path_of(n))
            .collect();
        for path in touched {
            self.split_if_disconnected(path, &adjacent, &mut changes);
        }

        for &node in nodes {
            let Some(mine) = self.path_of(node) else {
                continue;
            };
            let mut found = self.ids_of(adjacent(node));
            found.insert(mine);
            if found.len() > 1 {
                self.unify(found, None, &mut changes);
            }
        }
        changes
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ids_of(&self, nodes: impl IntoIterator<Item = NodeId>) -> BTreeSet<PathId> {
        nodes.into_iter().filter_map(|n| self.path_of(n)).collect()
    }

    /// Paths of the nodes adjacent to `from` that lie outside `group`.
    fn paths_touching<F, I>(
        &self,
        from: impl IntoIterator<Item = NodeId>,
        group: &BTreeSet<NodeId>,
        adjacent: &F,
    ) -> BTreeSet<PathId>
    where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        from.into_iter()
            .flat_map(adjacent)
            .filter(|n| !group.contains(n))
            .filter_map(|n| self.path_of(n))
            .collect()
    }

    fn assign(&mut self, node: NodeId, path: PathId) {
        self.membership.insert(node, path);
        self.members.entry(path).or_default().insert(node);
    }

    /// Collapse `found` (plus `explicit`) into one id and return it,
    /// allocating a fresh path if there is nothing to join.
    fn unify(
        &mut self,
        found: BTreeSet<PathId>,
        explicit: Option<PathId>,
        changes: &mut Vec<PathChange>,
    ) -> PathId {
        let survivor = match explicit.or_else(|| found.first().copied()) {
            Some(id) => id,
            None => {
                let id = self.allocator.next_id();
                changes.push(PathChange::Created(id));
                return id;
            }
        };
        if !self.members.contains_key(&survivor) && self.allocator.is_free(survivor) {
            self.allocator.claim(survivor);
            changes.push(PathChange::Created(survivor));
        }
        for absorbed in found {
            if absorbed != survivor {
                self.merge(survivor, absorbed, changes);
            }
        }
        survivor
    }

    fn merge(&mut self, into: PathId, absorbed: PathId, changes: &mut Vec<PathChange>) {
        let Some(moved) = self.members.remove(&absorbed) else {
            return;
        };
        for &node in &moved {
            self.membership.insert(node, into);
        }
        self.members.entry(into).or_default().extend(moved);
        self.allocator.free(absorbed);
        changes.push(PathChange::Merged { into, absorbed });
    }

    /// Flood-fill the members of `path`. The first component (in member
    /// order) keeps the id, every other component gets a fresh one.
    fn split_if_disconnected<F, I>(
        &mut self,
        path: PathId,
        adjacent: &F,
        changes: &mut Vec<PathChange>,
    ) where
        F: Fn(NodeId) -> I,
        I: IntoIterator<Item = NodeId>,
    {
        let Some(remaining) = self.members.get(&path).cloned() else {
            return;
        };
        if remaining.is_empty() {
            self.members.remove(&path);
            self.allocator.free(path);
            changes.push(PathChange::Freed(path));
            return;
        }

        let groups = components(&remaining, adjacent);

        if groups.len() <= 1 {
            return;
        }
        for group in groups.into_iter().skip(1) {
            let fresh = self.allocator.next_id();
            if let Some(set) = self.members.get_mut(&path) {
                set.retain(|n| !group.contains(n));
            }
            for &node in &group {
                self.membership.insert(node, fresh);
            }
            self.members.insert(fresh, group);
            changes.push(PathChange::Split { from: path, into: fresh });
        }
    }
}


/// Connected components of `nodes`, following `adjacent` only through
/// members of `nodes`. Components come out in order of their lowest node.
fn components<F, I>(nodes: &BTreeSet<NodeId>, adjacent: &F) -> Vec<BTreeSet<NodeId>>
where
    F: Fn(NodeId) -> I,
    I: IntoIterator<Item = NodeId>,
{
    let mut groups: Vec<BTreeSet<NodeId>> = Vec::new();
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    for &start in nodes {
        if !seen.insert(start) {
            continue;
        }
        let mut group = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            group.insert(node);
            for next in adjacent(node) {
                if nodes.contains(&next) && seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        groups.push(group);
    }
    groups
}
