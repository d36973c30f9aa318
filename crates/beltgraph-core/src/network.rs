//! The belt network: owns every node, resource and index, and runs ticks.
//!
//! # Architecture
//!
//! The `Network` owns:
//! - the node and resource arenas (`SlotMap`s)
//! - a [`GridIndex`] (cell -> node)
//! - a [`TopologyGraph`] (node -> targets, loop-guarded)
//! - a [`PathTracker`] (connected-component ids)
//! - a [`SettleQueue`] of placement notices awaiting path assignment
//! - an [`EventBus`] for collection and path notifications
//! - the [`ResourceMover`] collaborator
//!
//! # Editing
//!
//! Placement, removal, rotation and retargeting update the grid and topology
//! immediately; path assignment for new or rewired nodes is deferred to the
//! next settle step so a group placed in one frame settles as a whole.
//! Removal splits paths immediately.
//!
//! # Tick
//!
//! Each `step()` runs:
//! 1. **Settle** -- process deferred placement notices (runs even when paused)
//! 2. **Produce** -- producers advance their timers and spawn resources
//! 3. **Read** -- order nodes by longest remaining path, collect proposed moves
//! 4. **Resolve** -- keep one move per target (oldest resource wins)
//! 5. **Commit** -- ship every surviving move
//! 6. **Deliver** -- hand buffered events to subscribers

use crate::connection;
use crate::event::{Event, EventBus, EventKind, PassiveListener};
use crate::fixed::{Fixed64, Ticks, f64_to_fixed64};
use crate::grid::{Direction, GridError, GridIndex, GridPosition};
use crate::id::{NodeId, PathId, ResourceId, ResourceTypeId};
use crate::mover::{Movement, NullMover, ResourceMover};
use crate::node::{Node, NodeKind, Occupant, Resource, ShipTarget, SplitterPolicy, TransportView};
use crate::path::{PathChange, PathTracker};
use crate::scheduler::{self, Move};
use crate::settle::{Notice, SettleQueue};
use crate::sim::{AdvanceResult, SimState, StateHash};
use crate::topology::{LinkSlot, TopologyError, TopologyGraph};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Plain parameters supplied by whoever constructs the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seconds of `advance` time per tick.
    pub tick_interval: Fixed64,
    /// Start running immediately; otherwise the network is built paused.
    pub run_on_start: bool,
    /// Policy for splitters placed without an explicit one.
    pub default_splitter_policy: SplitterPolicy,
    /// Ring buffer capacity per event kind.
    pub event_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tick_interval: f64_to_fixed64(0.25),
            run_on_start: true,
            default_splitter_policy: SplitterPolicy::RoundRobin,
            event_capacity: 1024,
        }
    }
}

/// A node to place: kind, anchor cell and facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub position: GridPosition,
    pub facing: Direction,
}

impl NodeSpec {
    pub fn new(kind: NodeKind, position: GridPosition, facing: Direction) -> Self {
        Self {
            kind,
            position,
            facing,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from editing a built network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("node not found: {0:?}")]
    UnknownNode(NodeId),
    #[error("node {0:?} is a child belt; edit its parent instead")]
    ChildBelt(NodeId),
    #[error("node {0:?} owns a child belt and cannot be rotated")]
    FixedOrientation(NodeId),
    #[error("producer at {0:?} has a zero spawn interval")]
    ZeroInterval(GridPosition),
    #[error("node {0:?} already holds a resource")]
    SlotFull(NodeId),
    #[error("group placement needs at least one node")]
    EmptyGroup,
}

/// Errors that stop a network from being built. No tick can run without a
/// successfully built network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("no resource mover was supplied")]
    MissingMover,
    #[error("tick interval must be positive, got {0}")]
    NonPositiveTickInterval(Fixed64),
    #[error("producer at {0:?} has a zero spawn interval")]
    ZeroProducerInterval(GridPosition),
    #[error("initial layout failed: {0}")]
    Placement(#[from] PlacementError),
}

/// Result of an explicit retarget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    Unchanged,
    /// The loop guard refused the link; the previous target was kept.
    Rejected,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects configuration and collaborators, then validates them in
/// [`NetworkBuilder::build`].
#[derive(Default)]
pub struct NetworkBuilder {
    config: NetworkConfig,
    mover: Option<Box<dyn ResourceMover>>,
    nodes: Vec<NodeSpec>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick_interval(mut self, seconds: Fixed64) -> Self {
        self.config.tick_interval = seconds;
        self
    }

    pub fn run_on_start(mut self, run: bool) -> Self {
        self.config.run_on_start = run;
        self
    }

    pub fn mover(mut self, mover: impl ResourceMover + 'static) -> Self {
        self.mover = Some(Box::new(mover));
        self
    }

    /// Use a mover that ignores movement instructions.
    pub fn headless(self) -> Self {
        self.mover(NullMover)
    }

    /// Nodes to place as one group when the network is built.
    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn build(self) -> Result<Network, SetupError> {
        let mover = self.mover.ok_or(SetupError::MissingMover)?;
        if self.config.tick_interval <= Fixed64::ZERO {
            return Err(SetupError::NonPositiveTickInterval(self.config.tick_interval));
        }
        if let Some(spec) = self
            .nodes
            .iter()
            .find(|s| matches!(s.kind, NodeKind::Producer { interval: 0, .. }))
        {
            return Err(SetupError::ZeroProducerInterval(spec.position));
        }

        let mut network = Network {
            nodes: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            grid: GridIndex::new(),
            topology: TopologyGraph::new(),
            paths: PathTracker::new(),
            settle: SettleQueue::new(),
            events: EventBus::new(self.config.event_capacity),
            sim_state: SimState::new(),
            paused: !self.config.run_on_start,
            config: self.config,
            mover,
        };
        if !self.nodes.is_empty() {
            network.place_group(&self.nodes, None)?;
        }
        tracing::debug!(nodes = network.node_count(), "network built");
        Ok(network)
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

pub struct Network {
    nodes: SlotMap<NodeId, Node>,
    resources: SlotMap<ResourceId, Resource>,
    grid: GridIndex,
    topology: TopologyGraph,
    paths: PathTracker,
    settle: SettleQueue,
    events: EventBus,
    sim_state: SimState,
    config: NetworkConfig,
    mover: Box<dyn ResourceMover>,
    paused: bool,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.len())
            .field("resources", &self.resources.len())
            .field("paths", &self.paths.path_count())
            .field("pending_settle", &self.settle.pending_count())
            .field("sim_state", &self.sim_state)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place a single node (and its child belt, for splitters and
    /// combiners). Path assignment happens at the next settle step.
    pub fn place_node(
        &mut self,
        kind: NodeKind,
        position: GridPosition,
        facing: Direction,
    ) -> Result<NodeId, PlacementError> {
        let spec = NodeSpec::new(kind, position, facing);
        self.check_free(std::slice::from_ref(&spec))?;
        let placed = self.insert_spec(spec)?;
        let fresh: BTreeSet<NodeId> = placed.iter().copied().collect();
        let rewired = self.relink_around(&placed, &fresh);
        for &node in &placed {
            self.settle.push(Notice::NodePlaced { node });
        }
        if !rewired.is_empty() {
            self.settle.push(Notice::Rewired { nodes: rewired });
        }
        Ok(placed[0])
    }

    /// Place a run of nodes as one group. The first and last spec are the
    /// anchors; `explicit` forces the resulting path id. Returns the ids of
    /// the specs, in order (child belts are not listed).
    pub fn place_group(
        &mut self,
        specs: &[NodeSpec],
        explicit: Option<PathId>,
    ) -> Result<Vec<NodeId>, PlacementError> {
        if specs.is_empty() {
            return Err(PlacementError::EmptyGroup);
        }
        self.check_free(specs)?;

        let mut anchors = Vec::with_capacity(specs.len());
        let mut all = Vec::with_capacity(specs.len());
        for &spec in specs {
            let placed = self.insert_spec(spec)?;
            anchors.push(placed[0]);
            all.extend(placed);
        }
        let fresh: BTreeSet<NodeId> = all.iter().copied().collect();
        let rewired = self.relink_around(&all, &fresh);

        let (start, end) = (anchors[0], anchors[anchors.len() - 1]);
        self.settle.push(Notice::GroupPlaced {
            nodes: all,
            start,
            end,
            explicit,
        });
        if !rewired.is_empty() {
            self.settle.push(Notice::Rewired { nodes: rewired });
        }
        Ok(anchors)
    }

    /// A splitter kind using the configured default policy.
    pub fn default_splitter(&self) -> NodeKind {
        NodeKind::Splitter {
            policy: self.config.default_splitter_policy,
        }
    }

    /// Every cell the specs (and their children) would cover must be free
    /// and distinct, so a failed placement leaves nothing behind.
    fn check_free(&self, specs: &[NodeSpec]) -> Result<(), PlacementError> {
        let mut claimed = BTreeSet::new();
        for spec in specs {
            if let NodeKind::Producer { interval: 0, .. } = spec.kind {
                return Err(PlacementError::ZeroInterval(spec.position));
            }
            let footprint = spec.kind.base_footprint().for_facing(spec.facing);
            let child = connection::child_placement(&spec.kind, spec.position, spec.facing);
            let cells = footprint
                .tiles(spec.position)
                .chain(child.map(|(cell, _)| cell));
            for cell in cells {
                if self.grid.is_occupied(cell) || !claimed.insert(cell) {
                    return Err(GridError::Occupied(cell).into());
                }
            }
        }
        Ok(())
    }

    /// Insert a node and its child into the arena, grid and topology.
    /// Returns `[node]` or `[node, child]`.
    fn insert_spec(&mut self, spec: NodeSpec) -> Result<Vec<NodeId>, PlacementError> {
        let id = self.insert_node(Node::new(spec.kind, spec.position, spec.facing))?;
        let mut placed = vec![id];

        if let Some((cell, facing)) = connection::child_placement(&spec.kind, spec.position, spec.facing)
        {
            let mut child = Node::new(NodeKind::Straight, cell, facing);
            child.parent = Some(id);
            let child_id = match self.insert_node(child) {
                Ok(child_id) => child_id,
                Err(err) => {
                    self.topology.remove_node(id);
                    let _ = self.grid.remove(id);
                    self.nodes.remove(id);
                    return Err(err);
                }
            };
            if let Some(parent) = self.nodes.get_mut(id) {
                parent.child = Some(child_id);
            }
            placed.push(child_id);
        }
        for &node in &placed {
            self.emit(Event::NodePlaced {
                node,
                tick: self.sim_state.tick,
            });
        }
        tracing::debug!(node = ?id, kind = ?spec.kind, position = ?spec.position, "node placed");
        Ok(placed)
    }

    fn insert_node(&mut self, node: Node) -> Result<NodeId, PlacementError> {
        let (position, footprint) = (node.position, node.footprint);
        let id = self.nodes.insert(node);
        if let Err(err) = self.grid.place(id, position, footprint) {
            self.nodes.remove(id);
            return Err(err.into());
        }
        self.topology.insert_node(id);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove a node (and its child belt). Held resources are destroyed and
    /// the node's path is split if it falls apart.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), PlacementError> {
        let node = self.nodes.get(id).ok_or(PlacementError::UnknownNode(id))?;
        if node.parent.is_some() {
            return Err(PlacementError::ChildBelt(id));
        }
        let doomed: Vec<NodeId> = std::iter::once(id).chain(node.child).collect();
        let neighbours: Vec<NodeId> = doomed
            .iter()
            .flat_map(|&n| self.grid.neighbors_4(n))
            .map(|(_, n)| n)
            .filter(|n| !doomed.contains(n))
            .collect();

        for &node_id in &doomed {
            self.settle.forget(node_id);
            self.topology.remove_node(node_id);
            if let Err(err) = self.grid.remove(node_id) {
                tracing::error!(node = ?node_id, %err, "removed node was not on the grid");
            }
            if let Some(node) = self.nodes.remove(node_id)
                && let Some(occupant) = node.slot
            {
                self.destroy_resource(occupant.resource);
            }
            self.emit(Event::NodeRemoved {
                node: node_id,
                tick: self.sim_state.tick,
            });
        }

        for &node_id in &doomed {
            let (nodes, grid, topology) = (&self.nodes, &self.grid, &self.topology);
            let changes = self
                .paths
                .remove(node_id, |n| path_adjacency(nodes, grid, topology, n));
            self.emit_path_changes(changes);
        }

        // Links the loop guard refused through the removed node may now fit.
        let rewired = self.relink_around(&neighbours, &BTreeSet::new());
        if !rewired.is_empty() {
            self.settle.push(Notice::Rewired { nodes: rewired });
        }
        tracing::debug!(node = ?id, "node removed");
        Ok(())
    }

    fn destroy_resource(&mut self, resource: ResourceId) {
        if self.resources.remove(resource).is_some() {
            self.mover.despawn(resource);
        }
    }

    // -----------------------------------------------------------------------
    // Rewiring
    // -----------------------------------------------------------------------

    /// Explicit "target changed" notification. The link goes through the
    /// loop guard; a rejected link keeps the previous target.
    pub fn set_target(
        &mut self,
        node: NodeId,
        target: Option<NodeId>,
    ) -> Result<LinkOutcome, PlacementError> {
        if !self.nodes.contains_key(node) {
            return Err(PlacementError::UnknownNode(node));
        }
        if let Some(t) = target
            && !self.nodes.contains_key(t)
        {
            return Err(PlacementError::UnknownNode(t));
        }

        let previous = self.topology.target(node);
        let outcome = self.apply_link(node, LinkSlot::Target, target);
        if outcome == LinkOutcome::Linked {
            let nodes = std::iter::once(node).chain(previous).chain(target).collect();
            self.settle.push(Notice::Rewired { nodes });
        }
        Ok(outcome)
    }

    /// Turn a node to a new facing and rewire it and its neighbours.
    pub fn rotate_node(&mut self, id: NodeId, facing: Direction) -> Result<(), PlacementError> {
        let node = self.nodes.get(id).ok_or(PlacementError::UnknownNode(id))?;
        if node.parent.is_some() {
            return Err(PlacementError::ChildBelt(id));
        }
        if node.child.is_some() {
            return Err(PlacementError::FixedOrientation(id));
        }
        let footprint = node.kind.base_footprint().for_facing(facing);
        self.grid.reshape(id, footprint)?;
        if let Some(node) = self.nodes.get_mut(id) {
            node.facing = facing;
            node.footprint = footprint;
        }

        let before: Vec<NodeId> = self.topology.outputs(id).collect();
        let rewired = self.relink_around(&[id], &BTreeSet::new());
        let nodes: Vec<NodeId> = std::iter::once(id).chain(rewired).chain(before).collect();
        self.settle.push(Notice::Rewired { nodes });
        Ok(())
    }

    /// Recompute geometric links for `ids` and their grid neighbours.
    ///
    /// Returns the nodes whose links changed in a way the placement of
    /// `fresh` does not already cover for path assignment: anything other
    /// than a previously empty slot now pointing at a fresh node.
    fn relink_around(&mut self, ids: &[NodeId], fresh: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut affected: BTreeSet<(GridPosition, NodeId)> = BTreeSet::new();
        for &id in ids {
            if let Some(node) = self.nodes.get(id) {
                affected.insert((node.position, id));
            }
            for (_, n) in self.grid.neighbors_4(id) {
                if let Some(node) = self.nodes.get(n) {
                    affected.insert((node.position, n));
                }
            }
        }

        // Position order keeps loop-guard outcomes independent of the
        // order nodes were registered in.
        let mut rewired = Vec::new();
        for (_, id) in affected {
            let links = connection::resolve_links(&self.grid, &self.nodes, id);
            let edits = [
                (LinkSlot::Target, self.topology.target(id), links.target),
                (LinkSlot::Secondary, self.topology.secondary(id), links.secondary),
            ];
            let mut significant = false;
            for (slot, before, after) in edits {
                let covered = before.is_none() && after.is_some_and(|n| fresh.contains(&n));
                if self.apply_link(id, slot, after) == LinkOutcome::Linked && !covered {
                    significant = true;
                }
            }
            if significant && !fresh.contains(&id) {
                rewired.push(id);
            }
        }
        rewired
    }

    fn apply_link(&mut self, from: NodeId, slot: LinkSlot, to: Option<NodeId>) -> LinkOutcome {
        match self.topology.set_link(from, slot, to) {
            Ok(true) => LinkOutcome::Linked,
            Ok(false) => LinkOutcome::Unchanged,
            Err(TopologyError::CycleDetected { from, to }) => {
                self.emit(Event::LinkRejected {
                    from,
                    to,
                    tick: self.sim_state.tick,
                });
                LinkOutcome::Rejected
            }
            Err(err) => {
                tracing::error!(?from, %err, "link update on unknown node");
                LinkOutcome::Unchanged
            }
        }
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// Put a new resource straight into a node's slot.
    pub fn insert_resource(
        &mut self,
        node: NodeId,
        resource_type: ResourceTypeId,
    ) -> Result<ResourceId, PlacementError> {
        let target = self.nodes.get(node).ok_or(PlacementError::UnknownNode(node))?;
        if target.is_occupied() {
            return Err(PlacementError::SlotFull(node));
        }
        self.spawn_into(node, resource_type)
            .ok_or(PlacementError::SlotFull(node))
    }

    fn spawn_into(&mut self, node: NodeId, resource_type: ResourceTypeId) -> Option<ResourceId> {
        let tick = self.sim_state.tick;
        let position = self.nodes.get(node)?.position;
        let resource = self.resources.insert(Resource {
            resource_type,
            position,
            in_transit: false,
        });
        let received = self
            .nodes
            .get_mut(node)
            .is_some_and(|n| n.receive(resource, None, tick));
        if !received {
            tracing::error!(?node, "spawned into an unavailable slot");
            self.resources.remove(resource);
            return None;
        }
        self.emit(Event::ResourceSpawned {
            node,
            resource,
            resource_type,
            tick,
        });
        Some(resource)
    }

    /// The mover reports that a resource finished its visual move.
    pub fn complete_movement(&mut self, resource: ResourceId) -> bool {
        match self.resources.get_mut(resource) {
            Some(r) if r.in_transit => {
                r.in_transit = false;
                true
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Advance
    // -----------------------------------------------------------------------

    /// Settle pending placements, then run one tick unless paused.
    pub fn step(&mut self) -> AdvanceResult {
        let mut result = AdvanceResult {
            notices_settled: self.settle_pending(),
            ..Default::default()
        };
        if !self.paused {
            self.run_tick(&mut result);
        }
        self.events.deliver();
        result
    }

    /// Settle pending placements, then run as many ticks as `dt` seconds
    /// (plus the carried remainder) cover. While paused, time does not
    /// accumulate.
    pub fn advance(&mut self, dt: Fixed64) -> AdvanceResult {
        let mut result = AdvanceResult {
            notices_settled: self.settle_pending(),
            ..Default::default()
        };
        if !self.paused {
            self.sim_state.accumulator += dt;
            let interval = self.config.tick_interval;
            while self.sim_state.accumulator >= interval {
                self.sim_state.accumulator -= interval;
                self.run_tick(&mut result);
            }
        }
        self.events.deliver();
        result
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Cancel deferred settle work. Returns `false` if nothing was pending,
    /// so cancelling twice is harmless.
    pub fn cancel_pending_settle(&mut self) -> bool {
        self.settle.cancel()
    }

    /// Drop every node and resource and restart the tick counter. Pending
    /// settle work is cancelled; subscribers and configuration stay.
    pub fn reset(&mut self) {
        self.settle.cancel();
        let resources: Vec<ResourceId> = self.resources.keys().collect();
        for resource in resources {
            self.destroy_resource(resource);
        }
        self.nodes.clear();
        self.grid.clear();
        self.topology.clear();
        self.paths.clear();
        self.events.clear_all();
        self.sim_state = SimState::new();
        tracing::debug!("network reset");
    }

    // -----------------------------------------------------------------------
    // Settle
    // -----------------------------------------------------------------------

    /// Process deferred placement notices now. `step` and `advance` call
    /// this first; collaborators that need path ids before the next tick can
    /// call it directly.
    pub fn settle_pending(&mut self) -> usize {
        let notices = self.settle.drain();
        let count = notices.len();
        for notice in notices {
            let (nodes, grid, topology) = (&self.nodes, &self.grid, &self.topology);
            let adjacent = |n| path_adjacency(nodes, grid, topology, n);
            let changes = match notice {
                Notice::NodePlaced { node } => {
                    if !nodes.contains_key(node) {
                        continue;
                    }
                    self.paths.place(node, adjacent)
                }
                Notice::GroupPlaced {
                    nodes: group,
                    start,
                    end,
                    explicit,
                } => self.paths.place_group(&group, start, end, explicit, adjacent),
                Notice::Rewired { nodes: touched } => {
                    let alive: Vec<NodeId> = touched
                        .into_iter()
                        .filter(|&n| nodes.contains_key(n))
                        .collect();
                    self.paths.reconcile(&alive, adjacent)
                }
            };
            self.emit_path_changes(changes);
        }
        if count > 0 {
            tracing::trace!(count, paths = self.paths.path_count(), "settled placement notices");
        }
        count
    }

    fn emit_path_changes(&mut self, changes: Vec<PathChange>) {
        let tick = self.sim_state.tick;
        for change in changes {
            let event = match change {
                PathChange::Created(path) => Event::PathCreated { path, tick },
                PathChange::Merged { into, absorbed } => Event::PathsMerged {
                    into,
                    absorbed,
                    tick,
                },
                PathChange::Split { from, into } => Event::PathSplit { from, into, tick },
                PathChange::Freed(path) => Event::PathFreed { path, tick },
            };
            self.emit(event);
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    fn run_tick(&mut self, result: &mut AdvanceResult) {
        self.phase_produce();

        let order = self.schedule_order();
        let view = TransportView {
            nodes: &self.nodes,
            grid: &self.grid,
            topology: &self.topology,
            resources: &self.resources,
        };

        #[cfg(feature = "parallel")]
        let proposals: Vec<Move> = {
            use rayon::prelude::*;
            order.par_iter().filter_map(|&id| propose(view, id)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let proposals: Vec<Move> = order.iter().filter_map(|&id| propose(view, id)).collect();

        let resolution = scheduler::resolve_conflicts(proposals);
        for mv in &resolution.moves {
            if self.ship(mv) {
                result.moves_committed += 1;
            }
        }

        self.sim_state.tick += 1;
        result.ticks_run += 1;
        tracing::trace!(
            tick = self.sim_state.tick,
            committed = resolution.moves.len(),
            deferred = resolution.deferred.len(),
            "tick complete"
        );
    }

    fn phase_produce(&mut self) {
        let mut producers: Vec<(GridPosition, NodeId)> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Producer { .. }))
            .map(|(id, n)| (n.position, id))
            .collect();
        producers.sort();

        for (_, id) in producers {
            let spawn = self.nodes.get_mut(id).and_then(Node::advance_producer);
            if let Some(resource_type) = spawn {
                self.spawn_into(id, resource_type);
            }
        }
    }

    /// Every node, by descending longest remaining path.
    fn schedule_order(&self) -> Vec<NodeId> {
        scheduler::order_by_longest_path(
            self.nodes.iter().map(|(id, n)| (id, n.position)),
            |id| self.successors(id),
        )
    }

    /// Static outputs plus the receivers an intersection could pick.
    fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.topology.outputs(id).collect();
        if let Some(node) = self.nodes.get(id)
            && node.kind == NodeKind::Intersection
        {
            out.extend(connection::lateral_receivers(&self.grid, &self.nodes, id));
        }
        out
    }

    /// Commit one move. Returns whether the resource actually moved.
    fn ship(&mut self, mv: &Move) -> bool {
        let tick = self.sim_state.tick;
        let Some(source) = self.nodes.get_mut(mv.source) else {
            tracing::error!(source = ?mv.source, "ship from a removed node");
            return false;
        };
        let (from, facing) = (source.position, source.facing);
        let Some(occupant) = source.release() else {
            tracing::error!(source = ?mv.source, "ship from an empty slot");
            return false;
        };
        if occupant.resource != mv.resource {
            tracing::error!(source = ?mv.source, "slot changed between read and commit");
            source.slot = Some(occupant);
            return false;
        }
        let Some(resource_type) = self.resources.get(mv.resource).map(|r| r.resource_type) else {
            tracing::error!(source = ?mv.source, resource = ?mv.resource, "ship of a missing resource");
            return false;
        };

        match mv.target {
            ShipTarget::Collect => {
                self.destroy_resource(mv.resource);
                self.emit(Event::WidgetCollected {
                    node: mv.source,
                    resource_type,
                    tick,
                });
            }
            ShipTarget::Node(target) => {
                let received = self
                    .nodes
                    .get_mut(target)
                    .and_then(|t| t.receive(mv.resource, Some(from), tick).then_some(t.position));
                let Some(to) = received else {
                    tracing::error!(source = ?mv.source, ?target, "target refused a resolved move");
                    self.restore(mv.source, occupant);
                    return false;
                };
                if let Some(resource) = self.resources.get_mut(mv.resource) {
                    resource.position = to;
                    resource.in_transit = true;
                }
                self.mover.begin(Movement {
                    resource: mv.resource,
                    from,
                    to,
                    turn: connection::relative_turn(facing, from, to),
                });
                if let (Some(output), Some(source)) = (mv.output, self.nodes.get_mut(mv.source)) {
                    source.record_shipment(output, resource_type);
                }
            }
        }
        true
    }

    fn restore(&mut self, node: NodeId, occupant: Occupant) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.slot = Some(occupant);
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.events.on_passive(kind, listener);
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.events.suppress(kind);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_at(&self, position: GridPosition) -> Option<NodeId> {
        self.grid.node_at(position)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn occupant(&self, id: NodeId) -> Option<Occupant> {
        self.nodes.get(id).and_then(|n| n.slot)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn target(&self, id: NodeId) -> Option<NodeId> {
        self.topology.target(id)
    }

    pub fn secondary(&self, id: NodeId) -> Option<NodeId> {
        self.topology.secondary(id)
    }

    pub fn topology(&self) -> &TopologyGraph {
        &self.topology
    }

    pub fn grid(&self) -> &GridIndex {
        &self.grid
    }

    pub fn is_structurally_connected(&self, id: NodeId) -> bool {
        connection::is_structurally_connected(&self.grid, &self.nodes, id)
    }

    pub fn path_of(&self, id: NodeId) -> Option<PathId> {
        self.paths.path_of(id)
    }

    /// Nodes that share a path with `id` through a direct connection:
    /// targets, feeders and intersection laterals.
    pub fn linked_nodes(&self, id: NodeId) -> Vec<NodeId> {
        path_adjacency(&self.nodes, &self.grid, &self.topology, id)
    }

    /// Members of a path, in id order.
    pub fn path_members(&self, path: PathId) -> Vec<NodeId> {
        self.paths
            .members(path)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn paths(&self) -> &PathTracker {
        &self.paths
    }

    pub fn pending_settle_count(&self) -> usize {
        self.settle.pending_count()
    }

    pub fn tick(&self) -> Ticks {
        self.sim_state.tick
    }

    pub fn sim_state(&self) -> &SimState {
        &self.sim_state
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Deterministic hash of occupancy, receipt times, path ids and the
    /// tick counter. Nodes are visited in grid order, so two networks built
    /// in different orders hash equally when their state matches.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = StateHash::new();
        hasher.write_u64(self.sim_state.tick);

        let mut ordered: Vec<(GridPosition, NodeId)> =
            self.nodes.iter().map(|(id, n)| (n.position, id)).collect();
        ordered.sort();
        for (position, id) in ordered {
            hasher.write_i32(position.x);
            hasher.write_i32(position.y);
            hasher.write_u32(self.paths.path_of(id).map_or(u32::MAX, |p| p.0));
            match self.occupant(id) {
                Some(occupant) => {
                    hasher.write_u64(occupant.receipt_time);
                    let resource_type = self
                        .resources
                        .get(occupant.resource)
                        .map_or(u32::MAX, |r| r.resource_type.0);
                    hasher.write_u32(resource_type);
                }
                None => hasher.write_u64(u64::MAX),
            }
        }
        hasher.finish()
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Read-phase evaluation of one node.
fn propose(view: TransportView<'_>, id: NodeId) -> Option<Move> {
    let node = view.nodes.get(id)?;
    let occupant = node.slot?;
    match node.ready_to_ship(id, view) {
        Ok(proposal) => Some(Move {
            source: id,
            target: proposal.target,
            resource: proposal.resource,
            output: proposal.output,
            receipt_time: occupant.receipt_time,
            source_position: node.position,
        }),
        Err(reason) => {
            tracing::trace!(node = ?id, ?reason, "not ready to ship");
            None
        }
    }
}

/// Nodes linked to `id` in either direction: targets, feeders, and the
/// lateral neighbours of intersections on either side of the link.
fn path_adjacency(
    nodes: &SlotMap<NodeId, Node>,
    grid: &GridIndex,
    topology: &TopologyGraph,
    id: NodeId,
) -> Vec<NodeId> {
    let mut out: BTreeSet<NodeId> = topology
        .outputs(id)
        .chain(topology.inputs(id).iter().copied())
        .collect();

    let is_intersection = |n: NodeId| nodes.get(n).is_some_and(|n| n.kind == NodeKind::Intersection);
    if is_intersection(id) {
        out.extend(connection::lateral_receivers(grid, nodes, id));
    }
    for (_, neighbour) in grid.neighbors_4(id) {
        if is_intersection(neighbour)
            && connection::lateral_receivers(grid, nodes, neighbour).contains(&id)
        {
            out.insert(neighbour);
        }
    }
    out.remove(&id);
    out.into_iter().collect()
}
