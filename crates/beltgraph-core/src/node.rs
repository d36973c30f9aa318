//! Transport node family.
//!
//! Every node kind shares one contract: [`Node::ready_to_ship`] proposes a
//! move without mutating anything, [`Node::receive`] fills an empty slot,
//! and the network's ship step empties the source and calls `receive` on the
//! target. Kind-specific behaviour is dispatched by matching on
//! [`NodeKind`]; per-kind runtime data lives in the parallel [`NodeState`]
//! enum, the same split used for transport configuration and transport
//! state.

use crate::connection;
use crate::fixed::Ticks;
use crate::grid::{Direction, Footprint, GridIndex, GridPosition};
use crate::id::{NodeId, ResourceId, ResourceTypeId};
use crate::topology::TopologyGraph;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a splitter picks between its two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterPolicy {
    /// Alternate outputs after every successful shipment.
    #[default]
    RoundRobin,
    /// Pin the first two distinct resource types to the two outputs; other
    /// types fall back to round robin.
    TypeSticky,
}

/// Kind of a transport node plus its immutable configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Straight,
    LeftCorner,
    RightCorner,
    /// Lets two perpendicular streams cross one cell without merging.
    Intersection,
    /// Spawns a resource every `interval` ticks while its slot is empty.
    Producer {
        resource_type: ResourceTypeId,
        interval: Ticks,
    },
    /// Ships into its left-hand child belt or its right-hand neighbour.
    Splitter { policy: SplitterPolicy },
    /// Fed by its backward neighbour and its left-hand child belt.
    Combiner,
    /// Destroys whatever it holds and reports a collection.
    Consumer,
}

impl NodeKind {
    /// Footprint when facing north. All belt kinds occupy a single cell.
    pub fn base_footprint(&self) -> Footprint {
        Footprint::single()
    }

    /// Whether placing this kind also places a child belt.
    pub fn has_child(&self) -> bool {
        matches!(self, NodeKind::Splitter { .. } | NodeKind::Combiner)
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// One of the splitter's two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitterOutput {
    /// The child belt on the splitter's left.
    #[default]
    Left,
    /// Whatever accepting node sits on the splitter's right.
    Right,
}

impl SplitterOutput {
    pub fn other(self) -> Self {
        match self {
            SplitterOutput::Left => SplitterOutput::Right,
            SplitterOutput::Right => SplitterOutput::Left,
        }
    }

    fn index(self) -> usize {
        match self {
            SplitterOutput::Left => 0,
            SplitterOutput::Right => 1,
        }
    }
}

/// Selection state shared by both splitter policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitterState {
    /// Output the round robin will pick next.
    pub next: SplitterOutput,
    /// Resource types pinned to the left and right outputs (type-sticky).
    pub bins: [Option<ResourceTypeId>; 2],
}

impl SplitterState {
    /// The output the policy wants for a resource of `resource_type`.
    pub fn preferred(&self, policy: SplitterPolicy, resource_type: ResourceTypeId) -> SplitterOutput {
        if policy == SplitterPolicy::TypeSticky {
            if let Some(i) = self.bins.iter().position(|b| *b == Some(resource_type)) {
                return if i == 0 {
                    SplitterOutput::Left
                } else {
                    SplitterOutput::Right
                };
            }
            // A new type claims the first free bin.
            if self.bins[0].is_none() {
                return SplitterOutput::Left;
            }
            if self.bins[1].is_none() {
                return SplitterOutput::Right;
            }
        }
        self.next
    }

    /// Record a successful shipment through `output`.
    pub fn record(
        &mut self,
        policy: SplitterPolicy,
        output: SplitterOutput,
        resource_type: ResourceTypeId,
    ) {
        if policy == SplitterPolicy::TypeSticky
            && !self.bins.contains(&Some(resource_type))
            && self.bins[output.index()].is_none()
        {
            self.bins[output.index()] = Some(resource_type);
        }
        self.next = output.other();
    }
}

/// Mutable per-kind state. Variants match [`NodeKind`] where a kind needs
/// runtime data; every other kind is `Passive`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeState {
    #[default]
    Passive,
    /// Direction the held resource will leave in, recorded on receipt.
    Intersection { ship_direction: Option<Direction> },
    /// Ticks since the last spawn, saturating at the interval.
    Producer { elapsed: Ticks },
    Splitter(SplitterState),
}

impl NodeState {
    /// Create a fresh state matching the given kind.
    pub fn new_for(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Intersection => NodeState::Intersection {
                ship_direction: None,
            },
            NodeKind::Producer { .. } => NodeState::Producer { elapsed: 0 },
            NodeKind::Splitter { .. } => NodeState::Splitter(SplitterState::default()),
            _ => NodeState::Passive,
        }
    }
}

// ---------------------------------------------------------------------------
// Node & resource
// ---------------------------------------------------------------------------

/// The single resource a node holds and when it arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupant {
    pub resource: ResourceId,
    /// Tick at which the slot was filled.
    pub receipt_time: Ticks,
}

/// A discrete resource unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub resource_type: ResourceTypeId,
    /// Cell of the node currently holding it.
    pub position: GridPosition,
    /// Set when shipped, cleared when the mover reports arrival.
    pub in_transit: bool,
}

/// A grid-anchored transport unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub state: NodeState,
    /// Top-left anchor.
    pub position: GridPosition,
    pub facing: Direction,
    /// Footprint oriented to `facing`.
    pub footprint: Footprint,
    pub slot: Option<Occupant>,
    /// Owning splitter/combiner, for child belts.
    pub parent: Option<NodeId>,
    pub child: Option<NodeId>,
}

/// Where a ready node wants to send its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipTarget {
    Node(NodeId),
    /// Consumers destroy the resource instead of passing it on.
    Collect,
}

/// A move a node is ready to make this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub resource: ResourceId,
    pub target: ShipTarget,
    /// Which splitter output was chosen, if the source is a splitter.
    pub output: Option<SplitterOutput>,
}

/// Why a node is not shipping this tick. These are expected steady states,
/// not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StallReason {
    Empty,
    NoTarget,
    TargetOccupied,
    /// The slot references a resource that no longer exists.
    Orphaned,
}

/// Read-only borrow of everything a node needs to decide whether it can ship.
#[derive(Clone, Copy)]
pub struct TransportView<'a> {
    pub nodes: &'a SlotMap<NodeId, Node>,
    pub grid: &'a GridIndex,
    pub topology: &'a TopologyGraph,
    pub resources: &'a SlotMap<ResourceId, Resource>,
}

impl Node {
    pub fn new(kind: NodeKind, position: GridPosition, facing: Direction) -> Self {
        Self {
            kind,
            state: NodeState::new_for(&kind),
            position,
            facing,
            footprint: kind.base_footprint().for_facing(facing),
            slot: None,
            parent: None,
            child: None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }

    /// Decide whether this node can ship this tick and where to.
    ///
    /// Ready iff the slot is full, a valid target exists, and that target's
    /// slot is empty. Pure: splitter and intersection state only change when
    /// the move is committed.
    pub fn ready_to_ship(&self, id: NodeId, view: TransportView<'_>) -> Result<Proposal, StallReason> {
        let occupant = self.slot.ok_or(StallReason::Empty)?;
        let resource = occupant.resource;

        let (target, output) = match (&self.kind, &self.state) {
            (NodeKind::Consumer, _) => {
                return Ok(Proposal {
                    resource,
                    target: ShipTarget::Collect,
                    output: None,
                });
            }
            (NodeKind::Intersection, NodeState::Intersection { ship_direction }) => {
                let dir = (*ship_direction).ok_or(StallReason::NoTarget)?;
                let target = connection::receiver_towards(view.grid, view.nodes, id, dir)
                    .ok_or(StallReason::NoTarget)?;
                (target, None)
            }
            (NodeKind::Splitter { policy }, NodeState::Splitter(state)) => {
                let resource_type = view
                    .resources
                    .get(resource)
                    .map(|r| r.resource_type)
                    .ok_or(StallReason::Orphaned)?;
                let left = view.topology.target(id);
                let right = view.topology.secondary(id);
                let (target, output) = match (left, right) {
                    (Some(l), Some(r)) => match state.preferred(*policy, resource_type) {
                        SplitterOutput::Left => (l, SplitterOutput::Left),
                        SplitterOutput::Right => (r, SplitterOutput::Right),
                    },
                    (Some(l), None) => (l, SplitterOutput::Left),
                    (None, Some(r)) => (r, SplitterOutput::Right),
                    (None, None) => return Err(StallReason::NoTarget),
                };
                (target, Some(output))
            }
            _ => (view.topology.target(id).ok_or(StallReason::NoTarget)?, None),
        };

        let receiver = view.nodes.get(target).ok_or(StallReason::NoTarget)?;
        if receiver.is_occupied() {
            return Err(StallReason::TargetOccupied);
        }

        Ok(Proposal {
            resource,
            target: ShipTarget::Node(target),
            output,
        })
    }

    /// Fill the slot. Never checks who is sending, only that the slot is
    /// empty. `from` is the sender's anchor; an intersection records the
    /// geometric direction from it as its shipping direction, or its own
    /// facing when the resource was inserted without a sender.
    pub fn receive(&mut self, resource: ResourceId, from: Option<GridPosition>, now: Ticks) -> bool {
        if self.slot.is_some() {
            tracing::debug!(?resource, position = ?self.position, "receive refused: slot full");
            return false;
        }
        self.slot = Some(Occupant {
            resource,
            receipt_time: now,
        });
        if let NodeState::Intersection { ship_direction } = &mut self.state {
            *ship_direction = match from {
                Some(f) => Direction::between(f, self.position),
                None => Some(self.facing),
            };
        }
        true
    }

    /// Empty the slot, returning what it held.
    pub fn release(&mut self) -> Option<Occupant> {
        if let NodeState::Intersection { ship_direction } = &mut self.state {
            *ship_direction = None;
        }
        self.slot.take()
    }

    /// Advance a producer's timer by one tick. Returns the type to spawn
    /// when the interval has elapsed and the slot is free.
    pub fn advance_producer(&mut self) -> Option<ResourceTypeId> {
        let NodeKind::Producer {
            resource_type,
            interval,
        } = self.kind
        else {
            return None;
        };
        let NodeState::Producer { elapsed } = &mut self.state else {
            return None;
        };
        *elapsed = (*elapsed + 1).min(interval);
        if *elapsed >= interval && self.slot.is_none() {
            *elapsed = 0;
            Some(resource_type)
        } else {
            None
        }
    }

    /// Update splitter selection state after a committed shipment.
    pub fn record_shipment(&mut self, output: SplitterOutput, resource_type: ResourceTypeId) {
        if let (NodeKind::Splitter { policy }, NodeState::Splitter(state)) =
            (&self.kind, &mut self.state)
        {
            state.record(*policy, output, resource_type);
        }
    }
}
