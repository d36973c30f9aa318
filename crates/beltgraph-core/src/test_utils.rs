//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::fixed::Fixed64;
use crate::grid::{Direction, GridPosition};
use crate::id::{NodeId, ResourceId, ResourceTypeId};
use crate::mover::{Movement, ResourceMover};
use crate::network::{Network, NodeSpec};
use crate::node::{NodeKind, SplitterPolicy};
use std::cell::RefCell;
use std::rc::Rc;

// ===========================================================================
// Constructors
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

pub fn pos(x: i32, y: i32) -> GridPosition {
    GridPosition::new(x, y)
}

pub fn iron() -> ResourceTypeId {
    ResourceTypeId(0)
}

pub fn copper() -> ResourceTypeId {
    ResourceTypeId(1)
}

pub fn coal() -> ResourceTypeId {
    ResourceTypeId(2)
}

pub fn producer(resource_type: ResourceTypeId, interval: u64) -> NodeKind {
    NodeKind::Producer {
        resource_type,
        interval,
    }
}

pub fn splitter(policy: SplitterPolicy) -> NodeKind {
    NodeKind::Splitter { policy }
}

// ===========================================================================
// Networks
// ===========================================================================

/// A running network with a mover that ignores everything.
pub fn headless_network() -> Network {
    Network::builder()
        .headless()
        .build()
        .expect("default config is valid")
}

/// Specs for a straight run of `len` belts starting at `start`.
pub fn belt_run(start: GridPosition, facing: Direction, len: usize) -> Vec<NodeSpec> {
    let mut cell = start;
    (0..len)
        .map(|_| {
            let spec = NodeSpec::new(NodeKind::Straight, cell, facing);
            cell = cell.step(facing);
            spec
        })
        .collect()
}

/// Place a straight run one node at a time and settle it.
pub fn place_line(
    network: &mut Network,
    start: GridPosition,
    facing: Direction,
    len: usize,
) -> Vec<NodeId> {
    let ids = belt_run(start, facing, len)
        .into_iter()
        .map(|spec| {
            network
                .place_node(spec.kind, spec.position, spec.facing)
                .expect("cells are free")
        })
        .collect();
    network.settle_pending();
    ids
}

/// Run `n` ticks and return the total number of committed moves.
pub fn run_ticks(network: &mut Network, n: u64) -> usize {
    (0..n).map(|_| network.step().moves_committed).sum()
}

// ===========================================================================
// Recording mover
// ===========================================================================

/// Shared log of everything a [`RecordingMover`] saw.
#[derive(Debug, Default, Clone)]
pub struct MoverLog {
    pub movements: Vec<Movement>,
    pub despawned: Vec<ResourceId>,
}

/// A mover that appends every instruction to a shared [`MoverLog`].
#[derive(Debug, Default, Clone)]
pub struct RecordingMover {
    log: Rc<RefCell<MoverLog>>,
}

impl RecordingMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the log that stays valid after the mover is boxed.
    pub fn log(&self) -> Rc<RefCell<MoverLog>> {
        Rc::clone(&self.log)
    }
}

impl ResourceMover for RecordingMover {
    fn begin(&mut self, movement: Movement) {
        self.log.borrow_mut().movements.push(movement);
    }

    fn despawn(&mut self, resource: ResourceId) {
        self.log.borrow_mut().despawned.push(resource);
    }
}
