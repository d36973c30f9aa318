//! The resource-mover collaborator.
//!
//! Shipping a resource hands it a movement instruction keyed by where the
//! receiving node sits relative to the sender. Whatever animates resources
//! implements [`ResourceMover`] and calls `Network::complete_movement` when
//! the visual move finishes. Transport correctness never waits on it.

use crate::connection::Turn;
use crate::grid::GridPosition;
use crate::id::ResourceId;

/// One committed shipment, as seen by the mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movement {
    pub resource: ResourceId,
    pub from: GridPosition,
    pub to: GridPosition,
    pub turn: Turn,
}

/// Receives movement instructions for shipped resources.
pub trait ResourceMover {
    /// A resource left `from` for `to` this tick.
    fn begin(&mut self, movement: Movement);

    /// A resource was destroyed (collected or its node removed).
    fn despawn(&mut self, _resource: ResourceId) {}
}

/// A mover for headless runs: drops every instruction.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMover;

impl ResourceMover for NullMover {
    fn begin(&mut self, _movement: Movement) {}
}
