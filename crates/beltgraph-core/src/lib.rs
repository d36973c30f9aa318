//! Beltgraph Core -- a tick-driven simulator for grid-placed conveyor networks.
//!
//! Resources travel between single-slot transport nodes (belts, corners,
//! intersections, splitters, combiners, producers and consumers) placed on
//! an integer grid. Links between nodes are derived from geometry, guarded
//! against cycles, and grouped into connected paths with stable ids.
//!
//! # Tick Pipeline
//!
//! Each call to [`network::Network::step`] runs:
//!
//! 1. **Settle** -- Assign path ids to nodes placed or rewired since the last
//!    step. Runs even while paused.
//! 2. **Produce** -- Producers advance their timers and spawn into empty slots.
//! 3. **Read** -- Nodes are ordered by longest remaining downstream path and
//!    each proposes at most one move against pre-tick state.
//! 4. **Resolve** -- Competing moves into one target keep the oldest resource.
//! 5. **Commit** -- Surviving moves ship and the mover is told.
//! 6. **Deliver** -- Buffered events reach passive subscribers.
//!
//! # Editing Pattern
//!
//! Placement updates the grid and topology at once; path ids follow at the
//! next settle step, so a group placed in one frame settles as a whole:
//!
//! ```rust,ignore
//! let mut network = Network::builder().headless().build()?;
//! let ids = network.place_group(&specs, None)?;
//! network.step(); // paths assigned here
//! let path = network.path_of(ids[0]);
//! ```
//!
//! # Key Types
//!
//! - [`network::Network`] -- Owns every node, resource and index; runs ticks.
//! - [`grid::GridIndex`] -- Cell to node lookup and neighbour queries.
//! - [`connection`] -- Geometric link rules per node kind.
//! - [`node::Node`] -- The transport node family and its ship contract.
//! - [`topology::TopologyGraph`] -- Directed links with a loop guard.
//! - [`scheduler`] -- Longest-path ordering and conflict resolution.
//! - [`path::PathTracker`] -- Connected-component ids with split and merge.
//! - [`event::EventBus`] -- Buffered events with passive subscribers.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point time for deterministic runs.

pub mod connection;
pub mod event;
pub mod fixed;
pub mod grid;
pub mod id;
#[cfg(feature = "data-loader")]
pub mod layout;
pub mod mover;
pub mod network;
pub mod node;
pub mod path;
pub mod scheduler;
pub mod settle;
pub mod sim;
pub mod topology;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
