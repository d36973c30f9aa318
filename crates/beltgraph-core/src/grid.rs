//! Grid index for belt placement and neighbour lookup.
//!
//! Maps integer grid cells to the node occupying them. Multi-cell footprints
//! are supported: every covered cell points back to the owning node, and the
//! node's top-left anchor and footprint are kept alongside.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A cell on the 2D grid. `y` grows southward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The adjacent cell in `dir`.
    pub fn step(self, dir: Direction) -> Self {
        let (dx, dy) = dir.offset();
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Cardinal facing of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All four cardinal directions, clockwise from north.
    pub fn all() -> [Direction; 4] {
        [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ]
    }

    /// Offset for this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    /// Rotate 90 degrees clockwise.
    pub fn rotate_cw(self) -> Self {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    /// Rotate 90 degrees counter-clockwise.
    pub fn rotate_ccw(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::East => Direction::North,
            Direction::South => Direction::East,
            Direction::West => Direction::South,
        }
    }

    pub fn opposite(self) -> Self {
        self.rotate_cw().rotate_cw()
    }

    /// True for East/West.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }

    /// Geometric direction from `from` towards `to`, by dominant axis.
    ///
    /// Diagonal offsets (|dx| == |dy|) resolve to the horizontal axis.
    /// Returns `None` when the two cells coincide.
    pub fn between(from: GridPosition, to: GridPosition) -> Option<Direction> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx == 0 && dy == 0 {
            return None;
        }
        if dx.abs() >= dy.abs() {
            Some(if dx > 0 { Direction::East } else { Direction::West })
        } else {
            Some(if dy > 0 { Direction::South } else { Direction::North })
        }
    }
}

/// The footprint (size) of a node on the grid, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    pub width: u32,
    pub height: u32,
}

impl Footprint {
    /// A 1x1 node.
    pub fn single() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }

    /// Orient a north-facing footprint (width across, height along travel)
    /// to `facing`. East/West swap width and height.
    pub fn for_facing(self, facing: Direction) -> Self {
        if facing.is_horizontal() {
            Self {
                width: self.height,
                height: self.width,
            }
        } else {
            self
        }
    }

    /// Extent of the footprint along `dir`.
    pub fn extent_along(&self, dir: Direction) -> u32 {
        if dir.is_horizontal() {
            self.width
        } else {
            self.height
        }
    }

    /// Iterate over all cells covered by this footprint at the given origin.
    /// Origin is the top-left corner.
    pub fn tiles(&self, origin: GridPosition) -> impl Iterator<Item = GridPosition> {
        let w = self.width as i32;
        let h = self.height as i32;
        let ox = origin.x;
        let oy = origin.y;
        (0..h).flat_map(move |dy| (0..w).map(move |dx| GridPosition::new(ox + dx, oy + dy)))
    }

    /// The cell just past the footprint edge on side `dir`, aligned with the
    /// top-left anchor's row or column.
    pub fn edge_cell(&self, origin: GridPosition, dir: Direction) -> GridPosition {
        match dir {
            Direction::North => GridPosition::new(origin.x, origin.y - 1),
            Direction::West => GridPosition::new(origin.x - 1, origin.y),
            Direction::South => GridPosition::new(origin.x, origin.y + self.height as i32),
            Direction::East => GridPosition::new(origin.x + self.width as i32, origin.y),
        }
    }
}

impl Default for Footprint {
    fn default() -> Self {
        Self::single()
    }
}

/// Errors from grid operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GridError {
    #[error("cell {0:?} is occupied")]
    Occupied(GridPosition),
    #[error("node is not placed on the grid")]
    NotPlaced,
    #[error("node is already placed on the grid")]
    AlreadyPlaced,
}

// ---------------------------------------------------------------------------
// GridIndex
// ---------------------------------------------------------------------------

/// Maps grid cells to nodes.
///
/// Maintains a bidirectional mapping:
/// - `tiles`: cell -> node (which node occupies each cell)
/// - `positions`: node -> top-left anchor
/// - `footprints`: node -> oriented footprint
#[derive(Debug, Default, Clone)]
pub struct GridIndex {
    tiles: BTreeMap<GridPosition, NodeId>,
    positions: SecondaryMap<NodeId, GridPosition>,
    footprints: SecondaryMap<NodeId, Footprint>,
}

impl GridIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Placement --

    /// Reserve every cell of `footprint` at `origin` for `node`.
    pub fn place(
        &mut self,
        node: NodeId,
        origin: GridPosition,
        footprint: Footprint,
    ) -> Result<(), GridError> {
        if self.positions.contains_key(node) {
            return Err(GridError::AlreadyPlaced);
        }
        if let Some(taken) = footprint.tiles(origin).find(|t| self.tiles.contains_key(t)) {
            return Err(GridError::Occupied(taken));
        }

        for tile in footprint.tiles(origin) {
            self.tiles.insert(tile, node);
        }
        self.positions.insert(node, origin);
        self.footprints.insert(node, footprint);
        Ok(())
    }

    /// Release the node's cells. Returns its anchor.
    pub fn remove(&mut self, node: NodeId) -> Result<GridPosition, GridError> {
        let origin = self.positions.remove(node).ok_or(GridError::NotPlaced)?;
        let footprint = self.footprints.remove(node).ok_or(GridError::NotPlaced)?;
        for tile in footprint.tiles(origin) {
            self.tiles.remove(&tile);
        }
        Ok(origin)
    }

    /// Swap a placed node's footprint (rotation). Fails without side effects
    /// if the new cells collide with another node.
    pub fn reshape(&mut self, node: NodeId, footprint: Footprint) -> Result<(), GridError> {
        let origin = *self.positions.get(node).ok_or(GridError::NotPlaced)?;
        if let Some(taken) = footprint
            .tiles(origin)
            .find(|t| self.tiles.get(t).is_some_and(|&n| n != node))
        {
            return Err(GridError::Occupied(taken));
        }
        self.remove(node)?;
        self.place(node, origin, footprint)
    }

    // -- Point queries --

    pub fn node_at(&self, pos: GridPosition) -> Option<NodeId> {
        self.tiles.get(&pos).copied()
    }

    pub fn position(&self, node: NodeId) -> Option<GridPosition> {
        self.positions.get(node).copied()
    }

    pub fn footprint(&self, node: NodeId) -> Option<Footprint> {
        self.footprints.get(node).copied()
    }

    pub fn is_occupied(&self, pos: GridPosition) -> bool {
        self.tiles.contains_key(&pos)
    }

    // -- Adjacency --

    /// The node in the cell just past `node`'s edge on side `dir`.
    pub fn neighbor_in_direction(&self, node: NodeId, dir: Direction) -> Option<NodeId> {
        let origin = self.position(node)?;
        let footprint = self.footprint(node)?;
        self.node_at(footprint.edge_cell(origin, dir))
            .filter(|&n| n != node)
    }

    /// 4-directional neighbours (unique per direction) touching any edge cell.
    pub fn neighbors_4(&self, node: NodeId) -> Vec<(Direction, NodeId)> {
        let (Some(origin), Some(footprint)) = (self.position(node), self.footprint(node)) else {
            return Vec::new();
        };

        let own: std::collections::BTreeSet<GridPosition> = footprint.tiles(origin).collect();
        let mut result = Vec::new();
        for dir in Direction::all() {
            for tile in &own {
                let next = tile.step(dir);
                if own.contains(&next) {
                    continue;
                }
                if let Some(&other) = self.tiles.get(&next)
                    && !result.contains(&(dir, other))
                {
                    result.push((dir, other));
                }
            }
        }
        result
    }

    // -- Stats --

    pub fn node_count(&self) -> usize {
        self.positions.len()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.positions.clear();
        self.footprints.clear();
    }
}
