//! Connection resolver: pure geometry deciding which neighbour a node ships
//! into and which neighbour may feed it.
//!
//! Terminology used throughout:
//!
//! - **output direction**: the direction a resource travels when it leaves
//!   the node (a node's facing, except for splitters whose static output is
//!   the child on their left).
//! - **input travel direction**: the facing an upstream node must have to
//!   feed this node. Straight belts need the same facing as themselves, a
//!   left corner needs its facing rotated clockwise, a right corner needs it
//!   rotated counter-clockwise.
//! - **input side**: the side of the node the upstream cell is on; always
//!   the opposite of the input travel direction.
//!
//! An edge `a -> b` exists only when `b` covers `a`'s output cell *and* `b`
//! accepts resources travelling in `a`'s output direction. Getting the
//! corner rule wrong produces an edge that never ships.

use crate::grid::{Direction, GridIndex, GridPosition};
use crate::id::NodeId;
use crate::node::{Node, NodeKind};
use slotmap::SlotMap;

/// Turn a resource takes when moving from one node into the next, relative
/// to the sender's facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Turn {
    Forward,
    Left,
    Right,
}

/// Statically resolved outgoing links of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    /// The single forward target (for splitters: the left-hand child).
    pub target: Option<NodeId>,
    /// Splitter's right-hand candidate.
    pub secondary: Option<NodeId>,
}

/// The facing an upstream node must have to feed a node of `kind` facing
/// `facing`. `None` for kinds with no fixed input (producers have none,
/// intersections and consumers accept any).
pub fn input_travel_direction(kind: &NodeKind, facing: Direction) -> Option<Direction> {
    match kind {
        NodeKind::Straight | NodeKind::Splitter { .. } | NodeKind::Combiner => Some(facing),
        NodeKind::LeftCorner => Some(facing.rotate_cw()),
        NodeKind::RightCorner => Some(facing.rotate_ccw()),
        NodeKind::Intersection | NodeKind::Consumer | NodeKind::Producer { .. } => None,
    }
}

/// Whether a node of `kind` facing `facing` takes resources travelling in
/// `travel`.
pub fn accepts(kind: &NodeKind, facing: Direction, travel: Direction) -> bool {
    match kind {
        NodeKind::Producer { .. } => false,
        NodeKind::Intersection | NodeKind::Consumer => true,
        // Backward neighbour plus the child feeding in from the left side.
        NodeKind::Combiner => travel == facing || travel == facing.rotate_cw(),
        _ => input_travel_direction(kind, facing) == Some(travel),
    }
}

/// Direction of the static output edge. Intersections choose theirs at
/// runtime and consumers have none.
pub fn output_direction(kind: &NodeKind, facing: Direction) -> Option<Direction> {
    match kind {
        NodeKind::Intersection | NodeKind::Consumer => None,
        NodeKind::Splitter { .. } => Some(facing.rotate_ccw()),
        _ => Some(facing),
    }
}

/// Direction of the splitter's spatial right-hand output.
pub fn secondary_output_direction(kind: &NodeKind, facing: Direction) -> Option<Direction> {
    match kind {
        NodeKind::Splitter { .. } => Some(facing.rotate_cw()),
        _ => None,
    }
}

/// Cell and facing of the child belt a splitter or combiner places along
/// with itself. The child always sits on the parent's left: a splitter's
/// child carries resources away from it, a combiner's child feeds into it.
pub fn child_placement(
    kind: &NodeKind,
    position: GridPosition,
    facing: Direction,
) -> Option<(GridPosition, Direction)> {
    let cell = position.step(facing.rotate_ccw());
    match kind {
        NodeKind::Splitter { .. } => Some((cell, facing.rotate_ccw())),
        NodeKind::Combiner => Some((cell, facing.rotate_cw())),
        _ => None,
    }
}

/// The cell a node at `origin` would ship into when sending towards `dir`.
pub fn output_cell(node: &Node, dir: Direction) -> GridPosition {
    node.footprint.edge_cell(node.position, dir)
}

/// The cell an upstream feeder must occupy, if the kind has a fixed input.
pub fn input_cell(node: &Node) -> Option<GridPosition> {
    input_travel_direction(&node.kind, node.facing)
        .map(|travel| node.footprint.edge_cell(node.position, travel.opposite()))
}

/// The node that would receive from `id` when sending towards `dir`, if one
/// exists there and accepts that travel direction.
pub fn receiver_towards(
    grid: &GridIndex,
    nodes: &SlotMap<NodeId, Node>,
    id: NodeId,
    dir: Direction,
) -> Option<NodeId> {
    let node = nodes.get(id)?;
    let candidate = grid.node_at(output_cell(node, dir))?;
    if candidate == id {
        return None;
    }
    let other = nodes.get(candidate)?;
    accepts(&other.kind, other.facing, dir).then_some(candidate)
}

/// Resolve the static links of `id` from the grid.
pub fn resolve_links(grid: &GridIndex, nodes: &SlotMap<NodeId, Node>, id: NodeId) -> Links {
    let Some(node) = nodes.get(id) else {
        return Links::default();
    };
    Links {
        target: output_direction(&node.kind, node.facing)
            .and_then(|dir| receiver_towards(grid, nodes, id, dir)),
        secondary: secondary_output_direction(&node.kind, node.facing)
            .and_then(|dir| receiver_towards(grid, nodes, id, dir)),
    }
}

/// Every neighbour an intersection could ship into, one per accepting side.
pub fn lateral_receivers(
    grid: &GridIndex,
    nodes: &SlotMap<NodeId, Node>,
    id: NodeId,
) -> Vec<NodeId> {
    Direction::all()
        .into_iter()
        .filter_map(|dir| receiver_towards(grid, nodes, id, dir))
        .collect()
}

/// A node is structurally connected when its forward neighbour accepts its
/// output direction and its input-side neighbour faces its input travel
/// direction. Kinds without an output (consumers) or without a fixed input
/// (producers, intersections) waive that half of the check.
pub fn is_structurally_connected(
    grid: &GridIndex,
    nodes: &SlotMap<NodeId, Node>,
    id: NodeId,
) -> bool {
    let Some(node) = nodes.get(id) else {
        return false;
    };

    let forward_ok = match node.kind {
        NodeKind::Consumer => true,
        NodeKind::Intersection => !lateral_receivers(grid, nodes, id).is_empty(),
        _ => output_direction(&node.kind, node.facing)
            .and_then(|dir| receiver_towards(grid, nodes, id, dir))
            .is_some(),
    };

    let backward_ok = match (input_travel_direction(&node.kind, node.facing), input_cell(node)) {
        (Some(travel), Some(cell)) => grid
            .node_at(cell)
            .and_then(|n| nodes.get(n))
            .is_some_and(|feeder| feeder.facing == travel),
        _ => true,
    };

    forward_ok && backward_ok
}

/// Turn taken by a resource leaving a node facing `facing` at `from` for the
/// cell `to`.
pub fn relative_turn(facing: Direction, from: GridPosition, to: GridPosition) -> Turn {
    match Direction::between(from, to) {
        Some(dir) if dir == facing.rotate_ccw() => Turn::Left,
        Some(dir) if dir == facing.rotate_cw() => Turn::Right,
        _ => Turn::Forward,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ResourceTypeId;
    use crate::node::SplitterPolicy;

    fn put(
        grid: &mut GridIndex,
        nodes: &mut SlotMap<NodeId, Node>,
        kind: NodeKind,
        x: i32,
        y: i32,
        facing: Direction,
    ) -> NodeId {
        let position = GridPosition::new(x, y);
        let node = Node::new(kind, position, facing);
        let footprint = node.footprint;
        let id = nodes.insert(node);
        grid.place(id, position, footprint).unwrap();
        id
    }

    #[test]
    fn corner_input_rules_are_asymmetric() {
        let f = Direction::North;
        assert_eq!(input_travel_direction(&NodeKind::Straight, f), Some(Direction::North));
        assert_eq!(input_travel_direction(&NodeKind::LeftCorner, f), Some(Direction::East));
        assert_eq!(input_travel_direction(&NodeKind::RightCorner, f), Some(Direction::West));
        let producer = NodeKind::Producer {
            resource_type: ResourceTypeId(0),
            interval: 1,
        };
        assert_eq!(input_travel_direction(&producer, f), None);
    }

    #[test]
    fn straight_input_side_is_opposite_of_facing() {
        let node = Node::new(NodeKind::Straight, GridPosition::new(0, 0), Direction::East);
        assert_eq!(input_cell(&node), Some(GridPosition::new(-1, 0)));
        assert_eq!(output_cell(&node, Direction::East), GridPosition::new(1, 0));
    }

    #[test]
    fn left_corner_is_fed_from_its_right_hand_side() {
        // A left corner facing north receives resources travelling east,
        // i.e. from the cell to its west.
        let node = Node::new(NodeKind::LeftCorner, GridPosition::new(5, 5), Direction::North);
        assert_eq!(input_cell(&node), Some(GridPosition::new(4, 5)));
        let node = Node::new(NodeKind::RightCorner, GridPosition::new(5, 5), Direction::North);
        assert_eq!(input_cell(&node), Some(GridPosition::new(6, 5)));
    }

    #[test]
    fn links_follow_acceptance() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let a = put(&mut grid, &mut nodes, NodeKind::Straight, 0, 0, Direction::East);
        let b = put(&mut grid, &mut nodes, NodeKind::Straight, 1, 0, Direction::East);
        // Facing the wrong way: a straight pointing north will not take
        // resources travelling east.
        let c = put(&mut grid, &mut nodes, NodeKind::Straight, 2, 0, Direction::North);

        assert_eq!(resolve_links(&grid, &nodes, a).target, Some(b));
        assert_eq!(resolve_links(&grid, &nodes, b).target, None);
        assert_eq!(resolve_links(&grid, &nodes, c).target, None);
    }

    #[test]
    fn corner_links_only_with_matching_feed() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let a = put(&mut grid, &mut nodes, NodeKind::Straight, 0, 1, Direction::East);
        let corner = put(&mut grid, &mut nodes, NodeKind::LeftCorner, 1, 1, Direction::North);
        let up = put(&mut grid, &mut nodes, NodeKind::Straight, 1, 0, Direction::North);

        assert_eq!(resolve_links(&grid, &nodes, a).target, Some(corner));
        assert_eq!(resolve_links(&grid, &nodes, corner).target, Some(up));
        assert!(is_structurally_connected(&grid, &nodes, corner));

        // A right corner in the same spot would want feeding from the east.
        let mut grid2 = GridIndex::new();
        let mut nodes2 = SlotMap::with_key();
        let a2 = put(&mut grid2, &mut nodes2, NodeKind::Straight, 0, 1, Direction::East);
        let rc = put(&mut grid2, &mut nodes2, NodeKind::RightCorner, 1, 1, Direction::North);
        assert_eq!(resolve_links(&grid2, &nodes2, a2).target, None);
        assert!(!is_structurally_connected(&grid2, &nodes2, rc));
    }

    #[test]
    fn splitter_links_child_left_and_neighbour_right() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let s = put(
            &mut grid,
            &mut nodes,
            NodeKind::Splitter {
                policy: SplitterPolicy::RoundRobin,
            },
            5,
            5,
            Direction::North,
        );
        let left = put(&mut grid, &mut nodes, NodeKind::Straight, 4, 5, Direction::West);
        let right = put(&mut grid, &mut nodes, NodeKind::Straight, 6, 5, Direction::East);

        let links = resolve_links(&grid, &nodes, s);
        assert_eq!(links.target, Some(left));
        assert_eq!(links.secondary, Some(right));
    }

    #[test]
    fn child_belts_link_with_their_parent() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let origin = GridPosition::new(3, 3);

        let splitter = NodeKind::Splitter {
            policy: SplitterPolicy::RoundRobin,
        };
        let (cell, facing) = child_placement(&splitter, origin, Direction::East).unwrap();
        assert_eq!((cell, facing), (GridPosition::new(3, 2), Direction::North));
        let s = put(&mut grid, &mut nodes, splitter, 3, 3, Direction::East);
        let child = put(&mut grid, &mut nodes, NodeKind::Straight, cell.x, cell.y, facing);
        assert_eq!(resolve_links(&grid, &nodes, s).target, Some(child));

        let (cell, facing) = child_placement(&NodeKind::Combiner, origin, Direction::East).unwrap();
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let c = put(&mut grid, &mut nodes, NodeKind::Combiner, 3, 3, Direction::East);
        let child = put(&mut grid, &mut nodes, NodeKind::Straight, cell.x, cell.y, facing);
        assert_eq!(resolve_links(&grid, &nodes, child).target, Some(c));

        assert_eq!(child_placement(&NodeKind::Straight, origin, Direction::East), None);
    }

    #[test]
    fn combiner_accepts_back_and_left_child() {
        let kind = NodeKind::Combiner;
        assert!(accepts(&kind, Direction::North, Direction::North));
        assert!(accepts(&kind, Direction::North, Direction::East));
        assert!(!accepts(&kind, Direction::North, Direction::West));
        assert!(!accepts(&kind, Direction::North, Direction::South));
    }

    #[test]
    fn intersection_reaches_all_accepting_sides() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let i = put(&mut grid, &mut nodes, NodeKind::Intersection, 0, 0, Direction::North);
        let east = put(&mut grid, &mut nodes, NodeKind::Straight, 1, 0, Direction::East);
        let south = put(&mut grid, &mut nodes, NodeKind::Straight, 0, 1, Direction::South);
        // Feeding into the intersection, not out of it.
        let _west = put(&mut grid, &mut nodes, NodeKind::Straight, -1, 0, Direction::East);

        let mut lateral = lateral_receivers(&grid, &nodes, i);
        lateral.sort();
        let mut expected = vec![east, south];
        expected.sort();
        assert_eq!(lateral, expected);
        assert_eq!(resolve_links(&grid, &nodes, i), Links::default());
    }

    #[test]
    fn relative_turns() {
        let o = GridPosition::new(0, 0);
        assert_eq!(relative_turn(Direction::North, o, GridPosition::new(0, -1)), Turn::Forward);
        assert_eq!(relative_turn(Direction::North, o, GridPosition::new(-1, 0)), Turn::Left);
        assert_eq!(relative_turn(Direction::North, o, GridPosition::new(1, 0)), Turn::Right);
    }

    #[test]
    fn producer_and_consumer_waive_missing_ports() {
        let mut grid = GridIndex::new();
        let mut nodes = SlotMap::with_key();
        let p = put(
            &mut grid,
            &mut nodes,
            NodeKind::Producer {
                resource_type: ResourceTypeId(1),
                interval: 4,
            },
            0,
            0,
            Direction::East,
        );
        let c = put(&mut grid, &mut nodes, NodeKind::Consumer, 1, 0, Direction::East);
        assert!(is_structurally_connected(&grid, &nodes, p));
        assert!(is_structurally_connected(&grid, &nodes, c));
    }
}
