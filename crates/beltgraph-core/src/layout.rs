//! Data-driven network layouts loaded from JSON.
//!
//! Feature-gated behind `data-loader`. A layout names its resource types,
//! carries the network configuration, and lists the nodes to place as one
//! group when the network is built.

use crate::fixed::checked_f64_to_fixed64;
use crate::grid::{Direction, GridPosition};
use crate::id::ResourceTypeId;
use crate::mover::ResourceMover;
use crate::network::{Network, NetworkConfig, NodeSpec, SetupError};
use crate::node::{NodeKind, SplitterPolicy};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a layout.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("unknown node kind: {0}")]
    UnknownKind(String),
    #[error("unknown facing: {0}")]
    UnknownFacing(String),
    #[error("unknown resource reference: {0}")]
    UnknownResourceRef(String),
    #[error("producer at ({x}, {y}) needs a resource and an interval")]
    IncompleteProducer { x: i32, y: i32 },
    #[error("tick interval {0} is out of range")]
    InvalidTickInterval(f64),
    #[error("network setup failed: {0}")]
    Setup(#[from] SetupError),
}

// ---------------------------------------------------------------------------
// JSON data structures
// ---------------------------------------------------------------------------

/// Top-level layout document.
#[derive(Debug, serde::Deserialize)]
pub struct LayoutData {
    #[serde(default)]
    pub config: ConfigData,
    /// Resource type names; a name's index is its `ResourceTypeId`.
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeData>,
}

/// JSON representation of [`NetworkConfig`]. Missing fields keep defaults.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ConfigData {
    /// Seconds per tick.
    pub tick_interval: Option<f64>,
    pub run_on_start: Option<bool>,
    pub default_splitter_policy: Option<SplitterPolicy>,
    pub event_capacity: Option<usize>,
}

/// JSON representation of one node.
#[derive(Debug, serde::Deserialize)]
pub struct NodeData {
    pub kind: String, // "straight", "left_corner", "splitter", ...
    pub x: i32,
    pub y: i32,
    pub facing: String, // "north", "east", "south", "west"
    /// Producer resource, by name.
    #[serde(default)]
    pub resource: Option<String>,
    /// Producer spawn interval in ticks.
    #[serde(default)]
    pub interval: Option<u64>,
    /// Splitter policy; the config default when omitted.
    #[serde(default)]
    pub policy: Option<SplitterPolicy>,
}

// ---------------------------------------------------------------------------
// Loaded layout
// ---------------------------------------------------------------------------

/// A validated layout, ready to build.
#[derive(Debug, Clone)]
pub struct Layout {
    pub config: NetworkConfig,
    pub resource_names: Vec<String>,
    pub nodes: Vec<NodeSpec>,
}

impl Layout {
    /// Look up a resource type by name.
    pub fn resource_type(&self, name: &str) -> Option<ResourceTypeId> {
        self.resource_names
            .iter()
            .position(|n| n == name)
            .map(|i| ResourceTypeId(i as u32))
    }

    /// Build a network with this layout placed as one group.
    pub fn build(self, mover: impl ResourceMover + 'static) -> Result<Network, LayoutError> {
        let network = Network::builder()
            .config(self.config)
            .mover(mover)
            .nodes(self.nodes)
            .build()?;
        Ok(network)
    }
}

// ---------------------------------------------------------------------------
// Loading functions
// ---------------------------------------------------------------------------

/// Load a layout from a JSON string.
pub fn load_layout_json(json: &str) -> Result<Layout, LayoutError> {
    let data: LayoutData = serde_json::from_str(json)?;
    build_layout(data)
}

/// Load a layout from JSON bytes.
pub fn load_layout_json_bytes(bytes: &[u8]) -> Result<Layout, LayoutError> {
    let data: LayoutData = serde_json::from_slice(bytes)?;
    build_layout(data)
}

fn parse_facing(s: &str) -> Result<Direction, LayoutError> {
    match s {
        "north" => Ok(Direction::North),
        "east" => Ok(Direction::East),
        "south" => Ok(Direction::South),
        "west" => Ok(Direction::West),
        other => Err(LayoutError::UnknownFacing(other.to_string())),
    }
}

fn build_layout(data: LayoutData) -> Result<Layout, LayoutError> {
    let mut config = NetworkConfig::default();
    if let Some(seconds) = data.config.tick_interval {
        config.tick_interval =
            checked_f64_to_fixed64(seconds).ok_or(LayoutError::InvalidTickInterval(seconds))?;
    }
    if let Some(run) = data.config.run_on_start {
        config.run_on_start = run;
    }
    if let Some(policy) = data.config.default_splitter_policy {
        config.default_splitter_policy = policy;
    }
    if let Some(capacity) = data.config.event_capacity {
        config.event_capacity = capacity;
    }

    let resource_id = |name: &str| {
        data.resources
            .iter()
            .position(|n| n == name)
            .map(|i| ResourceTypeId(i as u32))
            .ok_or_else(|| LayoutError::UnknownResourceRef(name.to_string()))
    };

    let mut nodes = Vec::with_capacity(data.nodes.len());
    for node in &data.nodes {
        let kind = match node.kind.as_str() {
            "straight" => NodeKind::Straight,
            "left_corner" => NodeKind::LeftCorner,
            "right_corner" => NodeKind::RightCorner,
            "intersection" => NodeKind::Intersection,
            "combiner" => NodeKind::Combiner,
            "consumer" => NodeKind::Consumer,
            "splitter" => NodeKind::Splitter {
                policy: node.policy.unwrap_or(config.default_splitter_policy),
            },
            "producer" => {
                let (Some(resource), Some(interval)) = (&node.resource, node.interval) else {
                    return Err(LayoutError::IncompleteProducer {
                        x: node.x,
                        y: node.y,
                    });
                };
                NodeKind::Producer {
                    resource_type: resource_id(resource)?,
                    interval,
                }
            }
            other => return Err(LayoutError::UnknownKind(other.to_string())),
        };
        nodes.push(NodeSpec::new(
            kind,
            GridPosition::new(node.x, node.y),
            parse_facing(&node.facing)?,
        ));
    }

    Ok(Layout {
        config,
        resource_names: data.resources,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed64;
    use crate::mover::NullMover;

    const LINE: &str = r#"{
        "config": { "tick_interval": 0.5, "default_splitter_policy": "type_sticky" },
        "resources": ["iron_ore", "copper_ore"],
        "nodes": [
            { "kind": "producer", "x": 0, "y": 0, "facing": "east",
              "resource": "copper_ore", "interval": 2 },
            { "kind": "straight", "x": 1, "y": 0, "facing": "east" },
            { "kind": "splitter", "x": 2, "y": 0, "facing": "east" },
            { "kind": "consumer", "x": 2, "y": -2, "facing": "north" }
        ]
    }"#;

    #[test]
    fn load_empty_json() {
        let layout = load_layout_json("{}").unwrap();
        assert!(layout.nodes.is_empty());
        assert_eq!(layout.config, NetworkConfig::default());
    }

    #[test]
    fn load_full_layout() {
        let layout = load_layout_json(LINE).unwrap();
        assert_eq!(layout.config.tick_interval, Fixed64::from_num(0.5));
        assert_eq!(layout.nodes.len(), 4);
        assert_eq!(layout.resource_type("copper_ore"), Some(ResourceTypeId(1)));
        assert_eq!(
            layout.nodes[0].kind,
            NodeKind::Producer {
                resource_type: ResourceTypeId(1),
                interval: 2
            }
        );
        // Splitter without a policy picks up the configured default.
        assert_eq!(
            layout.nodes[2].kind,
            NodeKind::Splitter {
                policy: SplitterPolicy::TypeSticky
            }
        );
    }

    #[test]
    fn load_builds_network() {
        let mut network = load_layout_json(LINE).unwrap().build(NullMover).unwrap();
        // Four specs plus the splitter's child belt, which feeds the consumer.
        assert_eq!(network.node_count(), 5);
        assert_eq!(network.pending_settle_count(), 1);
        network.settle_pending();
        assert_eq!(network.paths().path_count(), 1);
        assert_eq!(network.paths().assigned_count(), 5);
    }

    #[test]
    fn unknown_resource_fails() {
        let json = r#"{ "nodes": [ { "kind": "producer", "x": 0, "y": 0,
            "facing": "east", "resource": "gold", "interval": 1 } ] }"#;
        assert!(matches!(
            load_layout_json(json).unwrap_err(),
            LayoutError::UnknownResourceRef(name) if name == "gold"
        ));
    }

    #[test]
    fn unknown_kind_and_facing_fail() {
        let json = r#"{ "nodes": [ { "kind": "teleporter", "x": 0, "y": 0, "facing": "east" } ] }"#;
        assert!(matches!(load_layout_json(json).unwrap_err(), LayoutError::UnknownKind(_)));
        let json = r#"{ "nodes": [ { "kind": "straight", "x": 0, "y": 0, "facing": "up" } ] }"#;
        assert!(matches!(load_layout_json(json).unwrap_err(), LayoutError::UnknownFacing(_)));
    }

    #[test]
    fn zero_interval_fails_at_build() {
        let json = r#"{ "resources": ["iron_ore"], "nodes": [ { "kind": "producer",
            "x": 0, "y": 0, "facing": "east", "resource": "iron_ore", "interval": 0 } ] }"#;
        let err = load_layout_json(json).unwrap().build(NullMover).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::Setup(SetupError::ZeroProducerInterval(_))
        ));
    }

    #[test]
    fn huge_tick_interval_is_an_error() {
        let err = load_layout_json(r#"{ "config": { "tick_interval": 1e20 } }"#).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidTickInterval(v) if v == 1e20));
    }

    #[test]
    fn invalid_json_fails() {
        assert!(matches!(
            load_layout_json("{ not json").unwrap_err(),
            LayoutError::JsonParse(_)
        ));
    }
}
