//! Production line example: a layout loaded from JSON, run for a minute.
//!
//! Two producers feed a combiner, a splitter fans the merged stream out to
//! two consumers. A printing mover shows every shipment and a passive
//! listener counts collected widgets per resource type.
//!
//! Run with: `RUST_LOG=beltgraph_core=debug cargo run -p beltgraph-core --example production_line`

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use beltgraph_core::event::{Event, EventKind};
use beltgraph_core::fixed::Fixed64;
use beltgraph_core::layout::load_layout_json;
use beltgraph_core::mover::{Movement, ResourceMover};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LAYOUT: &str = r#"{
    "config": { "tick_interval": 0.25, "default_splitter_policy": "round_robin" },
    "resources": ["iron_ore", "copper_ore"],
    "nodes": [
        { "kind": "producer", "x": 0, "y": 0, "facing": "east",
          "resource": "iron_ore", "interval": 2 },
        { "kind": "straight", "x": 1, "y": 0, "facing": "east" },
        { "kind": "straight", "x": 2, "y": 0, "facing": "east" },
        { "kind": "combiner", "x": 3, "y": 0, "facing": "east" },
        { "kind": "producer", "x": 3, "y": -2, "facing": "south",
          "resource": "copper_ore", "interval": 3 },
        { "kind": "straight", "x": 4, "y": 0, "facing": "east" },
        { "kind": "splitter", "x": 5, "y": 0, "facing": "east" },
        { "kind": "consumer", "x": 5, "y": -2, "facing": "north" },
        { "kind": "straight", "x": 5, "y": 1, "facing": "south" },
        { "kind": "consumer", "x": 5, "y": 2, "facing": "south" }
    ]
}"#;

/// Prints each movement instead of animating it.
struct PrintingMover;

impl ResourceMover for PrintingMover {
    fn begin(&mut self, movement: Movement) {
        println!(
            "  {:?} ({}, {}) -> ({}, {}) {:?}",
            movement.resource,
            movement.from.x,
            movement.from.y,
            movement.to.x,
            movement.to.y,
            movement.turn,
        );
    }
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("beltgraph_core=info".parse().unwrap());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Step 1: Load the layout and build the network ---

    let layout = load_layout_json(LAYOUT).expect("layout is valid");
    let names = layout.resource_names.clone();
    let mut network = layout.build(PrintingMover).expect("layout places cleanly");
    tracing::info!(nodes = network.node_count(), "network built");

    // --- Step 2: Count collections per resource type ---

    let tally: Rc<RefCell<BTreeMap<u32, u32>>> = Rc::default();
    let sink = Rc::clone(&tally);
    network.on_passive(
        EventKind::WidgetCollected,
        Box::new(move |event: &Event| {
            if let Event::WidgetCollected { resource_type, .. } = event {
                *sink.borrow_mut().entry(resource_type.0).or_default() += 1;
            }
        }),
    );

    // --- Step 3: Run one simulated minute in 100ms frames ---

    let frame = Fixed64::from_num(0.1);
    for _ in 0..600 {
        let result = network.advance(frame);
        if result.ticks_run > 0 {
            println!("tick {}", network.tick());
        }
    }

    // --- Step 4: Report ---

    println!("\n=== After {} ticks ===", network.tick());
    for path in network.paths().paths() {
        println!("{path}: {} nodes", network.path_members(path).len());
    }
    for (type_id, count) in tally.borrow().iter() {
        let name = names.get(*type_id as usize).map_or("?", String::as_str);
        println!("{name}: {count} collected");
    }
    println!("state hash: {:016x}", network.state_hash());
}
