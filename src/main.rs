use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

use mesh_radio_simulator::common::config::RuntimeConfig;
use mesh_radio_simulator::common::scene::load_scene;
use mesh_radio_simulator::simulation::run_simulation;

const USAGE: &str = "usage: mesh-radio-simulator <scene.json> [export.json]";

fn init_logging(config: &RuntimeConfig) {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .filter(Some("mesh_radio_simulator"), LevelFilter::Debug);
    if let Some(filter) = &config.log_filter {
        builder.parse_filters(filter);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }
    builder.init();
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let scene_path = args.next().context(USAGE)?;
    let export_override = args.next().map(PathBuf::from);

    let config_path = RuntimeConfig::config_path_from_scene(&scene_path);
    let config = RuntimeConfig::load_or_default(&config_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Invalid runtime config {}", config_path.display()))?;

    init_logging(&config);
    info!("Starting up");
    if !config_path.exists() {
        info!("No config file at {}, using defaults", config_path.display());
    }

    let scene = load_scene(&scene_path).with_context(|| format!("Could not load scene {}", scene_path))?;
    info!(
        "Loaded scene {} with {} node(s) and {} scripted transmission(s)",
        scene_path,
        scene.nodes.len(),
        scene.transmissions.len()
    );

    let outcome = futures::executor::block_on(run_simulation(&scene, &config)).context("Simulation setup failed")?;

    for node in &outcome.nodes {
        info!(
            "Node {}: received {}, originated {}, rebroadcast {}",
            node.node_id, node.received, node.originated, node.rebroadcast
        );
    }

    let routes = outcome.dispatcher.log().routes();
    for ((sender, packet_id), hops) in &routes.routes {
        let reached = routes.reached(*sender, *packet_id);
        info!(
            "Packet {} from {:#x}: {} hop(s), reached nodes {:?}",
            packet_id,
            sender,
            hops.len(),
            reached
        );
    }

    if let Some(path) = export_override.or(config.export_path) {
        outcome.dispatcher.log().write_json(&path)?;
        info!("Transmission log written to {}", path.display());
    }

    Ok(())
}
