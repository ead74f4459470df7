//! Scene loading, parsing, and validation logic.
//!
//! A scene describes the nodes of one simulation, the shared radio channel
//! parameters, the propagation model and an optional script of text
//! transmissions to originate.

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::simulation::geometry::{PlacementArea, find_random_position};
use crate::simulation::signal_calculations::{PathLossParameters, RadioParameters};
use crate::simulation::types::{MAX_NODE_ID, Point, TransportId, default_port_for};

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Node entry of a scene file.
#[derive(Debug, Deserialize, Clone)]
pub struct SceneNode {
    pub node_id: u32,
    /// Omitted positions are drawn randomly inside `Scene::placement`.
    #[serde(default)]
    pub position: Option<Point>,
    /// Transport port; defaults to the TCP port offset plus the node index.
    #[serde(default)]
    pub port: Option<u16>,
}

/// A text packet to originate from `node_id` at `at_ms` after start.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScriptedTransmission {
    #[serde(default)]
    pub at_ms: u64,
    pub node_id: u32,
    /// Destination node id; broadcast when omitted.
    #[serde(default)]
    pub to: Option<u32>,
    pub text: String,
    #[serde(default)]
    pub want_ack: bool,
    #[serde(default)]
    pub hop_limit: Option<u8>,
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize)]
pub struct Scene {
    /// All nodes present in the scene.
    pub nodes: Vec<SceneNode>,
    #[serde(default)]
    pub radio_parameters: RadioParameters,
    #[serde(default)]
    pub path_loss_model: PathLossParameters,
    /// Required as soon as one node has no position.
    #[serde(default)]
    pub placement: Option<PlacementArea>,
    #[serde(default)]
    pub transmissions: Vec<ScriptedTransmission>,
}

/// A scene node with its final position and transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedNode {
    pub node_id: u32,
    pub position: Point,
    pub transport: TransportId,
}

impl SceneNode {
    fn transport(&self, index: usize) -> TransportId {
        TransportId(self.port.unwrap_or_else(|| default_port_for(index)))
    }
}

impl Scene {
    /// Resolve positions and transports for every node, in scene order.
    ///
    /// Nodes without coordinates are placed with an RNG seeded from the
    /// placement area, so the same scene always yields the same layout.
    pub fn placed_nodes(&self) -> Result<Vec<PlacedNode>, String> {
        let mut rng = StdRng::seed_from_u64(self.placement.as_ref().map_or(0, |p| p.seed));
        // fixed positions are known up front and constrain random ones
        let mut occupied: Vec<Point> = self.nodes.iter().filter_map(|n| n.position).collect();

        let mut placed = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let position = match node.position {
                Some(position) => position,
                None => {
                    let area = self
                        .placement
                        .as_ref()
                        .ok_or_else(|| format!("Node {} has no position and the scene has no placement area", node.node_id))?;
                    let position = find_random_position(&occupied, area, &mut rng)
                        .ok_or_else(|| format!("No free position for node {} at minimum distance {} m", node.node_id, area.min_distance))?;
                    log::debug!("Node {} placed at ({:.1}, {:.1})", node.node_id, position.x, position.y);
                    occupied.push(position);
                    position
                }
            };
            placed.push(PlacedNode {
                node_id: node.node_id,
                position,
                transport: node.transport(index),
            });
        }
        Ok(placed)
    }
}

/// Load and parse a scene from a file.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;
    parse_scene(&data)
}

/// Parse and validate a scene from JSON text.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// Returns `Err(String)` with a description of the first problem found.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;
    // keeps every node distance representable as f32 for the path loss models
    const MAX_WORLD_COORD: f64 = 1.0e7;

    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    let mut node_ids = HashSet::new();
    let mut ports = HashSet::new();
    let mut needs_placement = false;
    for (index, node) in scene.nodes.iter().enumerate() {
        if node.node_id > MAX_NODE_ID {
            return Err(format!("Node id {} exceeds maximum of {}", node.node_id, MAX_NODE_ID));
        }
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
        let transport = node.transport(index);
        if !ports.insert(transport) {
            return Err(format!("Duplicate transport found: {} (node {})", transport, node.node_id));
        }
        match node.position {
            Some(p) if !p.x.is_finite() || !p.y.is_finite() => {
                return Err(format!("Node {} position ({}, {}) is not finite", node.node_id, p.x, p.y));
            }
            Some(p) if p.x.abs() > MAX_WORLD_COORD || p.y.abs() > MAX_WORLD_COORD => {
                return Err(format!(
                    "Node {} position ({}, {}) exceeds world bounds (±{})",
                    node.node_id, p.x, p.y, MAX_WORLD_COORD
                ));
            }
            Some(_) => {}
            None => needs_placement = true,
        }
    }

    if needs_placement {
        match &scene.placement {
            None => return Err("Nodes without position require a 'placement' area".to_string()),
            Some(area) => {
                if !(area.width > 0.0 && area.height > 0.0) {
                    return Err("Invalid placement area, width and height must be positive".to_string());
                }
                if area.width > MAX_WORLD_COORD || area.height > MAX_WORLD_COORD {
                    return Err(format!("Placement area exceeds world bounds ({})", MAX_WORLD_COORD));
                }
                if !(area.min_distance >= 0.0) {
                    return Err("Invalid placement min_distance, must be non-negative".to_string());
                }
            }
        }
    }

    let radio = &scene.radio_parameters;
    if !(radio.frequency.is_finite() && radio.frequency > 0.0) {
        return Err("Invalid frequency, must be positive and finite".to_string());
    }
    for (name, value) in [
        ("tx_power", radio.tx_power),
        ("antenna_gain", radio.antenna_gain),
        ("noise_floor", radio.noise_floor),
    ] {
        if !value.is_finite() {
            return Err(format!("Invalid {}, must be finite", name));
        }
    }
    if radio.sensitivity_threshold().is_err() {
        return Err(format!("No sensitivity threshold configured for modem {:?}", radio.modem));
    }
    scene.path_loss_model.validate()?;

    for (idx, step) in scene.transmissions.iter().enumerate() {
        if !node_ids.contains(&step.node_id) {
            return Err(format!("Transmission {} refers to unknown node {}", idx, step.node_id));
        }
        if let Some(to) = step.to {
            if !node_ids.contains(&to) {
                return Err(format!("Transmission {} is addressed to unknown node {}", idx, to));
            }
        }
    }

    Ok(())
}
