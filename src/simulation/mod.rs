//! Relay engine of the mesh radio simulator.
//!
//! Nodes never talk to each other directly. Every transmission goes to the
//! central network task, which decides from geometry and the radio channel
//! model which other nodes hear it and hands each of them a tagged copy.
//!
//! ## Module Organization
//!
//! - `types`: Packets, node records, channel type aliases and id constants
//! - `signal_calculations`: Path loss models and RSSI/SNR formulas
//! - `geometry`: Distances and random node placement
//! - `registry`: Node lookup by id and by transport
//! - `channel`: Receiver set computation for one transmission
//! - `dispatcher`: Deduplication, local ids and concurrent delivery
//! - `transmission_log`: Append-only event log, export and route views
//! - `network`: Central network task and simulation assembly
//! - `node_task`: In-process node endpoints
//! - `error`: Error enums

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod geometry;
pub mod network;
pub mod node_task;
pub mod registry;
pub mod signal_calculations;
pub mod transmission_log;
pub mod types;

pub use channel::{ChannelSimulator, Reception};
pub use dispatcher::{DeliveryPolicy, DispatchReport, PacketDispatcher, TrackedTransmission};
pub use network::{NetworkStats, SimulationOutcome, network_task, run_simulation};
pub use registry::NodeRegistry;
pub use signal_calculations::{PathLossModel, RadioParameters};
pub use transmission_log::{RouteGraph, TransmissionLog, TransmissionRecord};
pub use types::{MeshPacket, Node, Point, TransmissionEvent, TransportId};
