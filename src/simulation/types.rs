//! Type definitions for the simulation.
//!
//! Contains the data structures shared across the relay engine:
//! - Mesh packet shape as seen on the simulated air interface
//! - Node identity, position and transport handle
//! - Communication channels between node endpoints and the network task

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of payload bytes a single mesh packet may carry.
pub const DATA_PAYLOAD_LEN: usize = 233;

/// Port number stamped on every relayed copy so the receiving firmware
/// treats it as a frame coming from the simulated radio.
pub const SIMULATOR_APP_PORTNUM: u32 = 69;

/// Port number used by node endpoints for plain text packets.
pub const TEXT_MESSAGE_APP_PORTNUM: u32 = 1;

/// Destination address meaning "every node".
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Hardware ids are node ids shifted by this offset.
pub const HW_ID_OFFSET: u32 = 16;

/// Largest node id whose hardware id still fits in a `u32`.
pub const MAX_NODE_ID: u32 = u32::MAX - HW_ID_OFFSET;

/// Transport ports are node indices shifted by this offset.
pub const TCP_PORT_OFFSET: u16 = 4403;

/// Hop limit used when a scripted transmission does not set one.
pub const DEFAULT_HOP_LIMIT: u8 = 3;

/// Depth of the per-node input channel (network task → node endpoint).
/// Kept small so a stalled endpoint shows up as a delivery timeout quickly.
pub const NODE_INPUT_QUEUE_SIZE: usize = 10;
/// Bounded channel used to deliver packets and commands to a node endpoint.
pub type NodeInputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, NodeInputMessage, NODE_INPUT_QUEUE_SIZE>;
/// Receiver side of the node input channel.
pub type NodeInputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, NodeInputMessage, NODE_INPUT_QUEUE_SIZE>;
/// Sender side of the node input channel.
pub type NodeInputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, NodeInputMessage, NODE_INPUT_QUEUE_SIZE>;

/// Depth of the shared output channel (node endpoints → network task).
pub const NODES_OUTPUT_BUFFER_CAPACITY: usize = 32;
/// Bounded channel carrying every "node transmitted" event.
pub type NodesOutputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, TransmissionEvent, NODES_OUTPUT_BUFFER_CAPACITY>;
/// Sender side of the shared output channel.
pub type NodesOutputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, TransmissionEvent, NODES_OUTPUT_BUFFER_CAPACITY>;
/// Receiver side of the shared output channel.
pub type NodesOutputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, TransmissionEvent, NODES_OUTPUT_BUFFER_CAPACITY>;

/// Raised once to stop the network task between two transmission events.
pub type ShutdownSignal = Signal<CriticalSectionRawMutex, ()>;

/// Simple 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Identifies the transport endpoint a node process is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransportId(pub u16);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Decoded part of a mesh packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedData {
    pub portnum: u32,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub want_response: bool,
}

/// A mesh packet as exchanged with node processes.
///
/// `id` is assigned by the sender and is only unique per sender, so a
/// transmission is identified by the `(from, id)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshPacket {
    pub to: u32,
    pub from: u32,
    pub id: u32,
    pub decoded: DecodedData,
    #[serde(default)]
    pub want_ack: bool,
    #[serde(default)]
    pub hop_limit: Option<u8>,
    #[serde(default)]
    pub rx_rssi: i32,
    #[serde(default)]
    pub rx_snr: i32,
}

impl MeshPacket {
    /// Key under which repeated observations of one transmission collapse.
    pub fn transmission_key(&self) -> (u32, u32) {
        (self.from, self.id)
    }

    pub fn payload_len(&self) -> usize {
        self.decoded.payload.len()
    }

    /// Build the copy handed to one receiver: header fields are preserved,
    /// radio metrics are truncated to whole dB and the port is replaced by
    /// the simulator relay port.
    pub fn relay_copy(&self, rssi: f32, snr: f32) -> MeshPacket {
        MeshPacket {
            to: self.to,
            from: self.from,
            id: self.id,
            decoded: DecodedData {
                portnum: SIMULATOR_APP_PORTNUM,
                payload: self.decoded.payload.clone(),
                want_response: self.decoded.want_response,
            },
            want_ack: self.want_ack,
            hop_limit: self.hop_limit,
            rx_rssi: rssi as i32,
            rx_snr: snr as i32,
        }
    }
}

/// Inbound "node transmitted" event, as reported by the transport layer.
#[derive(Debug, Clone)]
pub struct TransmissionEvent {
    /// Transport endpoint the packet was received from.
    pub transport: TransportId,
    pub packet: MeshPacket,
}

/// Messages accepted by a node endpoint.
#[derive(Debug, Clone)]
pub enum NodeInputMessage {
    /// Hand a relayed packet to the node's radio receive path.
    Deliver(MeshPacket),
    /// Ask the node to originate a text packet.
    SendText {
        to: u32,
        text: String,
        want_ack: bool,
        hop_limit: u8,
    },
    /// Stop the endpoint; sent once after the network task has finished.
    Shutdown,
}

/// Handle used to reach a node's external process.
#[derive(Clone)]
pub struct TransportHandle {
    pub id: TransportId,
    pub sender: NodeInputQueueSender,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A simulated node. Positions never change once the node is registered.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: u32,
    /// Address the node's firmware uses in `from`/`to` fields.
    pub hw_id: u32,
    pub position: Point,
    pub transport: TransportHandle,
}

/// Hardware id a node's firmware is started with, `None` above `MAX_NODE_ID`.
pub fn hw_id_for(node_id: u32) -> Option<u32> {
    node_id.checked_add(HW_ID_OFFSET)
}

/// Transport port assigned to the node at `index` in the scene.
pub fn default_port_for(index: usize) -> u16 {
    TCP_PORT_OFFSET + index as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> MeshPacket {
        MeshPacket {
            to: BROADCAST_ADDR,
            from: 17,
            id: 42,
            decoded: DecodedData {
                portnum: TEXT_MESSAGE_APP_PORTNUM,
                payload: b"hello".to_vec(),
                want_response: true,
            },
            want_ack: true,
            hop_limit: Some(3),
            rx_rssi: 0,
            rx_snr: 0,
        }
    }

    #[test]
    fn relay_copy_preserves_header_and_truncates_metrics() {
        let packet = sample_packet();
        let copy = packet.relay_copy(-84.9, 29.7);

        assert_eq!(copy.to, packet.to);
        assert_eq!(copy.from, packet.from);
        assert_eq!(copy.id, packet.id);
        assert!(copy.want_ack);
        assert!(copy.decoded.want_response);
        assert_eq!(copy.hop_limit, Some(3));
        assert_eq!(copy.decoded.payload, packet.decoded.payload);
        assert_eq!(copy.decoded.portnum, SIMULATOR_APP_PORTNUM);
        assert_eq!(copy.rx_rssi, -84);
        assert_eq!(copy.rx_snr, 29);
    }

    #[test]
    fn inbound_packet_optional_fields_default() {
        let json = r#"{"to": 4294967295, "from": 16, "id": 7, "decoded": {"portnum": 1, "payload": [104, 105]}}"#;
        let packet: MeshPacket = serde_json::from_str(json).unwrap();
        assert!(!packet.want_ack);
        assert!(!packet.decoded.want_response);
        assert_eq!(packet.hop_limit, None);
        assert_eq!(packet.transmission_key(), (16, 7));
    }

    #[test]
    fn addressing_offsets() {
        assert_eq!(hw_id_for(0), Some(16));
        assert_eq!(hw_id_for(MAX_NODE_ID), Some(u32::MAX));
        assert_eq!(hw_id_for(MAX_NODE_ID + 1), None);
        assert_eq!(default_port_for(2), 4405);
    }
}
