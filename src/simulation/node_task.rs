//! Per-node endpoint task.
//!
//! Stands in for an external node process behind its transport handle:
//! - Accepts relayed packets and logs what it hears
//! - Originates scripted text packets with an increasing per-node packet id
//! - Rebroadcasts each heard transmission once while hop limit remains,
//!   keeping `from` and `id`, the way flooding firmware does
//!
//! The relay engine treats these tasks as opaque; they exist so a scene can
//! run end to end in-process.

use std::collections::HashSet;

use super::types::{
    DecodedData, MeshPacket, NodeInputMessage, NodeInputQueueReceiver, NodesOutputQueueSender, TEXT_MESSAGE_APP_PORTNUM, TransmissionEvent,
    TransportId,
};

/// Counters reported by a node endpoint when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub node_id: u32,
    pub received: u32,
    pub originated: u32,
    pub rebroadcast: u32,
}

struct NodeContext {
    node_id: u32,
    hw_id: u32,
    transport: TransportId,
    next_packet_id: u32,
    seen: HashSet<(u32, u32)>,
    out_tx: NodesOutputQueueSender,
    stats: NodeStats,
}

impl NodeContext {
    async fn transmit(&mut self, packet: MeshPacket) {
        self.seen.insert(packet.transmission_key());
        self.out_tx
            .send(TransmissionEvent {
                transport: self.transport,
                packet,
            })
            .await;
    }

    async fn handle_send_text(&mut self, to: u32, text: String, want_ack: bool, hop_limit: u8) {
        self.next_packet_id += 1;
        let packet = MeshPacket {
            to,
            from: self.hw_id,
            id: self.next_packet_id,
            decoded: DecodedData {
                portnum: TEXT_MESSAGE_APP_PORTNUM,
                payload: text.into_bytes(),
                want_response: false,
            },
            want_ack,
            hop_limit: Some(hop_limit),
            rx_rssi: 0,
            rx_snr: 0,
        };
        log::info!("[{}] *TX* id {} to {:#x}, {} bytes", self.node_id, packet.id, to, packet.payload_len());
        self.stats.originated += 1;
        self.transmit(packet).await;
    }

    async fn handle_delivery(&mut self, packet: MeshPacket) {
        self.stats.received += 1;
        log::debug!(
            "[{}] *RX* from {:#x} id {} rssi {} snr {} hop_limit {:?}",
            self.node_id,
            packet.from,
            packet.id,
            packet.rx_rssi,
            packet.rx_snr,
            packet.hop_limit
        );

        let first_time = self.seen.insert(packet.transmission_key());
        let addressed_here = packet.to == self.hw_id;
        let remaining_hops = packet.hop_limit.unwrap_or(0);
        if !first_time || addressed_here || remaining_hops == 0 {
            return;
        }

        let relay = MeshPacket {
            hop_limit: Some(remaining_hops - 1),
            rx_rssi: 0,
            rx_snr: 0,
            ..packet
        };
        self.stats.rebroadcast += 1;
        self.transmit(relay).await;
    }
}

/// Run a node endpoint until it receives `NodeInputMessage::Shutdown`.
pub async fn node_task(node_id: u32, hw_id: u32, transport: TransportId, in_rx: NodeInputQueueReceiver, out_tx: NodesOutputQueueSender) -> NodeStats {
    let mut context = NodeContext {
        node_id,
        hw_id,
        transport,
        next_packet_id: 0,
        seen: HashSet::new(),
        out_tx,
        stats: NodeStats {
            node_id,
            ..NodeStats::default()
        },
    };

    loop {
        match in_rx.receive().await {
            NodeInputMessage::Deliver(packet) => context.handle_delivery(packet).await,
            NodeInputMessage::SendText {
                to,
                text,
                want_ack,
                hop_limit,
            } => context.handle_send_text(to, text, want_ack, hop_limit).await,
            NodeInputMessage::Shutdown => break,
        }
    }

    log::debug!("[{}] endpoint stopped", node_id);
    context.stats
}
