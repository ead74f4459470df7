//! Append-only log of transmission events.
//!
//! Entries are kept in event order. The log is only ever appended to; the
//! export and route views below read it without modifying it.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::dispatcher::TrackedTransmission;

/// Exported form of one log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionRecord {
    pub local_id: u32,
    pub transmitter_id: u32,
    pub receiver_ids: Vec<u32>,
    pub raw_packet_id: u32,
    /// `from` field of the packet; with `raw_packet_id` it names the transmission.
    pub sender_id: u32,
    pub observed_at: DateTime<Utc>,
}

impl From<&TrackedTransmission> for TransmissionRecord {
    fn from(t: &TrackedTransmission) -> Self {
        Self {
            local_id: t.local_id,
            transmitter_id: t.transmitter_id,
            receiver_ids: t.receiver_ids.clone(),
            raw_packet_id: t.packet.id,
            sender_id: t.packet.from,
            observed_at: t.observed_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransmissionLog {
    entries: Mutex<Vec<TrackedTransmission>>,
}

impl TransmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: TrackedTransmission) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries in event order.
    pub fn entries(&self) -> Vec<TrackedTransmission> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn records(&self) -> Vec<TransmissionRecord> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(TransmissionRecord::from)
            .collect()
    }

    pub fn routes(&self) -> RouteGraph {
        RouteGraph::from_records(&self.records())
    }

    /// Write the exported records as a JSON array.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(&self.records()).context("Failed to serialize transmission log")?;
        fs::write(path, data).with_context(|| format!("Failed to write transmission log: {}", path.display()))
    }
}

/// One over-the-air hop of a transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub local_id: u32,
    pub transmitter_id: u32,
    pub receiver_ids: Vec<u32>,
}

/// Route view reconstructed from log records.
#[derive(Debug, Default)]
pub struct RouteGraph {
    /// Transmitter → every node that ever heard it.
    pub adjacency: BTreeMap<u32, BTreeSet<u32>>,
    /// `(sender_id, raw_packet_id)` → hops in event order.
    pub routes: BTreeMap<(u32, u32), Vec<Hop>>,
}

impl RouteGraph {
    pub fn from_records(records: &[TransmissionRecord]) -> Self {
        let mut graph = RouteGraph::default();
        for record in records {
            graph
                .adjacency
                .entry(record.transmitter_id)
                .or_default()
                .extend(record.receiver_ids.iter().copied());
            graph.routes.entry((record.sender_id, record.raw_packet_id)).or_default().push(Hop {
                local_id: record.local_id,
                transmitter_id: record.transmitter_id,
                receiver_ids: record.receiver_ids.clone(),
            });
        }
        graph
    }

    /// Every node that heard the given transmission on any hop.
    pub fn reached(&self, sender_id: u32, packet_id: u32) -> BTreeSet<u32> {
        self.routes
            .get(&(sender_id, packet_id))
            .map(|hops| hops.iter().flat_map(|h| h.receiver_ids.iter().copied()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::{DecodedData, MeshPacket, TEXT_MESSAGE_APP_PORTNUM};

    fn tracked(local_id: u32, from: u32, id: u32, transmitter_id: u32, receivers: &[u32]) -> TrackedTransmission {
        TrackedTransmission {
            local_id,
            packet: MeshPacket {
                to: 0xFFFF_FFFF,
                from,
                id,
                decoded: DecodedData {
                    portnum: TEXT_MESSAGE_APP_PORTNUM,
                    payload: Vec::new(),
                    want_response: false,
                },
                want_ack: false,
                hop_limit: Some(3),
                rx_rssi: 0,
                rx_snr: 0,
            },
            transmitter_id,
            receiver_ids: receivers.to_vec(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn append_keeps_event_order() {
        let log = TransmissionLog::new();
        assert!(log.is_empty());
        log.append(tracked(0, 16, 1, 0, &[1]));
        log.append(tracked(1, 17, 1, 1, &[0, 2]));
        log.append(tracked(0, 16, 1, 2, &[1]));

        let ids: Vec<u32> = log.entries().iter().map(|e| e.local_id).collect();
        assert_eq!(ids, vec![0, 1, 0]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn records_use_export_field_names() {
        let log = TransmissionLog::new();
        log.append(tracked(4, 16, 99, 0, &[1, 2]));
        let json = serde_json::to_value(&log.records()).unwrap();
        let first = &json[0];
        assert_eq!(first["localId"], 4);
        assert_eq!(first["transmitterId"], 0);
        assert_eq!(first["receiverIds"], serde_json::json!([1, 2]));
        assert_eq!(first["rawPacketId"], 99);
        assert_eq!(first["senderId"], 16);
    }

    #[test]
    fn routes_collect_hops_per_transmission() {
        let log = TransmissionLog::new();
        // node 0 originates, node 1 relays the same packet to node 2
        log.append(tracked(0, 16, 5, 0, &[1]));
        log.append(tracked(1, 18, 1, 2, &[1]));
        log.append(tracked(0, 16, 5, 1, &[0, 2]));

        let graph = log.routes();
        let hops = &graph.routes[&(16, 5)];
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].transmitter_id, 0);
        assert_eq!(hops[1].transmitter_id, 1);
        assert_eq!(graph.reached(16, 5), BTreeSet::from([0, 1, 2]));
        assert_eq!(graph.adjacency[&1], BTreeSet::from([0, 2]));
        assert!(graph.reached(16, 6).is_empty());
    }

    #[test]
    fn write_json_round_trips_through_file() {
        let log = TransmissionLog::new();
        log.append(tracked(0, 16, 1, 0, &[1]));
        let path = std::env::temp_dir().join(format!("mesh-radio-simulator-log-{}.json", std::process::id()));
        log.write_json(&path).unwrap();

        let parsed: Vec<TransmissionRecord> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, log.records());
        let _ = fs::remove_file(&path);
    }
}
