//! Packet dispatcher: turns "node transmitted" events into deliveries.
//!
//! Processing steps per event:
//! 1) Reject payloads above `DATA_PAYLOAD_LEN` (nothing is delivered or logged)
//! 2) Resolve the transmitter from the event's transport
//! 3) Recompute the receiver set over all other nodes
//! 4) Look up or create the tracked transmission for `(from, id)`
//! 5) Deliver a relay copy, tagged with that receiver's RSSI/SNR, to every
//!    receiver concurrently; each delivery is bounded by a timeout and a
//!    small number of attempts
//! 6) Append the tracked transmission to the log
//!
//! ## Deduplication
//!
//! The same radio transmission can be reported more than once (relays keep
//! `from` and `id`). The first observation of a key assigns the next local
//! id; later observations reuse it. The lookup-or-create runs under one
//! mutex, so two racing observations of a key can never get different ids.

use chrono::{DateTime, Utc};
use embassy_time::{Duration, with_timeout};
use futures::future::join_all;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use super::channel::ChannelSimulator;
use super::error::{DeliveryError, DispatchError};
use super::registry::NodeRegistry;
use super::transmission_log::TransmissionLog;
use super::types::{DATA_PAYLOAD_LEN, MeshPacket, Node, NodeInputMessage, TransmissionEvent};

/// A logical transmission, identified by its sender and sender-assigned id.
#[derive(Debug, Clone)]
pub struct TrackedTransmission {
    /// Locally assigned, strictly increasing across distinct transmissions.
    pub local_id: u32,
    /// Most recently observed copy of the packet.
    pub packet: MeshPacket,
    /// Node whose transport reported the latest observation.
    pub transmitter_id: u32,
    /// Receivers computed for the latest observation.
    pub receiver_ids: Vec<u32>,
    pub observed_at: DateTime<Utc>,
}

/// Timeout and retry policy applied to each receiver independently.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            attempts: 2,
        }
    }
}

/// Outcome of one handled transmission event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub local_id: u32,
    pub transmitter_id: u32,
    /// Receivers whose transport accepted the relay copy.
    pub delivered: Vec<u32>,
    /// Receivers skipped after exhausting the delivery policy.
    pub timed_out: Vec<u32>,
}

pub struct PacketDispatcher {
    registry: NodeRegistry,
    channel: ChannelSimulator,
    policy: DeliveryPolicy,
    tracked: Mutex<HashMap<(u32, u32), TrackedTransmission>>,
    next_local_id: AtomicU32,
    log: TransmissionLog,
}

impl PacketDispatcher {
    pub fn new(registry: NodeRegistry, channel: ChannelSimulator, policy: DeliveryPolicy) -> Self {
        Self {
            registry,
            channel,
            policy,
            tracked: Mutex::new(HashMap::new()),
            next_local_id: AtomicU32::new(0),
            log: TransmissionLog::new(),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &ChannelSimulator {
        &self.channel
    }

    pub fn log(&self) -> &TransmissionLog {
        &self.log
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Number of distinct transmissions seen so far.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Handle one inbound transmission event.
    ///
    /// Errors drop the whole event before anything is delivered. Slow
    /// receivers are not errors; they show up in `DispatchReport::timed_out`.
    pub async fn handle_transmission(&self, event: TransmissionEvent) -> Result<DispatchReport, DispatchError> {
        let TransmissionEvent { transport, packet } = event;

        let size = packet.payload_len();
        if size > DATA_PAYLOAD_LEN {
            log::error!("Dropping packet {} from {}: {} byte payload exceeds {}", packet.id, transport, size, DATA_PAYLOAD_LEN);
            return Err(DispatchError::PayloadTooLarge { size });
        }

        let transmitter = self.registry.find_by_transport(transport).map_err(|err| {
            log::error!("Dropping packet {}: {}", packet.id, err);
            DispatchError::UnknownTransmitter(transport)
        })?;

        // Receivers are recomputed on every observation, also for repeats.
        let receptions = self.channel.compute_receivers(transmitter, self.registry.others(transmitter.node_id))?;
        let receiver_ids: Vec<u32> = receptions.iter().map(|r| r.receiver.node_id).collect();

        let snapshot = self.track(&packet, transmitter.node_id, receiver_ids);
        log::info!(
            "Node {} sent portnum {} with id {} over the air! ({} receiver(s))",
            transmitter.node_id,
            packet.decoded.portnum,
            snapshot.local_id,
            snapshot.receiver_ids.len()
        );

        let results = join_all(receptions.iter().map(|r| self.deliver(r.receiver, packet.relay_copy(r.rssi, r.snr)))).await;

        let mut delivered = Vec::new();
        let mut timed_out = Vec::new();
        for (reception, result) in receptions.iter().zip(results) {
            match result {
                Ok(()) => delivered.push(reception.receiver.node_id),
                Err(err) => {
                    log::warn!("Local id {}: {}", snapshot.local_id, err);
                    timed_out.push(reception.receiver.node_id);
                }
            }
        }

        let report = DispatchReport {
            local_id: snapshot.local_id,
            transmitter_id: transmitter.node_id,
            delivered,
            timed_out,
        };
        self.log.append(snapshot);
        Ok(report)
    }

    /// Look up or create the tracked transmission for the packet's key and
    /// record the latest observation on it. Returns a copy for the log.
    fn track(&self, packet: &MeshPacket, transmitter_id: u32, receiver_ids: Vec<u32>) -> TrackedTransmission {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match tracked.entry(packet.transmission_key()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.packet = packet.clone();
                entry.transmitter_id = transmitter_id;
                entry.receiver_ids = receiver_ids;
                entry.observed_at = Utc::now();
                entry
            }
            Entry::Vacant(vacant) => {
                let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
                log::debug!("New transmission ({}, {}) tracked as {}", packet.from, packet.id, local_id);
                vacant.insert(TrackedTransmission {
                    local_id,
                    packet: packet.clone(),
                    transmitter_id,
                    receiver_ids,
                    observed_at: Utc::now(),
                })
            }
        };
        entry.clone()
    }

    /// Hand one relay copy to a receiver's transport, honouring the policy.
    async fn deliver(&self, receiver: &Node, packet: MeshPacket) -> Result<(), DeliveryError> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            let send = receiver.transport.sender.send(NodeInputMessage::Deliver(packet.clone()));
            match with_timeout(self.policy.timeout, send).await {
                Ok(()) => return Ok(()),
                Err(_) => log::debug!("Delivery to node {} timed out (attempt {}/{})", receiver.node_id, attempt, attempts),
            }
        }
        Err(DeliveryError::Timeout {
            node_id: receiver.node_id,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::registry::tests::leaked_handle;
    use crate::simulation::signal_calculations::{ModemPreset, RadioParameters};
    use crate::simulation::types::{
        BROADCAST_ADDR, DecodedData, NODE_INPUT_QUEUE_SIZE, NodeInputQueue, Point, SIMULATOR_APP_PORTNUM, TEXT_MESSAGE_APP_PORTNUM,
        TransportId,
    };
    use futures::executor::block_on;
    use std::sync::Arc;

    struct Fixture {
        dispatcher: PacketDispatcher,
        queues: Vec<&'static NodeInputQueue>,
    }

    /// Nodes at (0,0), (10,0), (1000,0) on ports 4403.. with a linear loss
    /// model and a -100 dBm threshold: node 0 and 1 hear each other, node 2
    /// hears nobody.
    fn fixture() -> Fixture {
        let mut registry = NodeRegistry::new();
        let mut queues = Vec::new();
        for (i, x) in [0.0, 10.0, 1000.0].into_iter().enumerate() {
            let (handle, queue) = leaked_handle(4403 + i as u16);
            registry.register(i as u32, Point::new(x, 0.0), handle).unwrap();
            queues.push(queue);
        }
        let radio = RadioParameters {
            tx_power: 0.0,
            antenna_gain: 0.0,
            noise_floor: -120.0,
            modem: ModemPreset::LongFast,
            sensitivity_thresholds: HashMap::from([(ModemPreset::LongFast, -100.0)]),
            ..RadioParameters::default()
        };
        let channel = ChannelSimulator::new(radio, Box::new(|d: f32, _f: f32| d)).unwrap();
        let policy = DeliveryPolicy {
            timeout: Duration::from_millis(20),
            attempts: 2,
        };
        Fixture {
            dispatcher: PacketDispatcher::new(registry, channel, policy),
            queues,
        }
    }

    fn packet(from: u32, id: u32, payload_len: usize) -> MeshPacket {
        MeshPacket {
            to: BROADCAST_ADDR,
            from,
            id,
            decoded: DecodedData {
                portnum: TEXT_MESSAGE_APP_PORTNUM,
                payload: vec![0x41; payload_len],
                want_response: false,
            },
            want_ack: true,
            hop_limit: Some(3),
            rx_rssi: 0,
            rx_snr: 0,
        }
    }

    fn event(port: u16, packet: MeshPacket) -> TransmissionEvent {
        TransmissionEvent {
            transport: TransportId(port),
            packet,
        }
    }

    fn drain(queue: &NodeInputQueue) -> Vec<MeshPacket> {
        let mut out = Vec::new();
        while let Ok(msg) = queue.try_receive() {
            if let NodeInputMessage::Deliver(p) = msg {
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn delivers_tagged_copies_to_receivers_only() {
        let f = fixture();
        let report = block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 42, 5)))).unwrap();

        assert_eq!(report.transmitter_id, 0);
        assert_eq!(report.delivered, vec![1]);
        assert!(report.timed_out.is_empty());

        let received = drain(f.queues[1]);
        assert_eq!(received.len(), 1);
        let copy = &received[0];
        assert_eq!((copy.from, copy.id, copy.to), (16, 42, BROADCAST_ADDR));
        assert!(copy.want_ack);
        assert_eq!(copy.hop_limit, Some(3));
        assert_eq!(copy.decoded.portnum, SIMULATOR_APP_PORTNUM);
        assert_eq!(copy.rx_rssi, -10);
        assert_eq!(copy.rx_snr, 110);

        assert!(drain(f.queues[0]).is_empty());
        assert!(drain(f.queues[2]).is_empty());
        assert_eq!(f.dispatcher.log().len(), 1);
    }

    #[test]
    fn repeated_observation_reuses_local_id() {
        let f = fixture();
        let first = block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 42, 1)))).unwrap();
        // node 1 relays the same transmission
        let second = block_on(f.dispatcher.handle_transmission(event(4404, packet(16, 42, 1)))).unwrap();

        assert_eq!(first.local_id, second.local_id);
        assert_eq!(second.transmitter_id, 1);
        assert_eq!(second.delivered, vec![0]);
        assert_eq!(f.dispatcher.tracked_count(), 1);

        let entries = f.dispatcher.log().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.local_id == first.local_id));
        assert_eq!(entries[1].receiver_ids, vec![0]);
    }

    #[test]
    fn same_packet_id_from_different_senders_is_distinct() {
        let f = fixture();
        let a = block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 7, 1)))).unwrap();
        let b = block_on(f.dispatcher.handle_transmission(event(4404, packet(17, 7, 1)))).unwrap();
        assert_ne!(a.local_id, b.local_id);
    }

    #[test]
    fn local_ids_increase_with_each_new_key() {
        let f = fixture();
        let ids: Vec<u32> = (0..5)
            .map(|n| block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 100 + n, 1)))).unwrap().local_id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 0);
    }

    #[test]
    fn payload_bound_is_inclusive() {
        let f = fixture();
        assert!(block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 1, DATA_PAYLOAD_LEN)))).is_ok());
        assert_eq!(drain(f.queues[1]).len(), 1);

        let err = block_on(f.dispatcher.handle_transmission(event(4403, packet(16, 2, DATA_PAYLOAD_LEN + 1)))).unwrap_err();
        assert_eq!(err, DispatchError::PayloadTooLarge { size: DATA_PAYLOAD_LEN + 1 });
        assert!(drain(f.queues[1]).is_empty());
        assert_eq!(f.dispatcher.log().len(), 1);
        assert_eq!(f.dispatcher.tracked_count(), 1);
    }

    #[test]
    fn unknown_transport_is_dropped() {
        let f = fixture();
        let err = block_on(f.dispatcher.handle_transmission(event(9999, packet(16, 1, 1)))).unwrap_err();
        assert_eq!(err, DispatchError::UnknownTransmitter(TransportId(9999)));
        assert!(f.dispatcher.log().is_empty());
        assert_eq!(f.dispatcher.tracked_count(), 0);
        assert!(f.queues.iter().all(|q| drain(q).is_empty()));
    }

    #[test]
    fn stalled_receiver_times_out_without_blocking_others() {
        // node 1 sits between two in-range neighbours
        let mut registry = NodeRegistry::new();
        let mut queues = Vec::new();
        for (i, x) in [0.0, 10.0, 20.0].into_iter().enumerate() {
            let (handle, queue) = leaked_handle(5000 + i as u16);
            registry.register(i as u32, Point::new(x, 0.0), handle).unwrap();
            queues.push(queue);
        }
        let radio = RadioParameters {
            tx_power: 0.0,
            sensitivity_thresholds: HashMap::from([(ModemPreset::LongFast, -100.0)]),
            ..RadioParameters::default()
        };
        let channel = ChannelSimulator::new(radio, Box::new(|d: f32, _f: f32| d)).unwrap();
        let dispatcher = PacketDispatcher::new(
            registry,
            channel,
            DeliveryPolicy {
                timeout: Duration::from_millis(10),
                attempts: 2,
            },
        );

        // fill node 0's transport so it cannot accept anything
        for _ in 0..NODE_INPUT_QUEUE_SIZE {
            queues[0].try_send(NodeInputMessage::Shutdown).unwrap();
        }

        let report = block_on(dispatcher.handle_transmission(event(5001, packet(17, 1, 1)))).unwrap();
        assert_eq!(report.delivered, vec![2]);
        assert_eq!(report.timed_out, vec![0]);
        assert_eq!(dispatcher.log().len(), 1);
        assert_eq!(dispatcher.log().entries()[0].receiver_ids, vec![0, 2]);
    }

    /// Node 0's transport is full when the event arrives; one slot frees up
    /// 150 ms later, during the second 100 ms attempt.
    fn deliver_to_busy_receiver(attempts: u32) -> DispatchReport {
        let mut f = fixture();
        f.dispatcher.policy = DeliveryPolicy {
            timeout: Duration::from_millis(100),
            attempts,
        };
        for _ in 0..NODE_INPUT_QUEUE_SIZE {
            f.queues[0].try_send(NodeInputMessage::Shutdown).unwrap();
        }
        let busy = f.queues[0];
        let (report, ()) = block_on(embassy_futures::join::join(
            f.dispatcher.handle_transmission(event(4404, packet(17, 3, 1))),
            async {
                embassy_time::Timer::after(Duration::from_millis(150)).await;
                let _ = busy.try_receive();
            },
        ));
        report.unwrap()
    }

    #[test]
    fn second_attempt_reaches_receiver_that_freed_up() {
        let report = deliver_to_busy_receiver(2);
        assert_eq!(report.delivered, vec![0]);
        assert!(report.timed_out.is_empty());
    }

    #[test]
    fn single_attempt_gives_up_on_busy_receiver() {
        let report = deliver_to_busy_receiver(1);
        assert!(report.delivered.is_empty());
        assert_eq!(report.timed_out, vec![0]);
    }

    #[test]
    fn concurrent_observations_share_one_local_id() {
        let f = Arc::new(fixture());
        let handles: Vec<_> = [4403u16, 4404]
            .into_iter()
            .map(|port| {
                let f = Arc::clone(&f);
                std::thread::spawn(move || block_on(f.dispatcher.handle_transmission(event(port, packet(5, 42, 1)))).unwrap().local_id)
            })
            .collect();
        let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids[0], ids[1]);
        assert_eq!(f.dispatcher.tracked_count(), 1);
        assert_eq!(f.dispatcher.log().len(), 2);
    }
}
