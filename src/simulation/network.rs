//! Central network task and simulation assembly.
//!
//! High-level flow:
//! 1) Build the node registry from the scene, one bounded input channel per
//!    node acting as its transport handle, plus one shared output channel.
//! 2) Run the network task, the node endpoints and the scenario driver
//!    concurrently on one executor.
//! 3) The network task handles "node transmitted" events one at a time until
//!    the shutdown signal is raised; the event in progress always completes.
//! 4) On shutdown, endpoints are stopped while late events are drained and
//!    discarded so no endpoint stays blocked on the shared channel.

use embassy_futures::join::join3;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use futures::future::join_all;

use crate::common::config::RuntimeConfig;
use crate::common::scene::{Scene, ScriptedTransmission};

use super::channel::ChannelSimulator;
use super::dispatcher::PacketDispatcher;
use super::error::SetupError;
use super::node_task::{NodeStats, node_task};
use super::registry::NodeRegistry;
use super::types::{
    BROADCAST_ADDR, DEFAULT_HOP_LIMIT, NodeInputMessage, NodeInputQueue, NodeInputQueueReceiver, NodesOutputQueue, NodesOutputQueueReceiver,
    ShutdownSignal, TransportHandle, TransportId,
};

/// Upper bound used when estimating the reach of a transmission for logs.
const MAX_RANGE_ESTIMATE: f32 = 100_000.0;

/// Counters kept by the network task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Events that were relayed (including repeated observations).
    pub handled: u64,
    /// Events dropped because of a dispatch error.
    pub rejected: u64,
    pub deliveries: u64,
    pub delivery_timeouts: u64,
    /// Events that arrived after shutdown and were discarded.
    pub discarded: u64,
}

/// Everything left after a simulation has shut down.
pub struct SimulationOutcome {
    pub dispatcher: PacketDispatcher,
    pub network: NetworkStats,
    pub nodes: Vec<NodeStats>,
}

/// Receiving side of one node endpoint.
struct NodeEndpoint {
    node_id: u32,
    hw_id: u32,
    transport: TransportId,
    in_rx: NodeInputQueueReceiver,
}

/// Build the dispatcher for `scene` and the endpoints bound to it.
fn initialize_nodes(scene: &Scene, config: &RuntimeConfig) -> Result<(PacketDispatcher, Vec<NodeEndpoint>), SetupError> {
    let placed = scene.placed_nodes().map_err(SetupError::Placement)?;

    let mut registry = NodeRegistry::new();
    let mut endpoints = Vec::with_capacity(placed.len());
    for node in placed {
        // INTENTIONAL LEAK: transport handles hold 'static channel endpoints.
        // They live for the whole simulation and are released on process exit.
        let node_input_channel: &'static NodeInputQueue = Box::leak(Box::new(NodeInputQueue::new()));
        let registered = registry.register(
            node.node_id,
            node.position,
            TransportHandle {
                id: node.transport,
                sender: node_input_channel.sender(),
            },
        )?;
        endpoints.push(NodeEndpoint {
            node_id: node.node_id,
            hw_id: registered.hw_id,
            transport: node.transport,
            in_rx: node_input_channel.receiver(),
        });
    }

    let channel = ChannelSimulator::new(scene.radio_parameters.clone(), scene.path_loss_model.build())?;
    match channel.effective_distance(MAX_RANGE_ESTIMATE) {
        Ok(range) => log::info!(
            "Registered {} nodes, modem {:?}, effective range ≈ {:.0} m",
            registry.len(),
            scene.radio_parameters.modem,
            range
        ),
        Err(err) => log::warn!("Could not estimate effective range: {}", err),
    }

    Ok((PacketDispatcher::new(registry, channel, config.delivery_policy()), endpoints))
}

/// Relay transmission events until `shutdown` is raised.
pub async fn network_task(dispatcher: &PacketDispatcher, events: NodesOutputQueueReceiver, shutdown: &ShutdownSignal) -> NetworkStats {
    let mut stats = NetworkStats::default();

    loop {
        // shutdown is polled first so a steady stream of events cannot starve it
        match select(shutdown.wait(), events.receive()).await {
            Either::First(()) => break,
            Either::Second(event) => match dispatcher.handle_transmission(event).await {
                Ok(report) => {
                    stats.handled += 1;
                    stats.deliveries += report.delivered.len() as u64;
                    stats.delivery_timeouts += report.timed_out.len() as u64;
                }
                Err(err) => {
                    stats.rejected += 1;
                    log::warn!("Transmission dropped: {}", err);
                }
            },
        }
    }

    log::info!("Shutting down {} node endpoint(s)", dispatcher.registry().len());
    let timeout = dispatcher.policy().timeout;
    for node in dispatcher.registry().iter() {
        loop {
            let stop = with_timeout(timeout, node.transport.sender.send(NodeInputMessage::Shutdown));
            match select(stop, events.receive()).await {
                Either::First(Ok(())) => break,
                Either::First(Err(_)) => {
                    log::warn!("Node {} did not accept shutdown within {} ms", node.node_id, timeout.as_millis());
                    break;
                }
                Either::Second(event) => {
                    stats.discarded += 1;
                    log::debug!("Discarding packet {} from {} after shutdown", event.packet.id, event.transport);
                }
            }
        }
    }

    stats
}

/// Feed scripted transmissions to their nodes, then raise `shutdown` once
/// `settle_time` has passed after the last one.
async fn scenario_task(registry: &NodeRegistry, script: &[ScriptedTransmission], settle_time: Duration, shutdown: &ShutdownSignal) {
    let start = Instant::now();
    let mut steps: Vec<&ScriptedTransmission> = script.iter().collect();
    steps.sort_by_key(|s| s.at_ms);

    for step in steps {
        Timer::at(start + Duration::from_millis(step.at_ms)).await;
        let Some(node) = registry.get(step.node_id) else {
            log::warn!("Scripted transmission for unknown node {} skipped", step.node_id);
            continue;
        };
        let to = match step.to {
            None => BROADCAST_ADDR,
            Some(to) => match registry.get(to) {
                Some(destination) => destination.hw_id,
                None => {
                    log::warn!("Scripted transmission to unknown node {} skipped", to);
                    continue;
                }
            },
        };
        node.transport
            .sender
            .send(NodeInputMessage::SendText {
                to,
                text: step.text.clone(),
                want_ack: step.want_ack,
                hop_limit: step.hop_limit.unwrap_or(DEFAULT_HOP_LIMIT),
            })
            .await;
    }

    Timer::after(settle_time).await;
    log::info!("Scenario finished after {} ms", start.elapsed().as_millis());
    shutdown.signal(());
}

/// Run `scene` to completion.
pub async fn run_simulation(scene: &Scene, config: &RuntimeConfig) -> Result<SimulationOutcome, SetupError> {
    let (dispatcher, endpoints) = initialize_nodes(scene, config)?;

    // INTENTIONAL LEAK: shared 'static event channel and shutdown signal, see above.
    let nodes_output_channel: &'static NodesOutputQueue = Box::leak(Box::new(NodesOutputQueue::new()));
    let shutdown: &'static ShutdownSignal = Box::leak(Box::new(ShutdownSignal::new()));

    let node_futures = endpoints.into_iter().map(|endpoint| {
        node_task(
            endpoint.node_id,
            endpoint.hw_id,
            endpoint.transport,
            endpoint.in_rx,
            nodes_output_channel.sender(),
        )
    });

    let (network, (), nodes) = join3(
        network_task(&dispatcher, nodes_output_channel.receiver(), shutdown),
        scenario_task(
            dispatcher.registry(),
            &scene.transmissions,
            Duration::from_millis(config.settle_time_ms),
            shutdown,
        ),
        join_all(node_futures),
    )
    .await;

    log::info!(
        "Simulation stopped: {} transmission event(s), {} distinct, {} deliveries, {} timeouts, {} rejected",
        network.handled,
        dispatcher.tracked_count(),
        network.deliveries,
        network.delivery_timeouts,
        network.rejected
    );

    Ok(SimulationOutcome {
        dispatcher,
        network,
        nodes,
    })
}
