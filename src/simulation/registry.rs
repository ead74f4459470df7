//! Registry of simulated nodes.
//!
//! Nodes are registered once at setup and never removed or moved while the
//! simulation runs, so lookups need no locking. Iteration order is
//! registration order, which keeps receiver computation deterministic.

use std::collections::HashMap;

use super::error::RegistryError;
use super::types::{Node, Point, TransportHandle, TransportId, hw_id_for};

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    by_id: HashMap<u32, usize>,
    by_transport: HashMap<TransportId, usize>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node bound to `transport` and return the stored record.
    pub fn register(&mut self, node_id: u32, position: Point, transport: TransportHandle) -> Result<&Node, RegistryError> {
        if self.by_id.contains_key(&node_id) {
            return Err(RegistryError::DuplicateId(node_id));
        }
        let hw_id = hw_id_for(node_id).ok_or(RegistryError::IdOutOfRange(node_id))?;
        if self.by_transport.contains_key(&transport.id) {
            return Err(RegistryError::DuplicateTransport(transport.id));
        }

        let index = self.nodes.len();
        self.by_id.insert(node_id, index);
        self.by_transport.insert(transport.id, index);
        self.nodes.push(Node {
            node_id,
            hw_id,
            position,
            transport,
        });
        Ok(&self.nodes[index])
    }

    /// Resolve which node owns an inbound transport.
    pub fn find_by_transport(&self, transport: TransportId) -> Result<&Node, RegistryError> {
        self.by_transport
            .get(&transport)
            .map(|&index| &self.nodes[index])
            .ok_or(RegistryError::UnknownTransport(transport))
    }

    pub fn get(&self, node_id: u32) -> Option<&Node> {
        self.by_id.get(&node_id).map(|&index| &self.nodes[index])
    }

    /// Every registered node except `node_id`: the receiver candidates of a
    /// broadcast medium, regardless of the packet's destination.
    pub fn others(&self, node_id: u32) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_id != node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::simulation::types::{MAX_NODE_ID, NodeInputQueue};

    /// Transport handle backed by a leaked channel, as the simulation does.
    pub(crate) fn leaked_handle(port: u16) -> (TransportHandle, &'static NodeInputQueue) {
        let queue: &'static NodeInputQueue = Box::leak(Box::new(NodeInputQueue::new()));
        (
            TransportHandle {
                id: TransportId(port),
                sender: queue.sender(),
            },
            queue,
        )
    }

    #[test]
    fn register_and_resolve_by_transport() {
        let mut registry = NodeRegistry::new();
        registry.register(0, Point::new(0.0, 0.0), leaked_handle(4403).0).unwrap();
        registry.register(1, Point::new(10.0, 0.0), leaked_handle(4404).0).unwrap();

        let node = registry.find_by_transport(TransportId(4404)).unwrap();
        assert_eq!(node.node_id, 1);
        assert_eq!(node.hw_id, 17);
        assert_eq!(node.position, Point::new(10.0, 0.0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register(3, Point::new(0.0, 0.0), leaked_handle(1).0).unwrap();
        let err = registry.register(3, Point::new(5.0, 5.0), leaked_handle(2).0).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(3));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn id_without_hardware_id_is_rejected() {
        let mut registry = NodeRegistry::new();
        let err = registry.register(u32::MAX, Point::new(0.0, 0.0), leaked_handle(4403).0).unwrap_err();
        assert_eq!(err, RegistryError::IdOutOfRange(u32::MAX));
        assert!(registry.is_empty());

        registry.register(MAX_NODE_ID, Point::new(0.0, 0.0), leaked_handle(4403).0).unwrap();
        assert_eq!(registry.get(MAX_NODE_ID).unwrap().hw_id, u32::MAX);
    }

    #[test]
    fn duplicate_transport_is_rejected() {
        let mut registry = NodeRegistry::new();
        registry.register(0, Point::new(0.0, 0.0), leaked_handle(9).0).unwrap();
        let err = registry.register(1, Point::new(0.0, 0.0), leaked_handle(9).0).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTransport(TransportId(9)));
    }

    #[test]
    fn unknown_transport_is_an_error() {
        let registry = NodeRegistry::new();
        assert_eq!(
            registry.find_by_transport(TransportId(1234)).unwrap_err(),
            RegistryError::UnknownTransport(TransportId(1234))
        );
    }

    #[test]
    fn others_excludes_self_and_keeps_registration_order() {
        let mut registry = NodeRegistry::new();
        for id in [5, 2, 9] {
            registry.register(id, Point::new(id as f64, 0.0), leaked_handle(id as u16).0).unwrap();
        }
        let ids: Vec<u32> = registry.others(2).map(|n| n.node_id).collect();
        assert_eq!(ids, vec![5, 9]);
        assert_eq!(registry.others(42).count(), 3);
    }
}
