//! Error types raised by the relay engine.
//!
//! Setup-time errors (`RegistryError::DuplicateId`, channel configuration
//! problems) abort the simulation start. Per-event errors (`DispatchError`)
//! only drop the offending transmission.

use std::fmt;

use super::signal_calculations::ModemPreset;
use super::types::{DATA_PAYLOAD_LEN, MAX_NODE_ID, TransportId};

/// Failures of the node registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateId(u32),
    /// Node id too large to derive a hardware id from.
    IdOutOfRange(u32),
    DuplicateTransport(TransportId),
    UnknownTransport(TransportId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateId(id) => write!(f, "Node id {} is already registered", id),
            RegistryError::IdOutOfRange(id) => write!(f, "Node id {} exceeds maximum of {}", id, MAX_NODE_ID),
            RegistryError::DuplicateTransport(transport) => write!(f, "Transport {} is already bound to a node", transport),
            RegistryError::UnknownTransport(transport) => write!(f, "No node is bound to transport {}", transport),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Domain errors of a path loss estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathLossError {
    NegativeDistance(f32),
    NonFiniteInput,
}

impl fmt::Display for PathLossError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathLossError::NegativeDistance(d) => write!(f, "Distance must be non-negative, got {} m", d),
            PathLossError::NonFiniteInput => write!(f, "Distance and frequency must be finite"),
        }
    }
}

impl std::error::Error for PathLossError {}

/// Failures while computing the receiver set.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    MissingSensitivity(ModemPreset),
    PathLoss(PathLossError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::MissingSensitivity(modem) => write!(f, "No sensitivity threshold configured for modem {:?}", modem),
            ChannelError::PathLoss(err) => write!(f, "Path loss estimate failed: {}", err),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::PathLoss(err) => Some(err),
            ChannelError::MissingSensitivity(_) => None,
        }
    }
}

impl From<PathLossError> for ChannelError {
    fn from(err: PathLossError) -> Self {
        ChannelError::PathLoss(err)
    }
}

/// Reasons a transmission event was dropped without any delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    PayloadTooLarge { size: usize },
    UnknownTransmitter(TransportId),
    Channel(ChannelError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::PayloadTooLarge { size } => {
                write!(f, "Data payload too big: {} bytes (maximum {})", size, DATA_PAYLOAD_LEN)
            }
            DispatchError::UnknownTransmitter(transport) => write!(f, "Transmission from unregistered transport {}", transport),
            DispatchError::Channel(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChannelError> for DispatchError {
    fn from(err: ChannelError) -> Self {
        DispatchError::Channel(err)
    }
}

/// Per-receiver delivery failure. Never aborts the transmission as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    Timeout { node_id: u32, attempts: u32 },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Timeout { node_id, attempts } => {
                write!(f, "Delivery to node {} timed out after {} attempt(s)", node_id, attempts)
            }
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Problems building the simulation from a scene. Fatal at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupError {
    Registry(RegistryError),
    Channel(ChannelError),
    Placement(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Registry(err) => write!(f, "Node registration failed: {}", err),
            SetupError::Channel(err) => write!(f, "Channel configuration invalid: {}", err),
            SetupError::Placement(msg) => write!(f, "Node placement failed: {}", msg),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Registry(err) => Some(err),
            SetupError::Channel(err) => Some(err),
            SetupError::Placement(_) => None,
        }
    }
}

impl From<RegistryError> for SetupError {
    fn from(err: RegistryError) -> Self {
        SetupError::Registry(err)
    }
}

impl From<ChannelError> for SetupError {
    fn from(err: ChannelError) -> Self {
        SetupError::Channel(err)
    }
}
