//! Mesh radio relay simulator.
//!
//! Simulates a multi-node LoRa mesh by relaying every over-the-air
//! transmission to the nodes that would hear it, with RSSI and SNR derived
//! from a pluggable path loss model.

pub mod common;
pub mod simulation;

mod time_driver;
