//! Channel simulator: decides which candidates physically hear a transmission.
//!
//! For every candidate, in the order given:
//! 1) distance between transmitter and candidate
//! 2) path loss from the configured model
//! 3) RSSI = P_tx + G - PL, SNR = RSSI - noise floor
//! 4) keep the candidate iff RSSI >= sensitivity threshold of the modem
//!
//! Candidate generation is the caller's concern (normally
//! `NodeRegistry::others`); this module only filters. No randomness is
//! involved, so identical inputs always give identical outputs.

use super::error::ChannelError;
use super::geometry::distance;
use super::signal_calculations::{PathLossModel, RadioParameters, calculate_effective_distance, calculate_rssi, calculate_snr};
use super::types::Node;

/// A candidate that qualified as a receiver, with its radio metrics.
#[derive(Debug, Clone)]
pub struct Reception<'a> {
    pub receiver: &'a Node,
    pub rssi: f32,
    pub snr: f32,
}

pub struct ChannelSimulator {
    radio: RadioParameters,
    model: Box<dyn PathLossModel>,
    sensitivity_threshold: f32,
}

impl ChannelSimulator {
    /// Fails if the selected modem has no sensitivity threshold.
    pub fn new(radio: RadioParameters, model: Box<dyn PathLossModel>) -> Result<Self, ChannelError> {
        let sensitivity_threshold = radio.sensitivity_threshold()?;
        Ok(Self {
            radio,
            model,
            sensitivity_threshold,
        })
    }

    pub fn radio(&self) -> &RadioParameters {
        &self.radio
    }

    /// Compute the qualifying receivers among `candidates`.
    ///
    /// The transmitter must not be part of `candidates`.
    pub fn compute_receivers<'a, I>(&self, transmitter: &Node, candidates: I) -> Result<Vec<Reception<'a>>, ChannelError>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut receptions = Vec::new();
        for candidate in candidates {
            let dist = distance(&transmitter.position, &candidate.position);
            let path_loss = self.model.estimate_path_loss(dist as f32, self.radio.frequency)?;
            let rssi = calculate_rssi(self.radio.tx_power, self.radio.antenna_gain, path_loss);
            if rssi >= self.sensitivity_threshold {
                receptions.push(Reception {
                    receiver: candidate,
                    rssi,
                    snr: calculate_snr(rssi, self.radio.noise_floor),
                });
            }
        }
        Ok(receptions)
    }

    /// Approximate reach of a transmission, for diagnostics.
    pub fn effective_distance(&self, max_distance: f32) -> Result<f32, ChannelError> {
        calculate_effective_distance(self.model.as_ref(), &self.radio, max_distance)
    }
}
