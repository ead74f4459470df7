//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Pluggable path loss models (log-distance, Okumura-Hata, 3GPP macro)
//! - Link budget: RSSI from transmit power, antenna gain and path loss; SNR
//!   against the receiver noise floor
//! - Meshtastic modem presets and their sensitivity thresholds
//! - Effective range estimation used for setup diagnostics
//!
//! Units:
//! - Power: dBm, gains and losses in dB
//! - Frequency: Hz
//! - Distance: meters
//!
//! All models are deterministic. Fading, shadowing and interference are not
//! modeled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{ChannelError, PathLossError};

/// Distances below this are evaluated as this (log of zero is undefined).
pub const MIN_DISTANCE: f32 = 1.0;

/// Physical-layer attenuation estimate.
///
/// The channel simulator only depends on this signature, so any propagation
/// formula can be substituted.
pub trait PathLossModel: Send + Sync {
    /// Path loss in dB between two points `distance` meters apart at `frequency` Hz.
    fn estimate_path_loss(&self, distance: f32, frequency: f32) -> Result<f32, PathLossError>;
}

impl<F> PathLossModel for F
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    fn estimate_path_loss(&self, distance: f32, frequency: f32) -> Result<f32, PathLossError> {
        let distance = checked_distance(distance, frequency)?;
        Ok(self(distance, frequency))
    }
}

/// Reject domain-invalid input and clamp very short distances.
fn checked_distance(distance: f32, frequency: f32) -> Result<f32, PathLossError> {
    if !distance.is_finite() || !frequency.is_finite() {
        return Err(PathLossError::NonFiniteInput);
    }
    if distance < 0.0 {
        return Err(PathLossError::NegativeDistance(distance));
    }
    Ok(distance.max(MIN_DISTANCE))
}

/// `log10(f) - 6`, i.e. log10 of the frequency expressed in MHz.
fn log10_mhz(frequency: f32) -> f32 {
    frequency.log10() - 6.0
}

/// Log-distance path loss.
///
/// ```text
/// PL(d) = PL(d₀) + 10 × γ × log₁₀(d/d₀)
/// ```
///
/// Frequency dependence is folded into the measured `PL(d₀)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogDistance {
    /// Path loss at the reference distance in dB.
    pub reference_loss: f32,
    /// Reference distance d₀ in meters.
    pub reference_distance: f32,
    /// Path loss exponent γ.
    pub exponent: f32,
}

impl Default for LogDistance {
    fn default() -> Self {
        Self {
            reference_loss: 127.41,
            reference_distance: 40.0,
            exponent: 2.08,
        }
    }
}

impl PathLossModel for LogDistance {
    fn estimate_path_loss(&self, distance: f32, frequency: f32) -> Result<f32, PathLossError> {
        let distance = checked_distance(distance, frequency)?;
        Ok(self.reference_loss + 10.0 * self.exponent * (distance / self.reference_distance).log10())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HataEnvironment {
    SmallCity,
    Metropolitan,
    Suburban,
    Rural,
}

/// Okumura-Hata empirical model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OkumuraHata {
    pub environment: HataEnvironment,
    /// Base station antenna height in meters.
    pub base_height: f32,
    /// Mobile antenna height in meters.
    pub mobile_height: f32,
}

impl OkumuraHata {
    /// Mobile antenna height correction a(h_m).
    fn mobile_correction(&self, frequency: f32) -> f32 {
        let lf = log10_mhz(frequency);
        let hm = self.mobile_height;
        match self.environment {
            HataEnvironment::Metropolitan if frequency <= 200_000_000.0 => 8.29 * (1.54 * hm).log10().powi(2) - 1.1,
            HataEnvironment::Metropolitan => 3.2 * (11.75 * hm).log10().powi(2) - 4.97,
            _ => (1.1 * lf - 0.7) * hm - (1.56 * lf - 0.8),
        }
    }

    /// Environment correction C.
    fn environment_correction(&self, frequency: f32) -> f32 {
        let lf = log10_mhz(frequency);
        match self.environment {
            HataEnvironment::SmallCity | HataEnvironment::Metropolitan => 0.0,
            HataEnvironment::Suburban => -2.0 * (lf - 28.0_f32.log10()).powi(2) - 5.4,
            HataEnvironment::Rural => -4.78 * lf.powi(2) + 18.33 * lf - 40.98,
        }
    }
}

impl PathLossModel for OkumuraHata {
    fn estimate_path_loss(&self, distance: f32, frequency: f32) -> Result<f32, PathLossError> {
        let distance = checked_distance(distance, frequency)?;
        let lf = log10_mhz(frequency);
        let hb = self.base_height.log10();
        let a = 69.55 + 26.16 * lf - 13.82 * hb - self.mobile_correction(frequency);
        let b = 44.9 - 6.55 * hb;
        // distance term is in km
        Ok(a + b * (distance.log10() - 3.0) + self.environment_correction(frequency))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroEnvironment {
    SuburbanMacro,
    UrbanMacro,
}

/// 3GPP macro-cell model (TR 36.942 style).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreeGpp {
    pub environment: MacroEnvironment,
    pub base_height: f32,
    pub mobile_height: f32,
}

impl Default for ThreeGpp {
    fn default() -> Self {
        Self {
            environment: MacroEnvironment::SuburbanMacro,
            base_height: 1.0,
            mobile_height: 1.0,
        }
    }
}

impl PathLossModel for ThreeGpp {
    fn estimate_path_loss(&self, distance: f32, frequency: f32) -> Result<f32, PathLossError> {
        let distance = checked_distance(distance, frequency)?;
        let lf = log10_mhz(frequency);
        let hm = self.mobile_height;
        let c = match self.environment {
            MacroEnvironment::SuburbanMacro => 0.0,
            MacroEnvironment::UrbanMacro => 3.0,
        };
        Ok((44.9 - 6.55 * self.base_height.log10()) * (distance.log10() - 3.0) + 45.5 + (35.46 - 1.1 * hm) * lf - 13.82 * hm.log10()
            + 0.7 * hm
            + c)
    }
}

/// Path loss model selection as written in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PathLossParameters {
    LogDistance(LogDistance),
    OkumuraHata(OkumuraHata),
    ThreeGpp(ThreeGpp),
}

impl Default for PathLossParameters {
    fn default() -> Self {
        PathLossParameters::ThreeGpp(ThreeGpp::default())
    }
}

impl PathLossParameters {
    pub fn build(&self) -> Box<dyn PathLossModel> {
        match self {
            PathLossParameters::LogDistance(model) => Box::new(*model),
            PathLossParameters::OkumuraHata(model) => Box::new(*model),
            PathLossParameters::ThreeGpp(model) => Box::new(*model),
        }
    }

    /// Reject parameter values for which the formulas are undefined.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PathLossParameters::LogDistance(m) => {
                if m.reference_distance <= 0.0 {
                    return Err("Invalid reference_distance, must be positive".to_string());
                }
                if m.exponent <= 0.0 {
                    return Err("Invalid exponent, must be positive".to_string());
                }
            }
            PathLossParameters::OkumuraHata(OkumuraHata { base_height, mobile_height, .. })
            | PathLossParameters::ThreeGpp(ThreeGpp { base_height, mobile_height, .. }) => {
                if *base_height <= 0.0 || *mobile_height <= 0.0 {
                    return Err("Antenna heights must be positive".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Meshtastic LoRa modem presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemPreset {
    ShortFast,
    ShortSlow,
    MediumFast,
    MediumSlow,
    LongFast,
    LongModerate,
    LongSlow,
    VeryLongSlow,
}

impl ModemPreset {
    pub const ALL: [ModemPreset; 8] = [
        ModemPreset::ShortFast,
        ModemPreset::ShortSlow,
        ModemPreset::MediumFast,
        ModemPreset::MediumSlow,
        ModemPreset::LongFast,
        ModemPreset::LongModerate,
        ModemPreset::LongSlow,
        ModemPreset::VeryLongSlow,
    ];

    /// Receiver sensitivity in dBm for this preset.
    pub fn default_sensitivity(self) -> f32 {
        match self {
            ModemPreset::ShortFast => -121.5,
            ModemPreset::ShortSlow => -124.0,
            ModemPreset::MediumFast => -126.75,
            ModemPreset::MediumSlow => -129.0,
            ModemPreset::LongFast => -131.75,
            ModemPreset::LongModerate => -134.5,
            ModemPreset::LongSlow => -137.25,
            ModemPreset::VeryLongSlow => -140.0,
        }
    }
}

fn default_frequency() -> f32 {
    915_000_000.0
}

fn default_tx_power() -> f32 {
    30.0
}

// -174 dBm/Hz thermal noise + 10·log10(250 kHz) + 6 dB receiver noise figure
fn default_noise_floor() -> f32 {
    -114.0
}

fn default_modem() -> ModemPreset {
    ModemPreset::LongFast
}

fn default_sensitivity_thresholds() -> HashMap<ModemPreset, f32> {
    ModemPreset::ALL.iter().map(|m| (*m, m.default_sensitivity())).collect()
}

/// Channel parameters shared by every node. Immutable once the simulation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioParameters {
    /// Carrier frequency in Hz.
    #[serde(default = "default_frequency")]
    pub frequency: f32,
    /// Transmit power in dBm.
    #[serde(default = "default_tx_power")]
    pub tx_power: f32,
    /// Combined antenna gain in dB.
    #[serde(default)]
    pub antenna_gain: f32,
    /// Receiver noise floor in dBm.
    #[serde(default = "default_noise_floor")]
    pub noise_floor: f32,
    #[serde(default = "default_modem")]
    pub modem: ModemPreset,
    /// Minimum decodable RSSI per modem preset, in dBm.
    #[serde(default = "default_sensitivity_thresholds")]
    pub sensitivity_thresholds: HashMap<ModemPreset, f32>,
}

impl Default for RadioParameters {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            tx_power: default_tx_power(),
            antenna_gain: 0.0,
            noise_floor: default_noise_floor(),
            modem: default_modem(),
            sensitivity_thresholds: default_sensitivity_thresholds(),
        }
    }
}

impl RadioParameters {
    /// Sensitivity threshold of the selected modem preset.
    pub fn sensitivity_threshold(&self) -> Result<f32, ChannelError> {
        self.sensitivity_thresholds
            .get(&self.modem)
            .copied()
            .ok_or(ChannelError::MissingSensitivity(self.modem))
    }
}

/// RSSI (dBm) = P_tx + G - PL
pub fn calculate_rssi(tx_power: f32, antenna_gain: f32, path_loss: f32) -> f32 {
    tx_power + antenna_gain - path_loss
}

/// SNR (dB) = RSSI - noise floor
pub fn calculate_snr(rssi: f32, noise_floor: f32) -> f32 {
    rssi - noise_floor
}

/// Estimate the largest distance at which a receiver still meets the
/// sensitivity threshold, searching up to `max_distance` meters.
///
/// Assumes path loss grows with distance. Returns 0 when even the minimum
/// distance is out of reach.
pub fn calculate_effective_distance(model: &dyn PathLossModel, radio: &RadioParameters, max_distance: f32) -> Result<f32, ChannelError> {
    let threshold = radio.sensitivity_threshold()?;
    let reaches = |d: f32| -> Result<bool, ChannelError> {
        let loss = model.estimate_path_loss(d, radio.frequency)?;
        Ok(calculate_rssi(radio.tx_power, radio.antenna_gain, loss) >= threshold)
    };

    if !reaches(MIN_DISTANCE)? {
        return Ok(0.0);
    }
    if reaches(max_distance)? {
        return Ok(max_distance);
    }

    let (mut lo, mut hi) = (MIN_DISTANCE, max_distance);
    while hi - lo > 1.0 {
        let mid = (lo + hi) / 2.0;
        if reaches(mid)? {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}
