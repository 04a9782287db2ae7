//! Voice activity gate.
//!
//! Classifies one frame at a time from its energy and zero-crossing rate.
//! The gate keeps no state between frames: the same frame and aggressiveness
//! always produce the same decision, which keeps every downstream timing
//! decision testable with synthetic audio.

use crate::config::VadConfig;
use crate::error::VoiceError;
use parley_types::AudioFrame;

/// Minimum RMS level (dBFS) for speech, indexed by aggressiveness.
const ENERGY_FLOOR_DBFS: [f32; 4] = [-55.0, -48.0, -42.0, -36.0];

/// Maximum zero-crossing rate for speech, indexed by aggressiveness.
/// Broadband hiss crosses zero on almost every sample; voiced speech does not.
const MAX_ZERO_CROSSING_RATE: [f32; 4] = [0.60, 0.55, 0.50, 0.45];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == Self::Speech
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadGate {
    aggressiveness: u8,
}

impl VadGate {
    pub fn new(aggressiveness: u8) -> Result<Self, VoiceError> {
        if aggressiveness > 3 {
            return Err(VoiceError::Config(format!(
                "vad aggressiveness must be between 0 and 3, got {}",
                aggressiveness
            )));
        }
        Ok(Self { aggressiveness })
    }

    pub fn from_config(config: &VadConfig) -> Result<Self, VoiceError> {
        Self::new(config.aggressiveness)
    }

    pub fn aggressiveness(&self) -> u8 {
        self.aggressiveness
    }

    /// Classifies a frame. Never fails: an empty frame is silence.
    pub fn classify(&self, frame: &AudioFrame) -> VadDecision {
        let samples = frame.samples();
        if samples.is_empty() {
            return VadDecision::Silence;
        }

        let level = self.aggressiveness as usize;
        if rms_dbfs(samples) < ENERGY_FLOOR_DBFS[level] {
            return VadDecision::Silence;
        }
        if zero_crossing_rate(samples) > MAX_ZERO_CROSSING_RATE[level] {
            return VadDecision::Silence;
        }
        VadDecision::Speech
    }
}

/// Root-mean-square level in dB relative to full scale.
fn rms_dbfs(samples: &[f32]) -> f32 {
    let mean_square =
        samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if mean_square <= f32::EPSILON {
        return f32::NEG_INFINITY;
    }
    10.0 * mean_square.log10()
}

/// Fraction of adjacent sample pairs that change sign.
fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
