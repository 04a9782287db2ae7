//! Tuning knobs for the per-connection pipeline.
//!
//! Every section deserializes with defaults so a config file only needs to
//! name the values it changes.

use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_sample_rate() -> u32 {
    16_000
}

fn default_frame_ms() -> u32 {
    20
}

fn default_aggressiveness() -> u8 {
    2
}

fn default_partial_interval_ms() -> u64 {
    400
}

fn default_max_utterance_ms() -> u64 {
    30_000
}

fn default_min_phrase_chars() -> usize {
    40
}

fn default_max_in_flight() -> usize {
    2
}

fn default_max_turn_ms() -> u64 {
    60_000
}

fn default_max_idle_ms() -> u64 {
    300_000
}

fn default_outbound_capacity() -> usize {
    256
}

/// Format of inbound audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Duration of one VAD frame in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
}

impl AudioConfig {
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// 0 (permissive) to 3 (most aggressive at rejecting non-speech).
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: u8,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: default_aggressiveness(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Minimum speech time between two partial transcriptions.
    #[serde(default = "default_partial_interval_ms")]
    pub partial_interval_ms: u64,
    /// Trailing silence that ends an utterance. When unset, only an explicit
    /// `audio_end` finalizes.
    #[serde(default)]
    pub silence_timeout_ms: Option<u64>,
    /// Hard cap on buffered speech; reaching it forces finalization.
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,
}

impl TranscriberConfig {
    pub fn partial_interval(&self) -> Duration {
        Duration::from_millis(self.partial_interval_ms)
    }

    pub fn silence_timeout(&self) -> Option<Duration> {
        self.silence_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.max_utterance_ms)
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            partial_interval_ms: default_partial_interval_ms(),
            silence_timeout_ms: None,
            max_utterance_ms: default_max_utterance_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Buffer length (in characters) at which a phrase is cut at the last
    /// word boundary even without sentence punctuation.
    #[serde(default = "default_min_phrase_chars")]
    pub min_phrase_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_phrase_chars: default_min_phrase_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of phrases synthesized concurrently within one turn.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on the time spent in `responding` for one turn.
    #[serde(default = "default_max_turn_ms")]
    pub max_turn_ms: u64,
    /// Inactivity in `listening` after which the session is torn down.
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
    /// Capacity of the outbound frame channel.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl SessionConfig {
    pub fn max_turn(&self) -> Duration {
        Duration::from_millis(self.max_turn_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turn_ms: default_max_turn_ms(),
            max_idle_ms: default_max_idle_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Complete tuning for one conversation session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl PipelineConfig {
    /// Rejects values that would stall or break the pipeline.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.audio.sample_rate == 0 || self.audio.samples_per_frame() == 0 {
            return Err(VoiceError::Config(
                "audio.sample_rate and audio.frame_ms must produce a non-empty frame".to_string(),
            ));
        }
        if self.vad.aggressiveness > 3 {
            return Err(VoiceError::Config(format!(
                "vad.aggressiveness must be between 0 and 3, got {}",
                self.vad.aggressiveness
            )));
        }
        if self.transcriber.partial_interval_ms == 0 {
            return Err(VoiceError::Config(
                "transcriber.partial_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.transcriber.max_utterance_ms == 0 {
            return Err(VoiceError::Config(
                "transcriber.max_utterance_ms must be greater than zero".to_string(),
            ));
        }
        if self.segmenter.min_phrase_chars == 0 {
            return Err(VoiceError::Config(
                "segmenter.min_phrase_chars must be greater than zero".to_string(),
            ));
        }
        if self.dispatcher.max_in_flight == 0 {
            return Err(VoiceError::Config(
                "dispatcher.max_in_flight must be greater than zero".to_string(),
            ));
        }
        if self.session.outbound_capacity == 0 {
            return Err(VoiceError::Config(
                "session.outbound_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
