//! Audio containers passed between the transport and the pipeline.

use std::sync::Arc;
use std::time::Duration;

/// A fixed-duration slice of mono PCM audio, normalised to `[-1.0, 1.0]`.
///
/// Frames are immutable once built; cloning shares the sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Builds a frame from little-endian signed 16-bit samples.
    ///
    /// A trailing odd byte is ignored.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Synthesized audio for one phrase of a turn.
///
/// Ownership passes to the outbound channel when the chunk is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub turn_id: u64,
    pub phrase_index: usize,
    /// Raw PCM as produced by the synthesizer (s16le).
    pub pcm: Vec<u8>,
}

/// Encodes normalised samples as little-endian signed 16-bit PCM.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
