//! Re-framing of transport audio into fixed VAD frames.

use crate::config::AudioConfig;
use parley_types::AudioFrame;

/// Accumulates arbitrary-length s16le payloads and cuts them into frames of
/// `audio.frame_ms` milliseconds. Leftover bytes, including a split sample,
/// are carried into the next payload.
#[derive(Debug)]
pub struct FrameAssembler {
    sample_rate: u32,
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(config: &AudioConfig) -> Self {
        let frame_bytes = config.samples_per_frame() * 2;
        Self {
            sample_rate: config.sample_rate,
            frame_bytes,
            pending: Vec::with_capacity(frame_bytes),
        }
    }

    /// Appends `bytes` and returns every complete frame now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        if self.frame_bytes == 0 {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() / self.frame_bytes;
        if complete == 0 {
            return Vec::new();
        }

        let used = complete * self.frame_bytes;
        let frames = self.pending[..used]
            .chunks_exact(self.frame_bytes)
            .map(|chunk| AudioFrame::from_pcm16_le(chunk, self.sample_rate))
            .collect();
        self.pending.drain(..used);
        frames
    }

    /// Bytes waiting for the next complete frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> FrameAssembler {
        FrameAssembler::new(&AudioConfig {
            sample_rate: 16000,
            frame_ms: 20,
        })
    }

    #[test]
    fn cuts_exact_frames() {
        let mut asm = assembler();
        let frames = asm.push(&vec![0u8; 640 * 3]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 320));
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn carries_remainder_across_payloads() {
        let mut asm = assembler();
        assert!(asm.push(&vec![0u8; 641]).len() == 1);
        assert_eq!(asm.pending(), 1);

        // The odd byte pairs with the first byte of the next payload.
        let mut next = vec![0u8; 639];
        next[0] = 0x7f;
        let frames = asm.push(&next);
        assert_eq!(frames.len(), 1);
        assert_eq!(asm.pending(), 0);
        assert!(frames[0].samples()[0] > 0.9);
    }

    #[test]
    fn short_payloads_accumulate() {
        let mut asm = assembler();
        for _ in 0..9 {
            assert!(asm.push(&[0u8; 64]).is_empty());
        }
        assert_eq!(asm.push(&[0u8; 64]).len(), 1);
    }

    #[test]
    fn clear_drops_pending_bytes() {
        let mut asm = assembler();
        asm.push(&[0u8; 100]);
        asm.clear();
        assert_eq!(asm.pending(), 0);
        assert_eq!(asm.push(&[0u8; 600]).len(), 0);
    }
}
