//! Streaming transcription of one speaker.
//!
//! The transcriber owns the utterance buffer. Frames are classified by the
//! [`VadGate`]; speech frames are appended to the buffer and, at most once
//! per `partial_interval` of speech, a partial transcription is started on a
//! spawned task. Finalizing hands the buffer to another spawned task and
//! clears it, so [`StreamingTranscriber::ingest`] and
//! [`StreamingTranscriber::finalize`] never wait on the model.
//!
//! Results come back through [`StreamingTranscriber::next_event`], which
//! drops anything that no longer applies: partials of an utterance that has
//! already been finalized, and every result started before a
//! [`StreamingTranscriber::reset`]. This keeps events of one utterance in
//! production order, partials first and exactly one final last. Finals are
//! released in utterance order even when a later one finishes first.

use crate::config::TranscriberConfig;
use crate::error::VoiceError;
use crate::traits::SpeechToText;
use crate::vad::{VadDecision, VadGate};
use parley_types::{AudioFrame, TranscriptEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the channel carrying results back from transcription tasks.
const COMPLETION_CHANNEL_CAPACITY: usize = 32;

/// Result of a spawned transcription task.
#[derive(Debug)]
enum Completion {
    Partial {
        epoch: u64,
        utterance_id: u64,
        result: Result<String, VoiceError>,
    },
    Final {
        epoch: u64,
        event: TranscriptEvent,
    },
}

pub struct StreamingTranscriber {
    config: TranscriberConfig,
    vad: VadGate,
    stt: Arc<dyn SpeechToText>,
    buffer: Vec<f32>,
    sample_rate: u32,
    is_speaking: bool,
    /// Id of the utterance being accumulated, or of the next one.
    utterance_id: u64,
    /// Bumped by `reset`; results from older epochs are discarded.
    epoch: u64,
    buffered: Duration,
    since_partial: Duration,
    trailing_silence: Duration,
    partial_in_flight: Option<u64>,
    /// Utterance whose final is released next.
    next_final: u64,
    /// Finals that completed ahead of an earlier utterance's final.
    held_finals: BTreeMap<u64, TranscriptEvent>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
}

impl StreamingTranscriber {
    pub fn new(config: TranscriberConfig, vad: VadGate, stt: Arc<dyn SpeechToText>) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            config,
            vad,
            stt,
            buffer: Vec::new(),
            sample_rate: 0,
            is_speaking: false,
            utterance_id: 1,
            epoch: 0,
            buffered: Duration::ZERO,
            since_partial: Duration::ZERO,
            trailing_silence: Duration::ZERO,
            partial_in_flight: None,
            next_final: 1,
            held_finals: BTreeMap::new(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Duration of speech currently buffered.
    pub fn buffered(&self) -> Duration {
        self.buffered
    }

    /// Feeds one frame. Must be called from within a tokio runtime.
    ///
    /// Returns the gate decision for the frame. May finalize the utterance
    /// when the silence timeout or the hard length cap is reached.
    pub fn ingest(&mut self, frame: &AudioFrame) -> VadDecision {
        let decision = self.vad.classify(frame);
        match decision {
            VadDecision::Speech => self.on_speech(frame),
            VadDecision::Silence => self.on_silence(frame),
        }
        decision
    }

    fn on_speech(&mut self, frame: &AudioFrame) {
        if !self.is_speaking {
            self.is_speaking = true;
            self.since_partial = Duration::ZERO;
            tracing::debug!(utterance_id = self.utterance_id, "utterance started");
        }
        self.sample_rate = frame.sample_rate();
        self.buffer.extend_from_slice(frame.samples());
        self.buffered += frame.duration();
        self.since_partial += frame.duration();
        self.trailing_silence = Duration::ZERO;

        if self.buffered >= self.config.max_utterance() {
            tracing::warn!(
                utterance_id = self.utterance_id,
                buffered_ms = self.buffered.as_millis() as u64,
                "utterance reached length cap, forcing finalization"
            );
            self.finalize();
            return;
        }

        if self.since_partial >= self.config.partial_interval() && self.partial_in_flight.is_none()
        {
            self.since_partial = Duration::ZERO;
            self.spawn_partial();
        }
    }

    fn on_silence(&mut self, frame: &AudioFrame) {
        if !self.is_speaking {
            return;
        }
        self.trailing_silence += frame.duration();
        if let Some(timeout) = self.config.silence_timeout() {
            if self.trailing_silence >= timeout {
                tracing::debug!(
                    utterance_id = self.utterance_id,
                    silence_ms = self.trailing_silence.as_millis() as u64,
                    "end of speech detected"
                );
                self.finalize();
            }
        }
    }

    fn spawn_partial(&mut self) {
        let utterance_id = self.utterance_id;
        let epoch = self.epoch;
        let samples = self.buffer.clone();
        let stt = self.stt.clone();
        let tx = self.completions_tx.clone();
        self.partial_in_flight = Some(utterance_id);

        tokio::spawn(async move {
            let result = stt.transcribe_partial(&samples).await;
            let _ = tx
                .send(Completion::Partial {
                    epoch,
                    utterance_id,
                    result,
                })
                .await;
        });
    }

    /// Ends the current utterance and starts its final transcription.
    ///
    /// Always produces exactly one final event, with empty text when nothing
    /// was buffered. Returns the id of the finalized utterance.
    pub fn finalize(&mut self) -> u64 {
        let utterance_id = self.utterance_id;
        let epoch = self.epoch;
        let samples = std::mem::take(&mut self.buffer);
        self.clear_utterance();
        self.utterance_id += 1;

        let stt = self.stt.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let event = if samples.is_empty() {
                TranscriptEvent::final_text(utterance_id, "")
            } else {
                transcribe_final(stt.as_ref(), &samples, utterance_id).await
            };
            let _ = tx.send(Completion::Final { epoch, event }).await;
        });

        utterance_id
    }

    /// Discards the current utterance and every pending result. Emits nothing.
    pub fn reset(&mut self) {
        if self.is_speaking || !self.buffer.is_empty() {
            tracing::debug!(utterance_id = self.utterance_id, "utterance discarded");
        }
        self.buffer = Vec::new();
        self.clear_utterance();
        self.utterance_id += 1;
        self.epoch += 1;
        self.held_finals.clear();
        self.next_final = self.utterance_id;
    }

    fn clear_utterance(&mut self) {
        self.is_speaking = false;
        self.buffered = Duration::ZERO;
        self.since_partial = Duration::ZERO;
        self.trailing_silence = Duration::ZERO;
        self.partial_in_flight = None;
    }

    /// Waits for the next transcript event that still applies.
    ///
    /// Cancel-safe: dropping the future loses no admitted event.
    pub async fn next_event(&mut self) -> TranscriptEvent {
        if let Some(event) = self.release_final() {
            return event;
        }
        loop {
            // The transcriber holds a sender, so the channel never closes.
            let Some(completion) = self.completions_rx.recv().await else {
                return std::future::pending().await;
            };
            if let Some(event) = self.admit(completion) {
                return event;
            }
        }
    }

    /// Returns an already available event without waiting.
    pub fn try_next_event(&mut self) -> Option<TranscriptEvent> {
        if let Some(event) = self.release_final() {
            return Some(event);
        }
        while let Ok(completion) = self.completions_rx.try_recv() {
            if let Some(event) = self.admit(completion) {
                return Some(event);
            }
        }
        None
    }

    fn admit(&mut self, completion: Completion) -> Option<TranscriptEvent> {
        match completion {
            Completion::Partial {
                epoch,
                utterance_id,
                result,
            } => {
                if self.partial_in_flight == Some(utterance_id) && epoch == self.epoch {
                    self.partial_in_flight = None;
                }
                if epoch != self.epoch || utterance_id != self.utterance_id || !self.is_speaking {
                    tracing::trace!(utterance_id, "dropping stale partial transcript");
                    return None;
                }
                match result {
                    Ok(text) if text.trim().is_empty() => None,
                    Ok(text) => Some(TranscriptEvent::partial(utterance_id, text)),
                    Err(e) => {
                        tracing::warn!(utterance_id, "partial transcription failed: {}", e);
                        None
                    }
                }
            }
            Completion::Final { epoch, event } => {
                if epoch != self.epoch {
                    tracing::debug!(
                        utterance_id = event.utterance_id,
                        "dropping final transcript from before reset"
                    );
                    return None;
                }
                if event.utterance_id != self.next_final {
                    tracing::debug!(
                        utterance_id = event.utterance_id,
                        waiting_for = self.next_final,
                        "holding final transcript until earlier utterances finish"
                    );
                }
                self.held_finals.insert(event.utterance_id, event);
                self.release_final()
            }
        }
    }

    fn release_final(&mut self) -> Option<TranscriptEvent> {
        let event = self.held_finals.remove(&self.next_final)?;
        self.next_final += 1;
        Some(event)
    }
}

/// Final transcription with a single retry on transient failure.
async fn transcribe_final(
    stt: &dyn SpeechToText,
    samples: &[f32],
    utterance_id: u64,
) -> TranscriptEvent {
    let mut result = stt.transcribe_final(samples).await;
    if let Err(e) = &result {
        if e.is_transient() {
            tracing::warn!(utterance_id, "final transcription failed, retrying once: {}", e);
            result = stt.transcribe_final(samples).await;
        }
    }
    match result {
        Ok(text) => TranscriptEvent::final_text(utterance_id, text.trim()),
        Err(e) => {
            tracing::error!(utterance_id, "final transcription failed: {}", e);
            TranscriptEvent::final_failed(utterance_id)
        }
    }
}
