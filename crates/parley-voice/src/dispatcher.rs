//! Ordered synthesis of reply phrases.
//!
//! Up to `max_in_flight` phrases are synthesized at once, but deliveries are
//! yielded strictly in phrase order: a later phrase that finishes first waits
//! for its predecessors.

use crate::config::DispatcherConfig;
use crate::traits::TextToSpeech;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesOrdered, StreamExt};
use parley_types::{AudioChunk, Phrase};
use std::collections::VecDeque;
use std::sync::Arc;

/// Outcome of one phrase.
///
/// `chunk` is `None` when synthesis failed; the phrase still counts as
/// spoken.
#[derive(Debug)]
pub struct Delivery {
    pub phrase: Phrase,
    pub chunk: Option<AudioChunk>,
}

pub struct SynthesisDispatcher {
    tts: Arc<dyn TextToSpeech>,
    turn_id: u64,
    max_in_flight: usize,
    queued: VecDeque<Phrase>,
    in_flight: FuturesOrdered<BoxFuture<'static, Delivery>>,
}

impl SynthesisDispatcher {
    pub fn new(tts: Arc<dyn TextToSpeech>, turn_id: u64, config: &DispatcherConfig) -> Self {
        Self {
            tts,
            turn_id,
            max_in_flight: config.max_in_flight.max(1),
            queued: VecDeque::new(),
            in_flight: FuturesOrdered::new(),
        }
    }

    /// Queues a phrase for synthesis after every phrase pushed before it.
    pub fn push(&mut self, phrase: Phrase) {
        self.queued.push_back(phrase);
        self.fill();
    }

    /// True when no phrase is queued or being synthesized.
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    /// Phrases accepted but not yet delivered.
    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    /// Waits for the next phrase in order. Returns `None` when idle.
    ///
    /// Cancel-safe: a delivery is only removed from the dispatcher when this
    /// future completes.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        let delivery = self.in_flight.next().await?;
        self.fill();
        Some(delivery)
    }

    /// Drops queued phrases and abandons in-flight synthesis.
    ///
    /// Returns the number of phrases that will never be delivered.
    pub fn abort(&mut self) -> usize {
        let dropped = self.pending();
        self.queued.clear();
        self.in_flight = FuturesOrdered::new();
        dropped
    }

    fn fill(&mut self) {
        while self.in_flight.len() < self.max_in_flight {
            let Some(phrase) = self.queued.pop_front() else {
                break;
            };
            self.in_flight
                .push_back(synthesize(self.tts.clone(), self.turn_id, phrase));
        }
    }
}

fn synthesize(
    tts: Arc<dyn TextToSpeech>,
    turn_id: u64,
    phrase: Phrase,
) -> BoxFuture<'static, Delivery> {
    Box::pin(async move {
        match tts.synthesize(phrase.text()).await {
            Ok(pcm) => {
                tracing::debug!(
                    turn_id,
                    phrase_index = phrase.index(),
                    bytes = pcm.len(),
                    "phrase synthesized"
                );
                let chunk = AudioChunk {
                    turn_id,
                    phrase_index: phrase.index(),
                    pcm,
                };
                Delivery {
                    phrase,
                    chunk: Some(chunk),
                }
            }
            Err(e) => {
                tracing::warn!(
                    turn_id,
                    phrase_index = phrase.index(),
                    "synthesis failed, skipping phrase audio: {}",
                    e
                );
                Delivery { phrase, chunk: None }
            }
        }
    })
}

impl std::fmt::Debug for SynthesisDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisDispatcher")
            .field("turn_id", &self.turn_id)
            .field("queued", &self.queued.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
