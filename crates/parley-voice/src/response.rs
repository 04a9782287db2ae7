//! The response task of one turn.
//!
//! Spawned when a session enters `responding`. It owns the turn's phrase
//! segmenter and synthesis dispatcher, drives them against the agent's token
//! stream and reports back to the session over a channel. The session
//! cancels it through a [`CancellationToken`]; cancellation drops the
//! segmenter buffer and every in-flight synthesis with it.

use crate::config::PipelineConfig;
use crate::dispatcher::SynthesisDispatcher;
use crate::error::VoiceError;
use crate::segmenter::PhraseSegmenter;
use crate::traits::{Agent, TextToSpeech};
use futures_util::StreamExt;
use parley_types::{AudioChunk, ConversationTurn, Phrase, ReplyToken};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Report from a response task to its session.
#[derive(Debug)]
pub(crate) enum ResponseEvent {
    Token {
        turn_id: u64,
        token: ReplyToken,
    },
    /// A phrase reached its turn in the playback order. `chunk` is `None`
    /// when its synthesis failed.
    Spoken {
        turn_id: u64,
        phrase: Phrase,
        chunk: Option<AudioChunk>,
    },
    /// The agent stream and every dispatched phrase are done. Never sent
    /// for a cancelled turn.
    Finished {
        turn_id: u64,
        outcome: Result<(), VoiceError>,
    },
}

pub(crate) struct ResponseTask {
    turn_id: u64,
    user_text: String,
    history: Vec<ConversationTurn>,
    agent: Arc<dyn Agent>,
    segmenter: PhraseSegmenter,
    dispatcher: SynthesisDispatcher,
    events: mpsc::Sender<ResponseEvent>,
    cancel: CancellationToken,
}

impl ResponseTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        turn_id: u64,
        user_text: String,
        history: Vec<ConversationTurn>,
        agent: Arc<dyn Agent>,
        tts: Arc<dyn TextToSpeech>,
        config: &PipelineConfig,
        events: mpsc::Sender<ResponseEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            turn_id,
            user_text,
            history,
            agent,
            segmenter: PhraseSegmenter::new(&config.segmenter),
            dispatcher: SynthesisDispatcher::new(tts, turn_id, &config.dispatcher),
            events,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.cancel.clone();
        let turn_id = self.turn_id;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let dropped = self.dispatcher.abort();
                tracing::debug!(turn_id, dropped_phrases = dropped, "response cancelled");
            }
            outcome = self.drive() => {
                let _ = self
                    .events
                    .send(ResponseEvent::Finished { turn_id, outcome })
                    .await;
            }
        }
    }

    async fn drive(&mut self) -> Result<(), VoiceError> {
        let mut tokens = self.agent.stream(&self.user_text, &self.history).await?;
        let mut seq = 0u64;
        let mut stream_done = false;

        loop {
            tokio::select! {
                Some(delivery) = self.dispatcher.next_delivery(), if !self.dispatcher.is_idle() => {
                    let event = ResponseEvent::Spoken {
                        turn_id: self.turn_id,
                        phrase: delivery.phrase,
                        chunk: delivery.chunk,
                    };
                    emit(&self.events, event).await?;
                }
                item = tokens.next(), if !stream_done => match item {
                    Some(Ok(text)) => {
                        if let Some(phrase) = self.segmenter.add(&text) {
                            self.dispatcher.push(phrase);
                        }
                        let token = ReplyToken { seq, text };
                        seq += 1;
                        let event = ResponseEvent::Token {
                            turn_id: self.turn_id,
                            token,
                        };
                        emit(&self.events, event).await?;
                    }
                    Some(Err(e)) => {
                        let unfinished = self.segmenter.pending().len();
                        tracing::warn!(
                            turn_id = self.turn_id,
                            unfinished_bytes = unfinished,
                            "agent stream failed, playing back completed phrases"
                        );
                        self.drain().await?;
                        return Err(e);
                    }
                    None => {
                        if let Some(phrase) = self.segmenter.flush() {
                            self.dispatcher.push(phrase);
                        }
                        stream_done = true;
                    }
                },
                else => break,
            }
        }

        tracing::debug!(turn_id = self.turn_id, tokens = seq, "response complete");
        Ok(())
    }

    /// Delivers every phrase already handed to the dispatcher.
    async fn drain(&mut self) -> Result<(), VoiceError> {
        while let Some(delivery) = self.dispatcher.next_delivery().await {
            let event = ResponseEvent::Spoken {
                turn_id: self.turn_id,
                phrase: delivery.phrase,
                chunk: delivery.chunk,
            };
            emit(&self.events, event).await?;
        }
        Ok(())
    }
}

async fn emit(
    events: &mpsc::Sender<ResponseEvent>,
    event: ResponseEvent,
) -> Result<(), VoiceError> {
    events
        .send(event)
        .await
        .map_err(|_| VoiceError::Unavailable("session closed".to_string()))
}
