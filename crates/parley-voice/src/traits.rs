//! Interfaces of the external model collaborators.
//!
//! The pipeline only knows these traits. Each implementation is a black box
//! with a latency and failure contract: calls may take arbitrarily long and
//! may fail, and the pipeline awaits them from spawned tasks so that audio
//! ingestion never waits on a model.

use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use parley_types::ConversationTurn;
use std::sync::Arc;

/// Stream of reply fragments produced by the agent for one turn.
pub type TokenStream = BoxStream<'static, Result<String, VoiceError>>;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Fast, lower-quality transcription of an utterance in progress.
    async fn transcribe_partial(&self, samples: &[f32]) -> Result<String, VoiceError>;

    /// Authoritative transcription of a completed utterance.
    async fn transcribe_final(&self, samples: &[f32]) -> Result<String, VoiceError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Returns raw PCM (s16le) for `text`.
    ///
    /// Dropping the returned future must abandon the synthesis.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Opens the reply stream for `user_text` given the completed history.
    async fn stream(
        &self,
        user_text: &str,
        history: &[ConversationTurn],
    ) -> Result<TokenStream, VoiceError>;
}

/// The set of collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub agent: Arc<dyn Agent>,
}

impl Collaborators {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        agent: Arc<dyn Agent>,
    ) -> Self {
        Self { stt, tts, agent }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
