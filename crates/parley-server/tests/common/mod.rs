#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream;
use parley_server::{app, AppState};
use parley_types::audio::encode_pcm16_le;
use parley_types::ConversationTurn;
use parley_voice::{
    Agent, Collaborators, PipelineConfig, SpeechToText, TextToSpeech, TokenStream, VoiceError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct FixedStt(pub &'static str);

#[async_trait]
impl SpeechToText for FixedStt {
    async fn transcribe_partial(&self, _samples: &[f32]) -> Result<String, VoiceError> {
        Ok(String::new())
    }

    async fn transcribe_final(&self, _samples: &[f32]) -> Result<String, VoiceError> {
        Ok(self.0.to_string())
    }
}

/// Returns the phrase text as its audio.
pub struct EchoTts;

#[async_trait]
impl TextToSpeech for EchoTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        Ok(text.as_bytes().to_vec())
    }
}

pub struct FixedAgent(pub Vec<&'static str>);

#[async_trait]
impl Agent for FixedAgent {
    async fn stream(
        &self,
        _user_text: &str,
        _history: &[ConversationTurn],
    ) -> Result<TokenStream, VoiceError> {
        let tokens: Vec<Result<String, VoiceError>> =
            self.0.iter().map(|t| Ok(t.to_string())).collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

pub fn test_state(reply: Vec<&'static str>) -> AppState {
    let collaborators = Collaborators::new(
        Arc::new(FixedStt("what time is it")),
        Arc::new(EchoTts),
        Arc::new(FixedAgent(reply)),
    );
    AppState::new(PipelineConfig::default(), collaborators)
}

/// Starts the router on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// `frames` 20 ms frames of a voiced 220 Hz tone at 16 kHz, as s16le.
pub fn speech_pcm(frames: usize) -> Vec<u8> {
    let samples: Vec<f32> = (0..frames * 320)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16_000.0).sin())
        .collect();
    encode_pcm16_le(&samples)
}
