//! Parley server library logic.

pub mod api_ws;
pub mod config;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use parley_voice::{
    Collaborators, HttpAgent, Limited, PiperTts, PipelineConfig, VoiceError, WhisperCli,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Tuning applied to every new session.
    pub pipeline: PipelineConfig,
    /// Model collaborators shared by all sessions.
    pub collaborators: Collaborators,
    /// Sessions with an open connection.
    pub sessions: api_ws::SessionRegistry,
}

impl AppState {
    pub fn new(pipeline: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            pipeline,
            collaborators,
            sessions: api_ws::SessionRegistry::new(),
        }
    }
}

/// Builds the process and HTTP backed collaborators described by `config`.
///
/// Speech-to-text and text-to-speech are wrapped in [`Limited`] so that all
/// sessions together stay within the configured concurrency.
pub fn build_collaborators(config: &Config) -> Result<Collaborators, VoiceError> {
    let models = &config.models;

    let mut whisper = WhisperCli::new(
        &models.whisper_binary,
        &models.whisper_partial_model,
        &models.whisper_final_model,
    )
    .with_sample_rate(config.audio.sample_rate)
    .with_timeout(models.stt_timeout());
    if let Some(language) = &models.language {
        whisper = whisper.with_language(language);
    }
    let piper = PiperTts::new(&models.piper_binary, &models.piper_model)
        .with_timeout(models.tts_timeout());
    let agent = HttpAgent::new(&models.agent_url)?;

    Ok(Collaborators::new(
        Arc::new(Limited::new(whisper, models.max_concurrent_stt, "speech-to-text")?),
        Arc::new(Limited::new(piper, models.max_concurrent_tts, "text-to-speech")?),
        Arc::new(agent),
    ))
}

/// Health check handler.
///
/// Returns `200 OK` with server status, version, the number of open
/// sessions and how many of them are speaking a reply.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len().await,
        "responding": state.sessions.responding().await,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
