//! Server configuration loading from file and environment variables.

use parley_voice::{
    AudioConfig, DispatcherConfig, PipelineConfig, SegmenterConfig, SessionConfig,
    TranscriberConfig, VadConfig,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Model collaborators.
    #[serde(default)]
    pub models: ModelsConfig,

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

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Speech-to-text, text-to-speech and agent endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// whisper.cpp-compatible CLI binary.
    #[serde(default = "default_whisper_binary")]
    pub whisper_binary: String,

    /// Model used for partial transcripts.
    #[serde(default = "default_whisper_partial_model")]
    pub whisper_partial_model: String,

    /// Model used for final transcripts.
    #[serde(default = "default_whisper_final_model")]
    pub whisper_final_model: String,

    /// Forced transcription language; auto-detected when unset.
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,

    /// Piper voice model (`.onnx`).
    #[serde(default = "default_piper_model")]
    pub piper_model: String,

    /// URL the agent reply stream is requested from.
    #[serde(default = "default_agent_url")]
    pub agent_url: String,

    /// Concurrent transcriptions across all sessions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_stt: usize,

    /// Concurrent syntheses across all sessions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tts: usize,

    #[serde(default = "default_stt_timeout_secs")]
    pub stt_timeout_secs: u64,

    #[serde(default = "default_tts_timeout_secs")]
    pub tts_timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_whisper_binary() -> String {
    "whisper-cli".to_string()
}

fn default_whisper_partial_model() -> String {
    "models/ggml-tiny.en.bin".to_string()
}

fn default_whisper_final_model() -> String {
    "models/ggml-base.en.bin".to_string()
}

fn default_piper_binary() -> String {
    "piper".to_string()
}

fn default_piper_model() -> String {
    "voices/en_US-lessac-medium.onnx".to_string()
}

fn default_agent_url() -> String {
    "http://127.0.0.1:8080/reply".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_stt_timeout_secs() -> u64 {
    30
}

fn default_tts_timeout_secs() -> u64 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            whisper_binary: default_whisper_binary(),
            whisper_partial_model: default_whisper_partial_model(),
            whisper_final_model: default_whisper_final_model(),
            language: None,
            piper_binary: default_piper_binary(),
            piper_model: default_piper_model(),
            agent_url: default_agent_url(),
            max_concurrent_stt: default_max_concurrent(),
            max_concurrent_tts: default_max_concurrent(),
            stt_timeout_secs: default_stt_timeout_secs(),
            tts_timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl ModelsConfig {
    pub fn stt_timeout(&self) -> Duration {
        Duration::from_secs(self.stt_timeout_secs)
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }
}

impl Config {
    /// The per-session pipeline tuning.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            audio: self.audio.clone(),
            vad: self.vad.clone(),
            transcriber: self.transcriber.clone(),
            segmenter: self.segmenter.clone(),
            dispatcher: self.dispatcher.clone(),
            session: self.session.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.models.max_concurrent_stt == 0 || self.models.max_concurrent_tts == 0 {
            return Err(ConfigError::Invalid(
                "models.max_concurrent_stt and models.max_concurrent_tts must be greater than zero"
                    .to_string(),
            ));
        }
        if self.models.stt_timeout_secs == 0 || self.models.tts_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "model timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_AGENT_URL` overrides `models.agent_url`
/// - `PARLEY_WHISPER_BINARY` overrides `models.whisper_binary`
/// - `PARLEY_PIPER_BINARY` overrides `models.piper_binary`
/// - `PARLEY_PIPER_MODEL` overrides `models.piper_model`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting values are invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("PARLEY_AGENT_URL") {
        config.models.agent_url = url;
    }
    if let Some(binary) = var("PARLEY_WHISPER_BINARY") {
        config.models.whisper_binary = binary;
    }
    if let Some(binary) = var("PARLEY_PIPER_BINARY") {
        config.models.piper_binary = binary;
    }
    if let Some(model) = var("PARLEY_PIPER_MODEL") {
        config.models.piper_model = model;
    }
}
