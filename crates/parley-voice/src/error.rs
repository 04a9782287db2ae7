use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("input exceeds maximum size: {size} bytes (limit: {limit} bytes)")]
    InputTooLarge { size: usize, limit: usize },
}

impl VoiceError {
    /// Transient errors may succeed on an immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}
