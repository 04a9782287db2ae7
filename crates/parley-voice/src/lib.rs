//! The speech-to-speech pipeline of the parley gateway.
//!
//! A [`Session`] turns one client's microphone stream into spoken replies:
//!
//! ```text
//! audio -> FrameAssembler -> VadGate -> StreamingTranscriber
//!       -> (final transcript) -> Agent token stream
//!       -> PhraseSegmenter -> SynthesisDispatcher -> audio
//! ```
//!
//! The speech-to-text, text-to-speech and agent models sit behind the
//! [`SpeechToText`], [`TextToSpeech`] and [`Agent`] traits. Process and HTTP
//! backed implementations are provided ([`WhisperCli`], [`PiperTts`],
//! [`HttpAgent`]); [`Limited`] bounds how many calls all sessions together
//! may have in flight against one of them.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod limit;
mod response;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod traits;
pub mod transcriber;
pub mod tts;
pub mod vad;

pub use agent::HttpAgent;
pub use config::{
    AudioConfig, DispatcherConfig, PipelineConfig, SegmenterConfig, SessionConfig,
    TranscriberConfig, VadConfig,
};
pub use dispatcher::{Delivery, SynthesisDispatcher};
pub use error::VoiceError;
pub use framing::FrameAssembler;
pub use limit::Limited;
pub use segmenter::PhraseSegmenter;
pub use session::Session;
pub use stt::WhisperCli;
pub use traits::{Agent, Collaborators, SpeechToText, TextToSpeech, TokenStream};
pub use transcriber::StreamingTranscriber;
pub use tts::PiperTts;
pub use vad::{VadDecision, VadGate};
