//! Shared event and protocol types for the parley speech-to-speech gateway.
//!
//! Every component of the pipeline communicates through the types defined
//! here. No component reaches into another component's buffers: the VAD
//! gate consumes [`AudioFrame`]s, the transcriber produces
//! [`TranscriptEvent`]s, the phrase segmenter turns [`ReplyToken`]s into
//! [`Phrase`]s and the synthesis dispatcher turns phrases into
//! [`AudioChunk`]s. Finished turns are recorded as [`ConversationTurn`]s.
//!
//! The [`protocol`] module defines the JSON control frames exchanged with
//! the client over the persistent connection.

pub mod audio;
pub mod protocol;

pub use audio::{AudioChunk, AudioFrame};
pub use protocol::{ClientMessage, ErrorCode, InboundFrame, OutboundFrame, ServerMessage};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a transcript is advisory or authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    /// Low-latency, revisable result over the audio heard so far.
    Partial,
    /// Authoritative result for a completed utterance.
    Final,
}

/// A transcript produced by the streaming transcriber.
///
/// Only `Final` events are eligible for conversation history; partials may
/// be superseded at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    pub utterance_id: u64,
    /// Set on a final event whose transcription failed outright. The text is
    /// always empty in that case.
    #[serde(default)]
    pub failed: bool,
}

impl TranscriptEvent {
    pub fn partial(utterance_id: u64, text: impl Into<String>) -> Self {
        Self {
            kind: TranscriptKind::Partial,
            text: text.into(),
            utterance_id,
            failed: false,
        }
    }

    pub fn final_text(utterance_id: u64, text: impl Into<String>) -> Self {
        Self {
            kind: TranscriptKind::Final,
            text: text.into(),
            utterance_id,
            failed: false,
        }
    }

    /// A final event for an utterance whose transcription could not be
    /// produced.
    pub fn final_failed(utterance_id: u64) -> Self {
        Self {
            kind: TranscriptKind::Final,
            text: String::new(),
            utterance_id,
            failed: true,
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind == TranscriptKind::Final
    }
}

/// An incremental fragment of the agent's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyToken {
    /// Per-turn sequence number, starting at zero.
    pub seq: u64,
    pub text: String,
}

/// A complete, non-empty span of reply text sized for one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    index: usize,
    text: String,
}

impl Phrase {
    /// Creates a phrase, returning `None` when `text` has no visible content.
    pub fn new(index: usize, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self { index, text })
    }

    /// Position of this phrase within its turn.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Final status of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed,
}

/// One user-utterance / agent-reply pair, appended to the session history
/// when the turn finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: u64,
    pub user_text: String,
    /// Agent text that was spoken (or whose synthesis was skipped) before the
    /// turn ended.
    pub agent_text: String,
    pub status: TurnStatus,
}

/// State of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Transcribing,
    Responding,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Responding => "responding",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` for the terminal state.
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
