//! Wire protocol between a client and the gateway.
//!
//! Control frames are JSON objects tagged by `type`. Audio travels as binary
//! frames in both directions and is represented by the `Audio` variants of
//! [`InboundFrame`] and [`OutboundFrame`].

use serde::{Deserialize, Serialize};

/// Control messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the conversation. The language hint is forwarded to logging only.
    SessionStart {
        #[serde(default)]
        language: Option<String>,
    },
    /// Finalizes the utterance currently being spoken.
    AudioEnd,
    /// Barge-in: cancels the reply in progress.
    Interrupt,
}

/// Machine-readable error codes carried by [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A control frame could not be parsed.
    BadMessage,
    /// A transcript arrived while a reply was still being spoken.
    Busy,
    /// The utterance could not be transcribed; the user should repeat it.
    TranscriptionFailed,
    /// The agent stream failed mid-reply.
    AgentFailed,
    /// The reply exceeded the per-turn time limit.
    TurnTimeout,
    /// The session was idle for too long and is closing.
    IdleTimeout,
    Internal,
}

/// Control messages sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AsrPartial { text: String },
    AsrFinal { text: String },
    /// Display-only reply text; synthesis order is defined by the audio frames.
    LlmToken { token: String },
    ResponseEnd,
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// A frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Control(ClientMessage),
    /// Little-endian 16-bit mono PCM of arbitrary length.
    Audio(Vec<u8>),
}

/// A frame to be written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Audio(Vec<u8>),
}

impl From<ServerMessage> for OutboundFrame {
    fn from(message: ServerMessage) -> Self {
        Self::Message(message)
    }
}
