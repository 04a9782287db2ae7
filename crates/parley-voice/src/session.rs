//! The conversation session state machine.
//!
//! One [`Session`] serves one client connection. It is the only owner of the
//! session state and runs as a single task: inbound frames, transcript
//! events, response-task reports and deadlines are multiplexed in one loop,
//! so every transition happens in one place and in one order. Model calls
//! never run on this task; the transcriber and the response task spawn
//! them.
//!
//! Results that arrive after the work they belong to was cancelled are
//! recognised by their turn id and dropped.

use crate::config::PipelineConfig;
use crate::error::VoiceError;
use crate::framing::FrameAssembler;
use crate::response::{ResponseEvent, ResponseTask};
use crate::traits::Collaborators;
use crate::transcriber::StreamingTranscriber;
use crate::vad::VadGate;
use parley_types::{
    ClientMessage, ConversationTurn, ErrorCode, InboundFrame, OutboundFrame, ServerMessage,
    SessionState, TranscriptEvent, TurnStatus,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the channel carrying response-task reports.
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Deadline used when no timeout applies to the current state.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400);

/// The turn currently in `responding`.
#[derive(Debug)]
struct ActiveTurn {
    turn_id: u64,
    user_text: String,
    /// Phrases delivered so far, in order.
    spoken: String,
    cancel: CancellationToken,
    deadline: Instant,
}

pub struct Session {
    id: Uuid,
    config: PipelineConfig,
    collaborators: Collaborators,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    transcriber: StreamingTranscriber,
    assembler: FrameAssembler,
    history: Vec<ConversationTurn>,
    active: Option<ActiveTurn>,
    next_turn_id: u64,
    outbound: mpsc::Sender<OutboundFrame>,
    responses_tx: mpsc::Sender<ResponseEvent>,
    responses_rx: mpsc::Receiver<ResponseEvent>,
    idle_deadline: Instant,
}

impl Session {
    /// Creates a session in `idle`. Outbound frames are written to
    /// `outbound` without waiting; a full channel drops the frame.
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<Self, VoiceError> {
        config.validate()?;
        let vad = VadGate::from_config(&config.vad)?;
        let transcriber = StreamingTranscriber::new(
            config.transcriber.clone(),
            vad,
            collaborators.stt.clone(),
        );
        let assembler = FrameAssembler::new(&config.audio);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let idle_deadline = Instant::now() + config.session.max_idle();

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            collaborators,
            state: SessionState::Idle,
            state_tx,
            transcriber,
            assembler,
            history: Vec::new(),
            active: None,
            next_turn_id: 1,
            outbound,
            responses_tx,
            responses_rx,
            idle_deadline,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Observes state transitions while the session runs.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Completed, cancelled and failed turns, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Runs the session until the inbound channel closes or a terminal
    /// error occurs. Returns the turn history.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundFrame>) -> Vec<ConversationTurn> {
        tracing::info!(session_id = %self.id, "session opened");

        while !self.state.is_closed() {
            let deadline = self.next_deadline();
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.on_inbound(frame),
                    None => {
                        tracing::debug!(session_id = %self.id, "inbound stream ended");
                        self.close();
                    }
                },
                event = self.transcriber.next_event() => self.on_transcript(event),
                Some(event) = self.responses_rx.recv() => self.on_response(event),
                _ = tokio::time::sleep_until(deadline) => self.on_deadline(),
            }
        }

        tracing::info!(
            session_id = %self.id,
            turns = self.history.len(),
            "session closed"
        );
        self.history
    }

    fn next_deadline(&self) -> Instant {
        match (self.state, &self.active) {
            (SessionState::Responding, Some(active)) => active.deadline,
            (SessionState::Idle | SessionState::Listening, _) => self.idle_deadline,
            _ => Instant::now() + FAR_FUTURE,
        }
    }

    fn on_inbound(&mut self, frame: InboundFrame) {
        self.idle_deadline = Instant::now() + self.config.session.max_idle();
        match frame {
            InboundFrame::Control(ClientMessage::SessionStart { language }) => {
                if self.state == SessionState::Idle {
                    tracing::info!(
                        session_id = %self.id,
                        language = language.as_deref().unwrap_or("auto"),
                        "session started"
                    );
                    self.transition(SessionState::Listening);
                } else {
                    tracing::warn!(
                        session_id = %self.id,
                        state = %self.state,
                        "session_start on a started session, resetting transcriber"
                    );
                    self.transcriber.reset();
                    self.assembler.clear();
                }
            }
            InboundFrame::Control(ClientMessage::AudioEnd) => {
                if self.state == SessionState::Idle {
                    tracing::warn!(session_id = %self.id, "audio_end before session_start, ignoring");
                    return;
                }
                let utterance_id = self.transcriber.finalize();
                tracing::debug!(session_id = %self.id, utterance_id, "utterance finalized by client");
            }
            InboundFrame::Control(ClientMessage::Interrupt) => self.interrupt(),
            InboundFrame::Audio(bytes) => {
                if self.state == SessionState::Idle {
                    tracing::trace!(session_id = %self.id, "audio before session_start, ignoring");
                    return;
                }
                for frame in self.assembler.push(&bytes) {
                    self.transcriber.ingest(&frame);
                }
            }
        }
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        if !event.is_final() {
            self.send(ServerMessage::AsrPartial { text: event.text });
            return;
        }

        let utterance_id = event.utterance_id;
        self.send(ServerMessage::AsrFinal {
            text: event.text.clone(),
        });

        if event.failed {
            self.fail(
                ErrorCode::TranscriptionFailed,
                "could not transcribe the last utterance, please repeat",
                true,
            );
            return;
        }
        if event.text.trim().is_empty() {
            tracing::debug!(session_id = %self.id, utterance_id, "empty final transcript, no turn");
            return;
        }
        if self.state == SessionState::Responding {
            tracing::warn!(
                session_id = %self.id,
                utterance_id,
                "final transcript while responding, rejecting"
            );
            self.send(ServerMessage::error(
                ErrorCode::Busy,
                "a reply is in progress; interrupt it before speaking",
            ));
            return;
        }
        if self.state != SessionState::Listening {
            return;
        }

        self.transition(SessionState::Transcribing);
        self.start_turn(event.text);
    }

    fn start_turn(&mut self, user_text: String) {
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        let cancel = CancellationToken::new();

        let task = ResponseTask::new(
            turn_id,
            user_text.clone(),
            self.history.clone(),
            self.collaborators.agent.clone(),
            self.collaborators.tts.clone(),
            &self.config,
            self.responses_tx.clone(),
            cancel.clone(),
        );
        tokio::spawn(task.run());

        tracing::info!(session_id = %self.id, turn_id, "turn opened");
        self.active = Some(ActiveTurn {
            turn_id,
            user_text,
            spoken: String::new(),
            cancel,
            deadline: Instant::now() + self.config.session.max_turn(),
        });
        self.transition(SessionState::Responding);
    }

    fn on_response(&mut self, event: ResponseEvent) {
        match event {
            ResponseEvent::Token { turn_id, token } => {
                if self.is_active(turn_id) {
                    self.send(ServerMessage::LlmToken { token: token.text });
                }
            }
            ResponseEvent::Spoken {
                turn_id,
                phrase,
                chunk,
            } => {
                let Some(active) = self.active.as_mut().filter(|a| a.turn_id == turn_id) else {
                    tracing::trace!(turn_id, "dropping phrase of finished turn");
                    return;
                };
                active.spoken.push_str(phrase.text());
                if let Some(chunk) = chunk {
                    self.send_frame(OutboundFrame::Audio(chunk.pcm));
                }
            }
            ResponseEvent::Finished { turn_id, outcome } => {
                if !self.is_active(turn_id) {
                    return;
                }
                match outcome {
                    Ok(()) => {
                        self.finish_turn(TurnStatus::Completed);
                        self.send(ServerMessage::ResponseEnd);
                        self.transition(SessionState::Listening);
                    }
                    Err(e) => {
                        tracing::error!(session_id = %self.id, turn_id, "agent failed: {}", e);
                        self.finish_turn(TurnStatus::Failed);
                        self.transition(SessionState::Error);
                        self.send(ServerMessage::error(
                            ErrorCode::AgentFailed,
                            "the reply could not be completed",
                        ));
                        self.send(ServerMessage::ResponseEnd);
                        self.transition(SessionState::Listening);
                    }
                }
            }
        }
    }

    /// Barge-in. Cancels the active turn, keeping the text spoken so far,
    /// and discards the utterance in progress. Without an active turn this
    /// is a no-op, so repeated interrupts act once.
    fn interrupt(&mut self) {
        if self.active.is_none() {
            tracing::warn!(
                session_id = %self.id,
                state = %self.state,
                "interrupt with no active turn, ignoring"
            );
            return;
        }
        self.finish_turn(TurnStatus::Cancelled);
        self.transcriber.reset();
        self.assembler.clear();
        self.send(ServerMessage::ResponseEnd);
        self.transition(SessionState::Listening);
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();
        if let Some(active) = &self.active {
            if self.state == SessionState::Responding && now >= active.deadline {
                tracing::error!(
                    session_id = %self.id,
                    turn_id = active.turn_id,
                    "turn exceeded its time limit"
                );
                self.finish_turn(TurnStatus::Failed);
                self.transition(SessionState::Error);
                self.send(ServerMessage::error(
                    ErrorCode::TurnTimeout,
                    "the reply took too long and was stopped",
                ));
                self.send(ServerMessage::ResponseEnd);
                self.transition(SessionState::Listening);
                return;
            }
        }

        if matches!(self.state, SessionState::Idle | SessionState::Listening)
            && now >= self.idle_deadline
        {
            tracing::info!(session_id = %self.id, "session idle, closing");
            self.fail(ErrorCode::IdleTimeout, "session closed after inactivity", false);
        }
    }

    /// Enters `error`, notifies the client, then recovers to `listening` or
    /// closes. A failure while a turn is responding leaves the turn alone.
    fn fail(&mut self, code: ErrorCode, message: &str, recoverable: bool) {
        if recoverable && self.state == SessionState::Responding {
            self.send(ServerMessage::error(code, message));
            return;
        }
        self.transition(SessionState::Error);
        self.send(ServerMessage::error(code, message));
        if recoverable {
            self.transition(SessionState::Listening);
        } else {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.active.is_some() {
            self.finish_turn(TurnStatus::Cancelled);
        }
        self.transcriber.reset();
        self.assembler.clear();
        self.transition(SessionState::Closed);
    }

    /// Ends the active turn and appends it to the history.
    fn finish_turn(&mut self, status: TurnStatus) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        tracing::info!(
            session_id = %self.id,
            turn_id = active.turn_id,
            status = ?status,
            spoken_chars = active.spoken.chars().count(),
            "turn finished"
        );
        self.history.push(ConversationTurn {
            turn_id: active.turn_id,
            user_text: active.user_text,
            agent_text: active.spoken,
            status,
        });
    }

    fn is_active(&self, turn_id: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.turn_id == turn_id)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "state transition");
        self.state = next;
        self.state_tx.send_replace(next);
        // Idle time is measured from the moment the session starts listening.
        if next == SessionState::Listening {
            self.idle_deadline = Instant::now() + self.config.session.max_idle();
        }
    }

    fn send(&self, message: ServerMessage) {
        self.send_frame(OutboundFrame::Message(message));
    }

    fn send_frame(&self, frame: OutboundFrame) {
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session_id = %self.id, "outbound channel full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %self.id, "outbound channel closed");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("turns", &self.history.len())
            .finish_non_exhaustive()
    }
}
