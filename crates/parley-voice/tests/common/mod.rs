#![allow(dead_code)]

use async_trait::async_trait;
use parley_types::audio::encode_pcm16_le;
use parley_types::{
    AudioFrame, ClientMessage, ConversationTurn, InboundFrame, OutboundFrame, ServerMessage,
    SessionState,
};
use parley_voice::{
    Agent, Collaborators, PipelineConfig, Session, SpeechToText, TextToSpeech, TokenStream,
    VoiceError,
};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const SAMPLE_RATE: u32 = 16_000;
pub const FRAME_SAMPLES: usize = 320;

/// A 20 ms voiced tone.
pub fn speech_frame() -> AudioFrame {
    let samples: Vec<f32> = (0..FRAME_SAMPLES)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
        })
        .collect();
    AudioFrame::new(samples, SAMPLE_RATE)
}

pub fn silence_frame() -> AudioFrame {
    AudioFrame::new(vec![0.0f32; FRAME_SAMPLES], SAMPLE_RATE)
}

pub fn speech_bytes(frames: usize) -> Vec<u8> {
    let frame = speech_frame();
    let mut out = Vec::with_capacity(frames * FRAME_SAMPLES * 2);
    for _ in 0..frames {
        out.extend_from_slice(&encode_pcm16_le(frame.samples()));
    }
    out
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.transcriber.partial_interval_ms = 100;
    config.segmenter.min_phrase_chars = 40;
    config.dispatcher.max_in_flight = 2;
    config
}

/// Speech-to-text that ignores the audio and answers from a script.
pub struct ScriptedStt {
    partial_text: String,
    default_final: String,
    finals: Mutex<VecDeque<Result<String, VoiceError>>>,
    final_delay: Duration,
    pub partial_calls: AtomicUsize,
    pub final_calls: AtomicUsize,
}

impl ScriptedStt {
    pub fn new(default_final: &str) -> Self {
        Self {
            partial_text: "partial".to_string(),
            default_final: default_final.to_string(),
            finals: Mutex::new(VecDeque::new()),
            final_delay: Duration::ZERO,
            partial_calls: AtomicUsize::new(0),
            final_calls: AtomicUsize::new(0),
        }
    }

    /// Results returned by the next final calls, before falling back to the
    /// default text.
    pub fn with_finals(self, finals: Vec<Result<String, VoiceError>>) -> Self {
        *self.finals.lock().unwrap() = finals.into();
        self
    }

    pub fn with_final_delay(mut self, delay: Duration) -> Self {
        self.final_delay = delay;
        self
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn transcribe_partial(&self, samples: &[f32]) -> Result<String, VoiceError> {
        self.partial_calls.fetch_add(1, Ordering::SeqCst);
        assert!(!samples.is_empty(), "partial over an empty buffer");
        Ok(self.partial_text.clone())
    }

    async fn transcribe_final(&self, _samples: &[f32]) -> Result<String, VoiceError> {
        self.final_calls.fetch_add(1, Ordering::SeqCst);
        if !self.final_delay.is_zero() {
            tokio::time::sleep(self.final_delay).await;
        }
        let scripted = self.finals.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_final.clone()))
    }
}

/// Text-to-speech that returns the phrase text as its "PCM" after a random
/// delay, so delivery order can be checked against phrase order.
pub struct EchoTts {
    max_delay_ms: u64,
    fail_containing: Option<String>,
    block_containing: Option<String>,
    started_tx: mpsc::UnboundedSender<String>,
    pub started: Mutex<Vec<String>>,
}

impl EchoTts {
    pub fn new(max_delay_ms: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let tts = Self {
            max_delay_ms,
            fail_containing: None,
            block_containing: None,
            started_tx,
            started: Mutex::new(Vec::new()),
        };
        (tts, started_rx)
    }

    /// Synthesis of phrases containing `needle` fails.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_containing = Some(needle.to_string());
        self
    }

    /// Synthesis of phrases containing `needle` never completes.
    pub fn blocking_on(mut self, needle: &str) -> Self {
        self.block_containing = Some(needle.to_string());
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for EchoTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        self.started.lock().unwrap().push(text.to_string());
        let _ = self.started_tx.send(text.to_string());

        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(needle) = &self.block_containing {
            if text.contains(needle.as_str()) {
                std::future::pending::<()>().await;
            }
        }
        if let Some(needle) = &self.fail_containing {
            if text.contains(needle.as_str()) {
                return Err(VoiceError::Tts(format!("cannot say {:?}", text)));
            }
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// How a scripted reply ends after its tokens.
pub enum Ending {
    Complete,
    Fail(VoiceError),
    Hang,
}

pub struct Reply {
    pub tokens: Vec<String>,
    pub ending: Ending,
    pub token_delay: Duration,
}

impl Reply {
    pub fn complete(tokens: &[&str]) -> Self {
        Self::new(tokens, Ending::Complete)
    }

    pub fn failing(tokens: &[&str], error: VoiceError) -> Self {
        Self::new(tokens, Ending::Fail(error))
    }

    pub fn hanging(tokens: &[&str]) -> Self {
        Self::new(tokens, Ending::Hang)
    }

    fn new(tokens: &[&str], ending: Ending) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            ending,
            token_delay: Duration::ZERO,
        }
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

/// Agent that plays back scripted replies, one per turn, and records what
/// it was asked.
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<(String, Vec<ConversationTurn>)>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, Vec<ConversationTurn>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn stream(
        &self,
        user_text: &str,
        history: &[ConversationTurn],
    ) -> Result<TokenStream, VoiceError> {
        self.requests
            .lock()
            .unwrap()
            .push((user_text.to_string(), history.to_vec()));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::complete(&["Okay."]));

        let stream = async_stream::stream! {
            for token in reply.tokens {
                if !reply.token_delay.is_zero() {
                    tokio::time::sleep(reply.token_delay).await;
                }
                yield Ok(token);
            }
            match reply.ending {
                Ending::Complete => {}
                Ending::Fail(e) => yield Err(e),
                Ending::Hang => std::future::pending::<()>().await,
            }
        };
        Ok(Box::pin(stream))
    }
}

/// A running session with its channels.
pub struct Harness {
    pub inbound: mpsc::Sender<InboundFrame>,
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub state: watch::Receiver<SessionState>,
    pub handle: JoinHandle<Vec<ConversationTurn>>,
}

impl Harness {
    pub fn start(
        config: PipelineConfig,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        agent: Arc<dyn Agent>,
    ) -> Self {
        let (outbound_tx, outbound) = mpsc::channel(1024);
        let (inbound, inbound_rx) = mpsc::channel(1024);
        let session = Session::new(config, Collaborators::new(stt, tts, agent), outbound_tx)
            .expect("valid test config");
        let state = session.subscribe_state();
        let handle = tokio::spawn(session.run(inbound_rx));
        Self {
            inbound,
            outbound,
            state,
            handle,
        }
    }

    pub async fn control(&self, message: ClientMessage) {
        self.inbound
            .send(InboundFrame::Control(message))
            .await
            .expect("session is running");
    }

    pub async fn audio(&self, bytes: Vec<u8>) {
        self.inbound
            .send(InboundFrame::Audio(bytes))
            .await
            .expect("session is running");
    }

    /// Starts the session and speaks one utterance ended by `audio_end`.
    pub async fn start_and_speak(&self) {
        self.control(ClientMessage::SessionStart { language: None })
            .await;
        self.speak().await;
    }

    pub async fn speak(&self) {
        self.audio(speech_bytes(10)).await;
        self.control(ClientMessage::AudioEnd).await;
    }

    pub async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("outbound channel closed")
    }

    /// Collects outbound frames, skipping partial transcripts, up to and
    /// including the first one matching `done`.
    pub async fn collect_until(
        &mut self,
        done: impl Fn(&OutboundFrame) -> bool,
    ) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next_frame().await;
            if matches!(
                frame,
                OutboundFrame::Message(ServerMessage::AsrPartial { .. })
            ) {
                continue;
            }
            let finished = done(&frame);
            frames.push(frame);
            if finished {
                return frames;
            }
        }
    }

    /// Asserts that no frame other than partial transcripts arrives within
    /// `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.recv()).await {
                Err(_) => return,
                Ok(None) => return,
                Ok(Some(OutboundFrame::Message(ServerMessage::AsrPartial { .. }))) => {}
                Ok(Some(frame)) => panic!("unexpected frame {:?}", frame),
            }
        }
    }

    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Closes the inbound side and returns the session history.
    pub async fn finish(self) -> Vec<ConversationTurn> {
        drop(self.inbound);
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("session did not stop")
            .expect("session task panicked")
    }
}

pub fn is_message(frame: &OutboundFrame, predicate: impl Fn(&ServerMessage) -> bool) -> bool {
    matches!(frame, OutboundFrame::Message(m) if predicate(m))
}

pub fn is_response_end(frame: &OutboundFrame) -> bool {
    is_message(frame, |m| matches!(m, ServerMessage::ResponseEnd))
}

pub fn audio_payloads(frames: &[OutboundFrame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Audio(pcm) => Some(String::from_utf8_lossy(pcm).into_owned()),
            _ => None,
        })
        .collect()
}

pub fn messages(frames: &[OutboundFrame]) -> Vec<ServerMessage> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Message(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}
