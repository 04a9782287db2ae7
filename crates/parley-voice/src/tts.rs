use crate::error::VoiceError;
use crate::traits::TextToSpeech;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Default timeout for one TTS process execution.
const DEFAULT_TTS_TIMEOUT: Duration = Duration::from_secs(20);

/// Text-to-speech backed by a piper-compatible binary.
///
/// Returns raw PCM (s16le at the voice model's sample rate). The child
/// process is killed when the synthesis future is dropped, so cancelling a
/// turn stops its in-flight synthesis.
#[derive(Debug, Clone)]
pub struct PiperTts {
    binary_path: PathBuf,
    model_path: PathBuf,
    config_path: Option<PathBuf>,
    speaker_id: Option<u32>,
    speed: f32,
    timeout: Duration,
}

impl PiperTts {
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            config_path: None,
            speaker_id: None,
            speed: 1.0,
            timeout: DEFAULT_TTS_TIMEOUT,
        }
    }

    /// Voice config, when it is not next to the model as `<model>.json`.
    pub fn with_config(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = Some(speaker_id);
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn check(&self, text: &str) -> Result<(), VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::InputTooLarge {
                size: text.len(),
                limit: MAX_TTS_INPUT_BYTES,
            });
        }
        if !self.model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                self.model_path
            )));
        }
        if !(0.1..=10.0).contains(&self.speed) {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TextToSpeech for PiperTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        self.check(text)?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_raw")
            // Length scale is the inverse of speed.
            .arg("--length_scale")
            .arg((1.0 / self.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        if let Some(speaker) = self.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = format!("{}\n", text.trim());

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            let result = stdin.write_all(text_owned.as_bytes()).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                operation: "TTS process",
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr.trim())));
        }

        Ok(output.stdout)
    }
}
