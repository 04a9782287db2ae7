use crate::error::VoiceError;
use crate::traits::SpeechToText;
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum encoded audio handed to the STT binary (10 MiB). Prevents OOM from
/// runaway utterances.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default timeout for one STT process execution.
const DEFAULT_STT_TIMEOUT: Duration = Duration::from_secs(30);

/// Beam size of the authoritative pass.
const FINAL_BEAM_SIZE: u32 = 5;

/// Speech-to-text backed by a whisper.cpp-compatible command line binary.
///
/// Each call spawns the binary, writes a 16-bit mono WAV to its stdin and
/// reads the transcription from stdout. Partial calls use the (usually
/// smaller) partial model with greedy decoding; final calls use the final
/// model with beam search.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    binary_path: PathBuf,
    partial_model: PathBuf,
    final_model: PathBuf,
    sample_rate: u32,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperCli {
    pub fn new(
        binary_path: impl Into<PathBuf>,
        partial_model: impl Into<PathBuf>,
        final_model: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary_path: binary_path.into(),
            partial_model: partial_model.into(),
            final_model: final_model.into(),
            sample_rate: 16_000,
            language: None,
            timeout: DEFAULT_STT_TIMEOUT,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Forces a spoken language instead of auto-detection.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(
        &self,
        samples: &[f32],
        model: &Path,
        beam_size: u32,
    ) -> Result<String, VoiceError> {
        let wav = encode_wav(samples, self.sample_rate)?;
        if wav.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::InputTooLarge {
                size: wav.len(),
                limit: MAX_STT_INPUT_BYTES,
            });
        }

        let mut command = Command::new(&self.binary_path);
        // whisper.cpp arguments:
        // -m <model>: GGML model
        // -f -: read WAV from stdin
        // -nt: plain text without timestamps
        command
            .arg("-m")
            .arg(model)
            .arg("-f")
            .arg("-")
            .arg("-nt")
            .arg("-bs")
            .arg(beam_size.to_string())
            .arg("-l")
            .arg(self.language.as_deref().unwrap_or("auto"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move {
            let result = stdin.write_all(&wav).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                operation: "STT process",
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Stt(format!("Failed to write to stdin: {}", e)));
            }
            Err(e) => return Err(VoiceError::Stt(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    async fn transcribe_partial(&self, samples: &[f32]) -> Result<String, VoiceError> {
        self.run(samples, &self.partial_model, 1).await
    }

    async fn transcribe_final(&self, samples: &[f32]) -> Result<String, VoiceError> {
        self.run(samples, &self.final_model, FINAL_BEAM_SIZE).await
    }
}

/// Encodes normalised samples as a 16-bit mono WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Stt(format!("Failed to start WAV encoding: {}", e)))?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| VoiceError::Stt(format!("Failed to encode WAV: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Stt(format!("Failed to finish WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}
