//! Capacity-bounded access to a shared model client.
//!
//! Sessions never share mutable state, but they may share a model process or
//! endpoint with limited capacity. [`Limited`] wraps any collaborator and
//! caps the number of concurrent calls across all sessions holding a clone.

use crate::error::VoiceError;
use crate::traits::{SpeechToText, TextToSpeech};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug)]
pub struct Limited<T> {
    inner: T,
    permits: Arc<Semaphore>,
    name: &'static str,
}

impl<T> Limited<T> {
    /// Allows at most `capacity` concurrent calls into `inner`.
    pub fn new(inner: T, capacity: usize, name: &'static str) -> Result<Self, VoiceError> {
        if capacity == 0 {
            return Err(VoiceError::Config(format!(
                "{} capacity must be greater than zero",
                name
            )));
        }
        Ok(Self {
            inner,
            permits: Arc::new(Semaphore::new(capacity)),
            name,
        })
    }

    /// Number of calls that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, VoiceError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| VoiceError::Unavailable(self.name.to_string()))
    }
}

#[async_trait]
impl<T: SpeechToText> SpeechToText for Limited<T> {
    async fn transcribe_partial(&self, samples: &[f32]) -> Result<String, VoiceError> {
        let _permit = self.acquire().await?;
        self.inner.transcribe_partial(samples).await
    }

    async fn transcribe_final(&self, samples: &[f32]) -> Result<String, VoiceError> {
        let _permit = self.acquire().await?;
        self.inner.transcribe_final(samples).await
    }
}

#[async_trait]
impl<T: TextToSpeech> TextToSpeech for Limited<T> {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let _permit = self.acquire().await?;
        self.inner.synthesize(text).await
    }
}
