//! ASR Provider Adapter (§4.1) — the uniform contract every vendor sits behind.
//!
//! The manager and pool never import vendor-specific symbols (§9): they only ever
//! see `dyn AsrAdapter`. `startStream`/`sendAudio`/`endStream` are modeled as async
//! methods rather than a callback triple, but the effect is the same — the
//! orchestrator owns the channel the callback would have written into.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Linear16,
}

#[derive(Debug, Clone)]
pub struct AsrStreamConfig {
    /// BCP-47 language tag, e.g. "en-US".
    pub language_code: String,
    pub sample_rate: u32,
    pub encoding: Encoding,
}

impl AsrStreamConfig {
    pub fn validate(&self) -> Result<(), AsrError> {
        match self.sample_rate {
            8000 | 16000 | 24000 | 48000 => {}
            other => {
                return Err(AsrError::ProtocolError(format!(
                    "unsupported sample rate {other}Hz (must be 8000, 16000, 24000, or 48000)"
                )))
            }
        }
        if self.language_code.is_empty() {
            return Err(AsrError::ProtocolError("languageCode must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for AsrStreamConfig {
    fn default() -> Self {
        Self { language_code: "en-US".to_string(), sample_rate: 16000, encoding: Encoding::Linear16 }
    }
}

/// A single transcription event, normalized from whatever shape the vendor emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("stream already active")]
    StreamAlreadyActive,
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

/// One live ASR stream handed out by [`crate::asr::pool::ProviderPool`].
///
/// `start_stream` takes an mpsc sender rather than two callbacks — the
/// orchestrator's consuming task reads from the paired receiver, which makes
/// cancellation a channel-close instead of a callback-deregistration dance.
#[async_trait]
pub trait AsrAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start_stream(
        &mut self,
        config: AsrStreamConfig,
        events: mpsc::Sender<Result<TranscriptionResult, AsrError>>,
    ) -> Result<(), AsrError>;

    async fn send_audio(&mut self, pcm_chunk: &[u8]) -> Result<(), AsrError>;

    async fn end_stream(&mut self) -> Result<(), AsrError>;
}
