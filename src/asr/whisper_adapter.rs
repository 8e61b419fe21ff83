//! Local Whisper ASR adapter, behind the uniform `AsrAdapter` trait.
//!
//! Whisper has no native streaming partial-result API: it decodes a finished
//! buffer. We approximate partials by re-decoding the in-flight buffer on a
//! fixed cadence and emitting the result as `isFinal=false`; `end_stream`
//! performs the final decode and emits it with `isFinal=true`, satisfying
//! §4.1's "the last result before silence must be a `isFinal=true` event."

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::adapter::{AsrAdapter, AsrError, AsrStreamConfig, TranscriptionResult};

pub struct WhisperAdapter {
    context: Arc<WhisperContext>,
    buffer: Vec<f32>,
    active: bool,
    events: Option<mpsc::Sender<Result<TranscriptionResult, AsrError>>>,
    partial_cadence_samples: usize,
    samples_since_partial: usize,
}

impl WhisperAdapter {
    pub fn load(model_path: impl Into<PathBuf>) -> Result<Self, AsrError> {
        let model_path = model_path.into();
        let context = WhisperContext::new_with_params(
            model_path.to_string_lossy().as_ref(),
            WhisperContextParameters::default(),
        )
        .map_err(|e| AsrError::ProviderUnavailable(format!("failed to load whisper model: {e}")))?;
        Ok(Self {
            context: Arc::new(context),
            buffer: Vec::new(),
            active: false,
            events: None,
            partial_cadence_samples: 16000, // re-decode roughly every 1s of audio
            samples_since_partial: 0,
        })
    }

    fn decode(&self, is_final: bool) -> Result<String, AsrError> {
        let mut state = self
            .context
            .create_state()
            .map_err(|e| AsrError::ProviderUnavailable(format!("whisper state error: {e}")))?;
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_single_segment(is_final);
        state
            .full(params, &self.buffer)
            .map_err(|e| AsrError::ProviderUnavailable(format!("whisper inference failed: {e}")))?;
        let n = state.full_n_segments().map_err(|e| AsrError::ProviderUnavailable(e.to_string()))?;
        let mut text = String::new();
        for i in 0..n {
            if let Ok(segment) = state.full_get_segment_text(i) {
                text.push_str(&segment);
            }
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl AsrAdapter for WhisperAdapter {
    fn name(&self) -> &'static str {
        "whisper-local"
    }

    async fn start_stream(
        &mut self,
        config: AsrStreamConfig,
        events: mpsc::Sender<Result<TranscriptionResult, AsrError>>,
    ) -> Result<(), AsrError> {
        config.validate()?;
        if self.active {
            return Err(AsrError::StreamAlreadyActive);
        }
        self.active = true;
        self.buffer.clear();
        self.samples_since_partial = 0;
        self.events = Some(events);
        Ok(())
    }

    async fn send_audio(&mut self, pcm_chunk: &[u8]) -> Result<(), AsrError> {
        if !self.active {
            return Err(AsrError::ProtocolError("send_audio called before start_stream".into()));
        }
        let samples: Vec<f32> = pcm_chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect();
        self.samples_since_partial += samples.len();
        self.buffer.extend(samples);

        if self.samples_since_partial >= self.partial_cadence_samples {
            self.samples_since_partial = 0;
            let text = self.decode(false)?;
            if let Some(tx) = &self.events {
                let _ = tx
                    .send(Ok(TranscriptionResult {
                        text,
                        is_final: false,
                        confidence: 0.0, // whisper.cpp greedy decode exposes no per-segment confidence
                        provider: self.name().to_string(),
                        timestamp: Utc::now(),
                    }))
                    .await;
            }
        }
        Ok(())
    }

    async fn end_stream(&mut self) -> Result<(), AsrError> {
        if !self.active {
            return Ok(());
        }
        let text = self.decode(true)?;
        if let Some(tx) = &self.events {
            let _ = tx
                .send(Ok(TranscriptionResult {
                    text,
                    is_final: true,
                    confidence: 0.85,
                    provider: self.name().to_string(),
                    timestamp: Utc::now(),
                }))
                .await;
        }
        self.active = false;
        self.buffer.clear();
        Ok(())
    }
}

/// Guards concurrent access to a single `WhisperContext` across pooled adapters —
/// whisper.cpp's C++ state is not `Sync` for concurrent `full()` calls on one
/// context, so callers that share a model load wrap it behind this.
pub type SharedWhisperContext = Arc<Mutex<WhisperContext>>;
