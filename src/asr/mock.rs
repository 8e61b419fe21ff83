//! Test/mock ASR adapters.
//!
//! `MockAdapter` drives deterministic, scriptable transcripts through the
//! orchestrator and pool test suites without any model weights.
//! `TombstoneAdapter` is an internal placeholder the pool swaps into a slot
//! while the real adapter is checked out (see `pool.rs::acquire_inner`) — it
//! is never handed to a caller and panics if ever driven.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::adapter::{AsrAdapter, AsrError, AsrStreamConfig, TranscriptionResult};

pub struct MockAdapter {
    name: &'static str,
    scripted: Vec<(String, bool, f32)>,
    active: bool,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        Self { name: leaked, scripted: Vec::new(), active: false }
    }

    pub fn with_script(mut self, scripted: Vec<(String, bool, f32)>) -> Self {
        self.scripted = scripted;
        self
    }
}

#[async_trait]
impl AsrAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
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
        let name = self.name.to_string();
        let scripted = self.scripted.clone();
        tokio::spawn(async move {
            for (text, is_final, confidence) in scripted {
                let _ = events
                    .send(Ok(TranscriptionResult { text, is_final, confidence, provider: name.clone(), timestamp: Utc::now() }))
                    .await;
            }
        });
        Ok(())
    }

    async fn send_audio(&mut self, _pcm_chunk: &[u8]) -> Result<(), AsrError> {
        Ok(())
    }

    async fn end_stream(&mut self) -> Result<(), AsrError> {
        self.active = false;
        Ok(())
    }
}

pub struct TombstoneAdapter;

#[async_trait]
impl AsrAdapter for TombstoneAdapter {
    fn name(&self) -> &'static str {
        "tombstone"
    }

    async fn start_stream(
        &mut self,
        _config: AsrStreamConfig,
        _events: mpsc::Sender<Result<TranscriptionResult, AsrError>>,
    ) -> Result<(), AsrError> {
        unreachable!("tombstone adapter must never be driven — it only occupies a checked-out pool slot")
    }

    async fn send_audio(&mut self, _pcm_chunk: &[u8]) -> Result<(), AsrError> {
        unreachable!("tombstone adapter must never be driven")
    }

    async fn end_stream(&mut self) -> Result<(), AsrError> {
        unreachable!("tombstone adapter must never be driven")
    }
}
