//! Text-to-speech adapters (§4.11 TTS collaborator): a registry/
//! active-adapter pattern, async end to end.

pub mod audio_utils;
pub mod edge;

pub use edge::EdgeTts;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS model not loaded: {0}")]
    ModelNotLoaded(String),
    #[error("invalid text: {0}")]
    InvalidText(String),
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),
}

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub language: String,
    pub gender: Option<String>,
    pub description: Option<String>,
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_initialized(&self) -> bool;
    async fn initialize(&self) -> Result<(), TtsError>;
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, TtsError>;
    fn available_voices(&self) -> Vec<VoiceInfo>;
    fn default_voice(&self) -> &str;
}

pub(crate) fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}

/// The set of registered adapters plus which one is active. Fallback when
/// the TTS breaker is open is handled by the orchestrator (no audio, text
/// reply proceeds) rather than by this registry.
pub struct TtsRegistry {
    adapters: HashMap<String, Box<dyn TextToSpeech>>,
    active: String,
}

impl TtsRegistry {
    pub fn new() -> Self {
        Self { adapters: HashMap::new(), active: String::new() }
    }

    pub fn register(&mut self, adapter: Box<dyn TextToSpeech>) {
        let name = adapter.name().to_string();
        if self.active.is_empty() {
            self.active = name.clone();
        }
        self.adapters.insert(name, adapter);
    }

    pub fn set_active(&mut self, name: &str) -> Result<(), TtsError> {
        if !self.adapters.contains_key(name) {
            return Err(TtsError::AdapterNotFound(name.to_string()));
        }
        self.active = name.to_string();
        Ok(())
    }

    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, TtsError> {
        self.synthesize_with(text, voice, &self.active).await
    }

    pub async fn synthesize_with(&self, text: &str, voice: &str, adapter_name: &str) -> Result<SynthesisResult, TtsError> {
        let adapter = self.adapters.get(adapter_name).ok_or_else(|| TtsError::AdapterNotFound(adapter_name.to_string()))?;
        if !adapter.is_initialized() {
            adapter.initialize().await?;
        }
        adapter.synthesize(text, voice).await
    }

    pub fn available_voices(&self) -> Vec<VoiceInfo> {
        self.adapters.get(&self.active).map(|a| a.available_voices()).unwrap_or_default()
    }
}

impl Default for TtsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTts {
        name: &'static str,
    }

    #[async_trait]
    impl TextToSpeech for StubTts {
        fn name(&self) -> &'static str {
            self.name
        }
        fn is_initialized(&self) -> bool {
            true
        }
        async fn initialize(&self) -> Result<(), TtsError> {
            Ok(())
        }
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<SynthesisResult, TtsError> {
            if text.is_empty() {
                return Err(TtsError::InvalidText("empty".into()));
            }
            Ok(SynthesisResult { samples: vec![0; 10], sample_rate: 16000, duration_ms: 1 })
        }
        fn available_voices(&self) -> Vec<VoiceInfo> {
            vec![]
        }
        fn default_voice(&self) -> &str {
            "default"
        }
    }

    #[tokio::test]
    async fn first_registered_adapter_becomes_active() {
        let mut registry = TtsRegistry::new();
        registry.register(Box::new(StubTts { name: "first" }));
        registry.register(Box::new(StubTts { name: "second" }));
        let result = registry.synthesize("hello", "default").await.unwrap();
        assert_eq!(result.samples.len(), 10);
    }

    #[tokio::test]
    async fn synthesize_with_unknown_adapter_fails() {
        let registry = TtsRegistry::new();
        let result = registry.synthesize_with("hi", "default", "nope").await;
        assert!(matches!(result, Err(TtsError::AdapterNotFound(_))));
    }

    #[test]
    fn truncate_str_adds_ellipsis_when_over_limit() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello…");
    }
}
