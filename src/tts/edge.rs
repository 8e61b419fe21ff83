//! Microsoft Edge neural TTS adapter, behind the crate's `TextToSpeech`
//! trait. No API key required; the synthesis path is a WebSocket
//! connection, not the HTTP voice-list endpoint, so it sidesteps the
//! OpenSSL/BoringSSL conflicts that a WebRTC-linked build can run into.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use super::audio_utils;
use super::{SynthesisResult, TextToSpeech, TtsError, VoiceInfo};
use crate::audio_constants::AUDIO_SAMPLE_RATE;

pub struct EdgeTts {
    initialized: AtomicBool,
}

impl EdgeTts {
    pub fn new() -> Self {
        Self { initialized: AtomicBool::new(false) }
    }
}

impl Default for EdgeTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for EdgeTts {
    fn name(&self) -> &'static str {
        "edge"
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    async fn initialize(&self) -> Result<(), TtsError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisResult, TtsError> {
        if !self.is_initialized() {
            return Err(TtsError::ModelNotLoaded("Edge TTS not initialized".into()));
        }
        if text.is_empty() {
            return Err(TtsError::InvalidText("empty text".into()));
        }

        let voice_name = if voice == "default" || voice.is_empty() {
            self.default_voice().to_string()
        } else {
            voice.to_string()
        };

        info!(voice = %voice_name, text = %super::truncate_str(text, 50), "edge tts: synthesizing");

        let text_owned = text.to_string();
        tokio::time::timeout(std::time::Duration::from_secs(15), tokio::task::spawn_blocking(move || {
            let mut client = msedge_tts::tts::client::connect()
                .map_err(|e| TtsError::SynthesisFailed(format!("edge tts connect failed: {e}")))?;
            let config = msedge_tts::tts::SpeechConfig {
                voice_name: voice_name.clone(),
                audio_format: "raw-16khz-16bit-mono-pcm".to_string(),
                pitch: 0,
                rate: 0,
                volume: 0,
            };
            let audio = client
                .synthesize(&text_owned, &config)
                .map_err(|e| TtsError::SynthesisFailed(format!("edge tts synthesis failed: {e}")))?;
            let samples = audio_utils::pcm_bytes_to_i16(&audio.audio_bytes)?;
            if samples.is_empty() {
                warn!("edge tts: synthesis returned empty audio");
                return Err(TtsError::SynthesisFailed("empty audio returned".into()));
            }
            let duration_ms = audio_utils::duration_ms(samples.len(), AUDIO_SAMPLE_RATE);
            Ok(SynthesisResult { samples, sample_rate: AUDIO_SAMPLE_RATE, duration_ms })
        }))
        .await
        .map_err(|_| TtsError::SynthesisFailed("edge tts timed out after 15s".into()))?
        .map_err(|e| TtsError::SynthesisFailed(format!("edge tts task join error: {e}")))?
    }

    fn available_voices(&self) -> Vec<VoiceInfo> {
        static KNOWN_VOICES: &[(&str, &str, &str)] = &[
            ("en-US-JennyNeural", "female", "en-US"),
            ("en-US-GuyNeural", "male", "en-US"),
            ("en-US-AriaNeural", "female", "en-US"),
            ("en-GB-SoniaNeural", "female", "en-GB"),
            ("en-GB-RyanNeural", "male", "en-GB"),
        ];
        KNOWN_VOICES
            .iter()
            .map(|(id, gender, locale)| VoiceInfo {
                id: id.to_string(),
                name: id.to_string(),
                language: locale.to_string(),
                gender: Some(gender.to_string()),
                description: Some(format!("Microsoft Edge neural voice ({locale})")),
            })
            .collect()
    }

    fn default_voice(&self) -> &str {
        "en-US-JennyNeural"
    }
}
