//! Voice Activity Detection (§4.3).
//!
//! Trait-based, runtime-swappable detection algorithms. Only the
//! energy-based detector is implemented here; ML-based backends (RMS,
//! Silero, WebRTC) are vendor model integrations out of this core's scope
//! (§1), but the trait leaves room for them.

pub mod energy;
pub mod preprocessor;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub is_speech: bool,
    pub energy: f32,
    pub threshold: f32,
}

pub trait VoiceActivityDetection: Send + Sync {
    fn name(&self) -> &'static str;

    /// `samples` are i16 PCM, mono, at the configured sample rate.
    fn detect(&mut self, samples: &[i16]) -> Result<VadResult, VadError>;
}

pub use energy::EnergyVad;
pub use preprocessor::{AudioPreprocessor, PreprocessorEvent};
