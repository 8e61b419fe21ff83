//! Cadence Core — Rust-first backbone for a real-time, voice-first AI
//! assistant.
//!
//! Design principles:
//! - Message passing via Tokio channels and `watch`/`mpsc`, not shared
//!   locks held across await points
//! - Trait-based collaborator contracts (ASR, LLM, TTS) so vendors plug in
//!   behind one capability set
//! - Lock-free concurrent maps (`dashmap`) for pool/session/pipeline
//!   registries owned by many tasks at once
//! - Explicit config structs loaded from env/file, never free-form option
//!   bags

pub mod asr;
pub mod audio_constants;
pub mod auth;
pub mod breaker;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod latency;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod rag;
pub mod session;
pub mod transcript;
pub mod tts;
pub mod vad;

pub use audio_constants::*;
pub use config::CadenceConfig;
pub use error::CoreError;
pub use logging::init_tracing;
pub use orchestrator::{InterruptHandler, PipelineOrchestrator, Stage};
