//! Explicit configuration structs — one per subsystem in spec §6.
//!
//! No free-form option bags in the core (§9 design note). Every site loads
//! defaults, then layers a config file, then environment variables
//! (`CADENCE_*`), via the `config` crate — the same layered-source pattern
//! `gjovanov-roomler-ai` uses for its own `config` dependency.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub first_token_target_ms: u64,
    pub end_to_end_target_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self { first_token_target_ms: 500, end_to_end_target_ms: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    pub vad_threshold: f32,
    pub vad_duration_ms: u64,
    pub interruption_cooldown_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self { vad_threshold: 0.7, vad_duration_ms: 150, interruption_cooldown_ms: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min_pool_size: 2, max_pool_size: 10, acquire_timeout_ms: 5000, idle_timeout_ms: 60_000 }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManagerConfig {
    pub error_threshold: u32,
    pub confidence_threshold: f32,
    pub wer_threshold: f32,
    pub health_check_interval_ms: u64,
    /// Consecutive successes required to recover from unhealthy (§4.2: "≥3").
    pub recovery_success_count: u32,
    /// Idle-without-errors window that also counts as recovered (§4.2: 5 minutes).
    pub recovery_idle_ms: u64,
}

impl Default for ProviderManagerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            confidence_threshold: 0.7,
            wer_threshold: 0.15,
            health_check_interval_ms: 30_000,
            recovery_success_count: 3,
            recovery_idle_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub rolling_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySource {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_minutes: u64,
    pub repositories: Vec<RepositorySource>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_minutes: 3, repositories: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub max_batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: "local-hash-384".to_string(), dimension: 384, max_batch_size: 100, inter_batch_delay_ms: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub preserve_paragraphs: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chunk_size: 1000, overlap_size: 200, preserve_paragraphs: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    pub silence_threshold: f32,
    pub energy_threshold: f32,
    pub pre_speech_padding_ms: u64,
    pub post_speech_padding_ms: u64,
    pub min_silence_duration_ms: u64,
    pub min_speech_duration_ms: u64,
    pub bypass_initial_chunks: usize,
    pub flush_interval_ms: u64,
    pub max_buffer_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            energy_threshold: 0.05,
            pre_speech_padding_ms: 300,
            post_speech_padding_ms: 300,
            min_silence_duration_ms: 500,
            min_speech_duration_ms: 250,
            bypass_initial_chunks: 5,
            flush_interval_ms: 100,
            max_buffer_size: 16000 * 10 * 2, // 10s of 16kHz i16 PCM
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    pub min_confidence_threshold: f32,
    pub max_partial_history: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self { min_confidence_threshold: 0.5, max_partial_history: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    pub min_confidence_threshold: f32,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self { min_confidence_threshold: 0.6 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "CADENCE_LLM_API_KEY".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    pub latency: LatencyConfig,
    pub barge_in: BargeInConfig,
    pub pool: PoolConfig,
    pub provider_manager: ProviderManagerConfig,
    pub breaker: BreakerConfig,
    pub refresh: RefreshConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub vad: VadConfig,
    pub transcript: TranscriptConfig,
    pub grounding: GroundingConfig,
}

impl CadenceConfig {
    /// Layer defaults → `config/cadence.toml` (if present) → `CADENCE_*` env vars.
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("config/cadence").required(false))
            .add_source(config::Environment::with_prefix("CADENCE").separator("__"));
        builder.build()?.try_deserialize()
    }
}
