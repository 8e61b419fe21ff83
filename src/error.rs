//! Crate-level error taxonomy.
//!
//! Every stage-local error (`asr::AsrError`, `rag::VectorStoreError`, ...) converts
//! into one of these kinds before it reaches the orchestrator. The kind decides how
//! the orchestrator propagates it (§7): retry-then-break, rotate provider, or
//! terminate the pipeline with `error`. `Cancelled` is deliberately not logged as an
//! error anywhere it is constructed — it is the orchestrator's clean-EOF signal.

use crate::orchestrator::pipeline::Stage;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("transient error from {stage:?}: {reason}")]
    TransientRemote { stage: Stage, reason: String },

    #[error("provider degraded: {provider} ({reason})")]
    ProviderDegraded { provider: String, reason: String },

    #[error("quota exceeded, retry after {retry_after_ms:?}ms")]
    Quota { retry_after_ms: Option<u64> },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Cancellation is not a failure — the orchestrator treats it as EOF (§7).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    /// Whether a circuit breaker should count this as a failure (§4.11).
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(self, CoreError::TransientRemote { .. } | CoreError::Internal(_))
    }
}
