//! Latency Monitor (§4.12). Bounded sample buffers, running mean/p50/p95/p99,
//! threshold alerting.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

const SAMPLE_CAP: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct StageThresholdsMs {
    pub audio_to_asr: u64,
    pub asr_to_llm: u64,
    pub llm_first_token: u64,
    pub llm_to_tts: u64,
    pub tts_to_client: u64,
    pub first_token_end_to_end: u64,
    pub full_cycle: u64,
}

impl Default for StageThresholdsMs {
    fn default() -> Self {
        Self {
            audio_to_asr: 50,
            asr_to_llm: 100,
            llm_first_token: 300,
            llm_to_tts: 50,
            tts_to_client: 100,
            first_token_end_to_end: 500,
            full_cycle: 2000,
        }
    }
}

impl StageThresholdsMs {
    /// The per-stage thresholds are fixed by §4.12; only the end-to-end
    /// targets are configurable (`LatencyConfig`).
    pub fn from_config(config: &crate::config::LatencyConfig) -> Self {
        Self {
            first_token_end_to_end: config.first_token_target_ms,
            full_cycle: config.end_to_end_target_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageTransition {
    AudioToAsr,
    AsrToLlm,
    LlmFirstToken,
    LlmToTts,
    TtsToClient,
}

#[derive(Debug, Clone)]
pub struct PercentileSummary {
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

#[derive(Default)]
struct SampleBuffer {
    samples: VecDeque<f64>,
}

impl SampleBuffer {
    fn push(&mut self, value_ms: f64) {
        self.samples.push_back(value_ms);
        if self.samples.len() > SAMPLE_CAP {
            self.samples.pop_front();
        }
    }

    fn summary(&self) -> Option<PercentileSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(PercentileSummary {
            mean_ms: mean,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            count: sorted.len(),
        })
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub struct LatencyReport {
    pub first_token_latency: Option<PercentileSummary>,
    pub total_latency: Option<PercentileSummary>,
    pub sla_met: bool,
    pub recommendations: Vec<String>,
}

pub struct LatencyMonitor {
    thresholds: StageThresholdsMs,
    first_token_latency: Mutex<SampleBuffer>,
    total_latency: Mutex<SampleBuffer>,
    breaches: Mutex<Vec<String>>,
}

impl LatencyMonitor {
    pub fn new(thresholds: StageThresholdsMs) -> Self {
        Self {
            thresholds,
            first_token_latency: Mutex::new(SampleBuffer::default()),
            total_latency: Mutex::new(SampleBuffer::default()),
            breaches: Mutex::new(Vec::new()),
        }
    }

    /// Records one stage-boundary measurement, alerting if it breaches the
    /// configured threshold for that transition.
    pub fn record_stage(&self, transition: StageTransition, elapsed_ms: u64) {
        let threshold = match transition {
            StageTransition::AudioToAsr => self.thresholds.audio_to_asr,
            StageTransition::AsrToLlm => self.thresholds.asr_to_llm,
            StageTransition::LlmFirstToken => self.thresholds.llm_first_token,
            StageTransition::LlmToTts => self.thresholds.llm_to_tts,
            StageTransition::TtsToClient => self.thresholds.tts_to_client,
        };
        if elapsed_ms > threshold {
            let msg = format!("{transition:?} took {elapsed_ms}ms, exceeding {threshold}ms threshold");
            warn!(stage = ?transition, elapsed_ms, threshold_ms = threshold, "latency threshold breached");
            self.breaches.lock().push(msg);
        }
    }

    pub fn record_first_token_latency(&self, elapsed_ms: u64) {
        self.first_token_latency.lock().push(elapsed_ms as f64);
        if elapsed_ms > self.thresholds.first_token_end_to_end {
            self.breaches.lock().push(format!(
                "first-token end-to-end took {elapsed_ms}ms, exceeding {}ms threshold",
                self.thresholds.first_token_end_to_end
            ));
        }
    }

    pub fn record_total_latency(&self, elapsed_ms: u64) {
        self.total_latency.lock().push(elapsed_ms as f64);
        if elapsed_ms > self.thresholds.full_cycle {
            self.breaches
                .lock()
                .push(format!("full cycle took {elapsed_ms}ms, exceeding {}ms threshold", self.thresholds.full_cycle));
        }
    }

    /// The SLA is met iff p95(firstTokenLatency) <= 500ms (§4.12).
    pub fn report(&self) -> LatencyReport {
        let first_token = self.first_token_latency.lock().summary();
        let total = self.total_latency.lock().summary();
        let sla_met = first_token.as_ref().map(|s| s.p95_ms <= self.thresholds.first_token_end_to_end as f64).unwrap_or(true);
        LatencyReport {
            first_token_latency: first_token,
            total_latency: total,
            sla_met,
            recommendations: self.breaches.lock().clone(),
        }
    }
}
