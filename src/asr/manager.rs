//! ASR Provider Manager (§4.2) — health tracking, priority failover,
//! quality-based switching.
//!
//! Owner-task discipline (§5): all reads/writes to provider health happen
//! through `&self` methods backed by `parking_lot::Mutex` guarding pure
//! in-memory bookkeeping only — no I/O under the lock, matching the
//! `VoiceOrchestrator`'s own `Mutex<HashMap<..>>` style.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::asr::wer::WerBreakdown;
use crate::config::ProviderManagerConfig;

#[derive(Debug, Clone)]
pub struct WerObservation {
    pub wer: f64,
    pub breakdown: WerBreakdown,
    pub at: Instant,
}

/// Rolling error-timestamp window used to evaluate `errorThreshold` (§3).
#[derive(Debug, Default)]
struct ErrorWindow {
    timestamps: VecDeque<Instant>,
}

impl ErrorWindow {
    fn push(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Decay entries older than the rolling window, returning the post-decay count.
    fn decay(&mut self, now: Instant, window: Duration) -> usize {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.len()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub name: String,
    pub priority: u32,
    pub healthy: bool,
    pub success_count: u64,
    pub error_count: u64,
    pub confidence_ema: f32,
    pub latency_ema_ms: f32,
    pub last_success: Option<Instant>,
    pub last_error: Option<Instant>,
    /// Bounded; oldest evicted first (§3 "WER history buffer").
    pub wer_history: VecDeque<WerObservation>,
    consecutive_successes: u32,
    error_window: ErrorWindow,
}

const WER_HISTORY_CAP: usize = 50;
/// EMA smoothing factor shared by confidence and latency tracking.
const EMA_ALPHA: f32 = 0.3;

impl ProviderHealth {
    fn new(name: &str, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            healthy: true,
            success_count: 0,
            error_count: 0,
            confidence_ema: 1.0,
            latency_ema_ms: 0.0,
            last_success: None,
            last_error: None,
            wer_history: VecDeque::new(),
            consecutive_successes: 0,
            error_window: ErrorWindow::default(),
        }
    }

    fn current_wer(&self) -> f64 {
        self.wer_history.back().map(|o| o.wer).unwrap_or(0.0)
    }

    /// `score = 50·confidenceEMA − 100·WER − 10·priority − 0.01·latencyEMA` (§4.2).
    pub fn quality_score(&self) -> f64 {
        50.0 * self.confidence_ema as f64 - 100.0 * self.current_wer()
            - 10.0 * self.priority as f64
            - 0.01 * self.latency_ema_ms as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchReason {
    Health,
    Quality,
}

#[derive(Debug, Clone)]
pub struct ProviderSwitch {
    pub from: String,
    pub to: String,
    pub reason: SwitchReason,
}

pub struct ProviderManager {
    config: ProviderManagerConfig,
    providers: Mutex<HashMap<String, ProviderHealth>>,
    active: Mutex<Option<String>>,
}

impl ProviderManager {
    pub fn new(config: ProviderManagerConfig) -> Self {
        Self { config, providers: Mutex::new(HashMap::new()), active: Mutex::new(None) }
    }

    pub fn register(&self, name: &str, priority: u32) {
        let mut providers = self.providers.lock();
        providers.insert(name.to_string(), ProviderHealth::new(name, priority));
        drop(providers);
        self.recompute_active();
    }

    /// Enumerate healthy providers, ascending by priority number; first = active (§4.2).
    fn recompute_active(&self) {
        let providers = self.providers.lock();
        let mut healthy: Vec<&ProviderHealth> = providers.values().filter(|p| p.healthy).collect();
        healthy.sort_by_key(|p| p.priority);
        let new_active = healthy.first().map(|p| p.name.clone());
        drop(providers);
        *self.active.lock() = new_active;
    }

    pub fn active_provider(&self) -> Option<String> {
        self.active.lock().clone()
    }

    pub fn health_of(&self, name: &str) -> Option<ProviderHealth> {
        self.providers.lock().get(name).cloned()
    }

    /// All registered providers' health, for the observability endpoint (§6).
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        self.providers.lock().values().cloned().collect()
    }

    /// Record a successful release (§4.2 `release(id, success, confidence?)`).
    /// Returns a switch decision if one is warranted.
    pub fn record_success(&self, name: &str, confidence: f32, latency_ms: f32) -> Option<ProviderSwitch> {
        {
            let mut providers = self.providers.lock();
            if let Some(p) = providers.get_mut(name) {
                p.success_count += 1;
                p.consecutive_successes += 1;
                p.confidence_ema = ema(p.confidence_ema, confidence);
                p.latency_ema_ms = ema(p.latency_ema_ms, latency_ms);
                p.last_success = Some(Instant::now());
                if !p.healthy && self.has_recovered(p) {
                    p.healthy = true;
                }
            }
        }
        self.recompute_active();
        self.maybe_quality_switch()
    }

    /// Record a WER observation against the chosen provider (§4.2; Open Question (a)
    /// in §9 notes this should only happen when a canonical reference exists — callers
    /// must not invoke this without one).
    pub fn record_wer(&self, name: &str, wer: f64, breakdown: WerBreakdown) {
        let mut providers = self.providers.lock();
        if let Some(p) = providers.get_mut(name) {
            p.wer_history.push_back(WerObservation { wer, breakdown, at: Instant::now() });
            while p.wer_history.len() > WER_HISTORY_CAP {
                p.wer_history.pop_front();
            }
        }
    }

    /// Record a provider-level error (§4.2 `remove(id, error?)`). Returns a switch
    /// decision (health transitions preempt quality ones, §4.2).
    pub fn record_error(&self, name: &str) -> Option<ProviderSwitch> {
        let was_active = self.active_provider().as_deref() == Some(name);
        let became_unhealthy;
        {
            let mut providers = self.providers.lock();
            let Some(p) = providers.get_mut(name) else { return None };
            p.error_count += 1;
            p.consecutive_successes = 0;
            p.last_error = Some(Instant::now());
            let now = Instant::now();
            p.error_window.push(now);
            let count_in_window =
                p.error_window.decay(now, Duration::from_millis(self.config.health_check_interval_ms.max(1000)));
            became_unhealthy = p.healthy && count_in_window as u32 >= self.config.error_threshold;
            if became_unhealthy {
                p.healthy = false;
            }
        }
        self.recompute_active();
        if became_unhealthy && was_active {
            let new_active = self.active_provider();
            return new_active.map(|to| ProviderSwitch { from: name.to_string(), to, reason: SwitchReason::Health });
        }
        None
    }

    fn has_recovered(&self, p: &ProviderHealth) -> bool {
        if p.consecutive_successes >= self.config.recovery_success_count {
            return true;
        }
        match p.last_error {
            None => true,
            Some(last_error) => last_error.elapsed() >= Duration::from_millis(self.config.recovery_idle_ms),
        }
    }

    /// A periodic health tick (§4.2) re-evaluates recovery for every unhealthy
    /// provider, decaying their error windows.
    pub fn health_tick(&self) {
        let names: Vec<String>;
        {
            let mut providers = self.providers.lock();
            let now = Instant::now();
            let window = Duration::from_millis(self.config.health_check_interval_ms.max(1000));
            for p in providers.values_mut() {
                p.error_window.decay(now, window);
                if !p.healthy && self.has_recovered(p) {
                    p.healthy = true;
                }
            }
            names = providers.keys().cloned().collect();
        }
        let _ = names;
        self.recompute_active();
    }

    /// Quality-based switch: only triggers when the *active* provider has
    /// degraded below threshold AND some other healthy candidate scores
    /// strictly higher (§4.2, §8 testable property).
    fn maybe_quality_switch(&self) -> Option<ProviderSwitch> {
        let active_name = self.active_provider()?;
        let providers = self.providers.lock();
        let active = providers.get(&active_name)?;
        if active.confidence_ema >= self.config.confidence_threshold
            && active.current_wer() <= self.config.wer_threshold as f64
        {
            return None;
        }
        let active_score = active.quality_score();
        let best_other = providers
            .values()
            .filter(|p| p.healthy && p.name != active_name)
            .max_by(|a, b| a.quality_score().partial_cmp(&b.quality_score()).unwrap());
        let best_other = best_other?;
        if best_other.quality_score() > active_score {
            let to = best_other.name.clone();
            drop(providers);
            *self.active.lock() = Some(to.clone());
            return Some(ProviderSwitch { from: active_name, to, reason: SwitchReason::Quality });
        }
        None
    }
}

fn ema(previous: f32, sample: f32) -> f32 {
    EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * previous
}
