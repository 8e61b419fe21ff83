//! Circuit Breaker (§4.11). One instance per remote collaborator (ASR active
//! provider, LLM, TTS).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// What the caller should do after consulting the breaker before making a
/// remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    Proceed,
    /// Breaker is open (or half-open with its probe already spent): run the
    /// fallback or fail, but never make the remote call.
    UseFallback,
}

struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                half_open_successes: 0,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consult the breaker before issuing a remote call. In `half_open`,
    /// only one probe call is allowed in flight at a time.
    pub fn before_call(&self, now: Instant) -> CallPermit {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner, now);

        match inner.state {
            BreakerState::Closed => CallPermit::Proceed,
            BreakerState::Open => CallPermit::UseFallback,
            BreakerState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    CallPermit::UseFallback
                } else {
                    inner.half_open_probe_in_flight = true;
                    CallPermit::Proceed
                }
            }
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner, now: Instant) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if now.duration_since(opened_at) >= Duration::from_millis(self.config.timeout_ms) {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_probe_in_flight = false;
                }
            }
        }
    }

    pub fn record_success(&self, now: Instant) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures.clear();
            }
            BreakerState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
        let _ = now;
    }

    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.half_open_successes = 0;
            }
            BreakerState::Closed => {
                inner.failures.push_back(now);
                let window = Duration::from_millis(self.config.rolling_window_ms);
                while let Some(&front) = inner.failures.front() {
                    if now.duration_since(front) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::Open => {}
        }
    }
}
