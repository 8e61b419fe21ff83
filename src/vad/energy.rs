//! Energy-based VAD (§4.3 "Energy model").
//!
//! Normalizes 16-bit LE PCM to `[-1, 1]`, computes RMS energy, and maintains a
//! rolling window of the last 100 energy values. Once the window holds ≥20
//! entries, the adaptive threshold clamps `2 × median(window)` into
//! `[silenceThreshold, energyThreshold]`.

use std::collections::VecDeque;

use super::{VadError, VadResult, VoiceActivityDetection};
use crate::config::VadConfig;

const WINDOW_CAP: usize = 100;
const MIN_WINDOW_FOR_ADAPTIVE: usize = 20;

pub struct EnergyVad {
    config: VadConfig,
    window: VecDeque<f32>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self { config, window: VecDeque::with_capacity(WINDOW_CAP) }
    }

    fn rms_energy(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = samples.iter().map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        }).sum();
        ((sum_sq / samples.len() as f64).sqrt()) as f32
    }

    fn median(&self) -> f32 {
        let mut sorted: Vec<f32> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// The adaptive threshold, or the static `energyThreshold` fallback before
    /// the window has enough samples.
    pub fn adaptive_threshold(&self) -> f32 {
        if self.window.len() < MIN_WINDOW_FOR_ADAPTIVE {
            return self.config.energy_threshold;
        }
        let target = 2.0 * self.median();
        target.clamp(self.config.silence_threshold, self.config.energy_threshold)
    }
}

impl VoiceActivityDetection for EnergyVad {
    fn name(&self) -> &'static str {
        "energy"
    }

    fn detect(&mut self, samples: &[i16]) -> Result<VadResult, VadError> {
        if samples.is_empty() {
            return Err(VadError::InvalidAudio("empty chunk".into()));
        }
        let energy = Self::rms_energy(samples);
        self.window.push_back(energy);
        if self.window.len() > WINDOW_CAP {
            self.window.pop_front();
        }
        let threshold = self.adaptive_threshold();
        Ok(VadResult { is_speech: energy > threshold, energy, threshold })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    fn tone(n: usize, amplitude: i16) -> Vec<i16> {
        (0..n).map(|i| {
            let phase = (i as f32) * 0.3;
            (phase.sin() * amplitude as f32) as i16
        }).collect()
    }

    #[test]
    fn silence_is_below_threshold() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let result = vad.detect(&silence(512)).unwrap();
        assert!(!result.is_speech);
    }

    #[test]
    fn loud_tone_is_detected_as_speech() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let result = vad.detect(&tone(512, 20000)).unwrap();
        assert!(result.is_speech);
    }

    #[test]
    fn threshold_falls_back_to_static_before_window_fills() {
        let cfg = VadConfig::default();
        let mut vad = EnergyVad::new(cfg.clone());
        let result = vad.detect(&silence(512)).unwrap();
        assert_eq!(result.threshold, cfg.energy_threshold);
    }

    #[test]
    fn adaptive_threshold_is_clamped_to_configured_range() {
        let cfg = VadConfig::default();
        let mut vad = EnergyVad::new(cfg.clone());
        for _ in 0..30 {
            vad.detect(&tone(512, 1000)).unwrap();
        }
        let threshold = vad.adaptive_threshold();
        assert!(threshold >= cfg.silence_threshold && threshold <= cfg.energy_threshold);
    }

    #[test]
    fn empty_chunk_is_rejected() {
        let mut vad = EnergyVad::new(VadConfig::default());
        assert!(vad.detect(&[]).is_err());
    }
}
