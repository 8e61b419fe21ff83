//! Audio preprocessor state machine (§4.3 "State machine", "Bypass policy",
//! "Flush policy").
//!
//! Durations are computed from sample counts against the fixed system sample
//! rate rather than wall-clock `Instant`s for the speech/silence timers
//! (audio chunks arrive close to real time, and sample-accurate accounting
//! keeps the tests deterministic); the periodic flush timer is the one place
//! wall-clock time is unavoidable, since it must fire even if no new audio
//! arrives.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::audio_constants::AUDIO_SAMPLE_RATE;
use crate::config::VadConfig;
use crate::vad::{EnergyVad, VadError, VoiceActivityDetection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Silence,
    Speech,
}

#[derive(Debug, Clone)]
pub enum PreprocessorEvent {
    /// Audio forwarded unconditionally — either a bypass chunk or a VAD-gated flush.
    Forward(Vec<i16>),
    SpeechStart,
    SpeechEnd { audio: Vec<i16> },
}

pub struct AudioPreprocessor {
    config: VadConfig,
    vad: EnergyVad,
    state: State,
    pre_speech_ring: VecDeque<i16>,
    active_buffer: Vec<i16>,
    speech_samples: usize,
    silence_samples: usize,
    chunks_seen: usize,
    last_flush: Instant,
}

fn ms_to_samples(ms: u64) -> usize {
    (ms as usize * AUDIO_SAMPLE_RATE as usize) / 1000
}

impl AudioPreprocessor {
    pub fn new(config: VadConfig) -> Self {
        let vad = EnergyVad::new(config.clone());
        Self {
            config,
            vad,
            state: State::Silence,
            pre_speech_ring: VecDeque::new(),
            active_buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
            chunks_seen: 0,
            last_flush: Instant::now(),
        }
    }

    fn pre_speech_cap(&self) -> usize {
        ms_to_samples(self.config.pre_speech_padding_ms)
    }

    fn push_pre_speech(&mut self, samples: &[i16]) {
        let cap = self.pre_speech_cap();
        for &s in samples {
            self.pre_speech_ring.push_back(s);
        }
        while self.pre_speech_ring.len() > cap {
            self.pre_speech_ring.pop_front();
        }
    }

    /// Process one incoming chunk, returning any events it produces. `now` is
    /// injected so tests can drive the periodic flush timer deterministically.
    pub fn process_chunk(&mut self, samples: &[i16], now: Instant) -> Result<Vec<PreprocessorEvent>, VadError> {
        let mut events = Vec::new();
        self.chunks_seen += 1;

        // Bypass policy: the first N chunks are forwarded unconditionally,
        // never gated, never buffered (§4.3). VAD still observes them so its
        // adaptive threshold starts warming up immediately.
        if self.chunks_seen <= self.config.bypass_initial_chunks {
            let _ = self.vad.detect(samples);
            events.push(PreprocessorEvent::Forward(samples.to_vec()));
            return Ok(events);
        }

        let result = self.vad.detect(samples)?;

        match self.state {
            State::Silence => {
                if result.is_speech {
                    self.state = State::Speech;
                    self.speech_samples = samples.len();
                    self.silence_samples = 0;
                    self.active_buffer.clear();
                    self.active_buffer.extend(self.pre_speech_ring.iter().copied());
                    self.active_buffer.extend_from_slice(samples);
                    events.push(PreprocessorEvent::SpeechStart);
                } else {
                    self.push_pre_speech(samples);
                }
            }
            State::Speech => {
                self.active_buffer.extend_from_slice(samples);
                if result.is_speech {
                    self.speech_samples += samples.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += samples.len();
                }

                let silence_ms = (self.silence_samples * 1000) / AUDIO_SAMPLE_RATE as usize;
                let speech_ms = (self.speech_samples * 1000) / AUDIO_SAMPLE_RATE as usize;

                if silence_ms as u64 >= self.config.min_silence_duration_ms
                    && speech_ms as u64 >= self.config.min_speech_duration_ms
                {
                    let audio = std::mem::take(&mut self.active_buffer);
                    self.state = State::Silence;
                    self.speech_samples = 0;
                    self.silence_samples = 0;
                    self.pre_speech_ring.clear();
                    events.push(PreprocessorEvent::SpeechEnd { audio });
                } else if self.active_buffer.len() * 2 >= self.config.max_buffer_size {
                    let audio = std::mem::take(&mut self.active_buffer);
                    events.push(PreprocessorEvent::Forward(audio));
                    self.last_flush = now;
                } else if now.duration_since(self.last_flush) >= Duration::from_millis(self.config.flush_interval_ms)
                {
                    let audio = std::mem::take(&mut self.active_buffer);
                    events.push(PreprocessorEvent::Forward(audio));
                    self.last_flush = now;
                }
            }
        }
        Ok(events)
    }

    pub fn is_in_speech(&self) -> bool {
        self.state == State::Speech
    }
}
