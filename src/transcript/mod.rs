//! Transcript Aggregator (§4.4): per-session finals/partials accumulation
//! and confidence filtering.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::asr::TranscriptionResult;
use crate::config::TranscriptConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregatorEvent {
    Accepted,
    /// Below `minConfidenceThreshold` — dropped, never reaches finals or partials.
    Filtered,
}

#[derive(Default)]
struct SessionTranscript {
    finals: Vec<TranscriptionResult>,
    partials: VecDeque<TranscriptionResult>,
    confidence_sum: f64,
    word_count: u64,
}

pub struct TranscriptAggregator {
    config: TranscriptConfig,
    sessions: Mutex<HashMap<String, SessionTranscript>>,
}

impl TranscriptAggregator {
    pub fn new(config: TranscriptConfig) -> Self {
        Self { config, sessions: Mutex::new(HashMap::new()) }
    }

    /// Feed one incoming result for `session_id`. Returns whether it was
    /// accepted or filtered for low confidence.
    pub fn ingest(&self, session_id: &str, result: TranscriptionResult) -> AggregatorEvent {
        if result.confidence < self.config.min_confidence_threshold {
            return AggregatorEvent::Filtered;
        }

        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(session_id.to_string()).or_default();

        if result.is_final {
            entry.partials.clear();
            entry.confidence_sum += result.confidence as f64;
            entry.word_count += result.text.split_whitespace().count() as u64;
            entry.finals.push(result);
        } else {
            entry.partials.push_back(result);
            while entry.partials.len() > self.config.max_partial_history {
                entry.partials.pop_front();
            }
        }
        AggregatorEvent::Accepted
    }

    /// The joined text of all finalized utterances for a session.
    pub fn get_complete(&self, session_id: &str) -> String {
        let sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(entry) => entry.finals.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join(" "),
            None => String::new(),
        }
    }

    /// The most recent partial, if any.
    pub fn aggregate_partials(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.lock();
        sessions.get(session_id)?.partials.back().map(|r| r.text.clone())
    }

    pub fn average_confidence(&self, session_id: &str) -> Option<f64> {
        let sessions = self.sessions.lock();
        let entry = sessions.get(session_id)?;
        if entry.finals.is_empty() {
            return None;
        }
        Some(entry.confidence_sum / entry.finals.len() as f64)
    }

    pub fn word_count(&self, session_id: &str) -> u64 {
        let sessions = self.sessions.lock();
        sessions.get(session_id).map(|e| e.word_count).unwrap_or(0)
    }

    pub fn final_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.lock();
        sessions.get(session_id).map(|e| e.finals.len()).unwrap_or(0)
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(text: &str, is_final: bool, confidence: f32) -> TranscriptionResult {
        TranscriptionResult {
            text: text.to_string(),
            is_final,
            confidence,
            provider: "mock".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn low_confidence_is_filtered_and_never_stored() {
        let agg = TranscriptAggregator::new(TranscriptConfig { min_confidence_threshold: 0.5, max_partial_history: 10 });
        let event = agg.ingest("s1", result("garbled", false, 0.1));
        assert_eq!(event, AggregatorEvent::Filtered);
        assert_eq!(agg.aggregate_partials("s1"), None);
    }

    #[test]
    fn final_clears_partials_and_appends() {
        let agg = TranscriptAggregator::new(TranscriptConfig::default());
        agg.ingest("s1", result("hello wor", false, 0.6));
        agg.ingest("s1", result("hello world", true, 0.9));
        assert_eq!(agg.aggregate_partials("s1"), None);
        assert_eq!(agg.get_complete("s1"), "hello world");
        assert_eq!(agg.final_count("s1"), 1);
    }

    #[test]
    fn partial_history_is_capped() {
        let agg = TranscriptAggregator::new(TranscriptConfig { min_confidence_threshold: 0.0, max_partial_history: 2 });
        agg.ingest("s1", result("a", false, 0.6));
        agg.ingest("s1", result("a b", false, 0.6));
        agg.ingest("s1", result("a b c", false, 0.6));
        assert_eq!(agg.aggregate_partials("s1"), Some("a b c".to_string()));
    }

    #[test]
    fn finals_are_append_only_and_joined_in_order() {
        let agg = TranscriptAggregator::new(TranscriptConfig::default());
        agg.ingest("s1", result("first sentence", true, 0.9));
        agg.ingest("s1", result("second sentence", true, 0.9));
        assert_eq!(agg.get_complete("s1"), "first sentence second sentence");
        assert_eq!(agg.final_count("s1"), 2);
    }

    #[test]
    fn average_confidence_tracks_finals_only() {
        let agg = TranscriptAggregator::new(TranscriptConfig::default());
        agg.ingest("s1", result("a", true, 0.8));
        agg.ingest("s1", result("b", true, 1.0));
        assert!((agg.average_confidence("s1").unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn unknown_session_returns_empty_defaults() {
        let agg = TranscriptAggregator::new(TranscriptConfig::default());
        assert_eq!(agg.get_complete("nope"), "");
        assert_eq!(agg.aggregate_partials("nope"), None);
        assert_eq!(agg.final_count("nope"), 0);
    }
}
