//! Grounding validator (§4.7 "Grounding validator").

use std::collections::HashSet;

use super::types::{GroundingResult, SearchHit};
use crate::config::GroundingConfig;

const HEDGING_PHRASES: &[&str] = &["i think", "it seems", "probably", "might be", "possibly", "i believe"];
const MAX_HEDGING_PENALTY: f32 = 0.6;

fn significant_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?']).map(|s| s.trim()).filter(|s| !s.is_empty()).collect()
}

fn word_overlap(response: &str, chunk_words: &HashSet<String>) -> f32 {
    let response_words = significant_words(response);
    if response_words.is_empty() {
        return 0.0;
    }
    let overlap = response_words.iter().filter(|w| chunk_words.contains(*w)).count();
    overlap as f32 / response_words.len() as f32
}

fn sentence_coverage(response: &str, chunk_words: &HashSet<String>) -> f32 {
    let sents = sentences(response);
    if sents.is_empty() {
        return 0.0;
    }
    let covered = sents
        .iter()
        .filter(|s| {
            let words = significant_words(s);
            if words.is_empty() {
                return false;
            }
            let hits = words.iter().filter(|w| chunk_words.contains(*w)).count();
            (hits as f32 / words.len() as f32) > 0.5
        })
        .count();
    covered as f32 / sents.len() as f32
}

fn factual_consistency(response: &str, chunk_words: &HashSet<String>) -> f32 {
    // Specific-fact tokens: numbers and capitalized multi-char words.
    let fact_tokens: Vec<&str> = response
        .split_whitespace()
        .filter(|w| {
            let cleaned: String = w.chars().filter(|c| c.is_alphanumeric()).collect();
            !cleaned.is_empty() && (cleaned.chars().next().unwrap().is_ascii_digit() || cleaned.chars().next().unwrap().is_uppercase())
        })
        .collect();

    let base = if fact_tokens.is_empty() {
        1.0
    } else {
        let verified = fact_tokens
            .iter()
            .filter(|t| {
                let cleaned: String = t.chars().filter(|c| c.is_alphanumeric()).collect();
                chunk_words.contains(&cleaned.to_lowercase())
            })
            .count();
        verified as f32 / fact_tokens.len() as f32
    };

    let lower = response.to_lowercase();
    let hedge_hits = HEDGING_PHRASES.iter().filter(|p| lower.contains(**p)).count();
    let penalty = (hedge_hits as f32 * 0.15).min(MAX_HEDGING_PENALTY);

    (base - penalty).max(0.0)
}

/// `isGrounded` iff `confidence >= minConfidenceThreshold`. With zero sources
/// this always returns a fixed "no sources" fallback — never an exception.
pub fn validate_grounding(response: &str, chunks: &[SearchHit], config: &GroundingConfig) -> GroundingResult {
    if chunks.is_empty() {
        return GroundingResult {
            is_grounded: false,
            confidence: 0.0,
            word_overlap: 0.0,
            sentence_coverage: 0.0,
            source_relevance: 0.0,
            factual_consistency: 0.0,
            recommendations: vec!["No sources provided — response is not grounded in retrieved knowledge.".to_string()],
        };
    }

    let chunk_words: HashSet<String> = chunks.iter().flat_map(|c| significant_words(&c.text)).collect();
    let overlap = word_overlap(response, &chunk_words);
    let coverage = sentence_coverage(response, &chunk_words);
    let relevance = chunks.iter().map(|c| c.similarity).sum::<f32>() / chunks.len() as f32;
    let consistency = factual_consistency(response, &chunk_words);

    let confidence = 0.3 * overlap + 0.3 * coverage + 0.2 * relevance + 0.2 * consistency;
    let is_grounded = confidence >= config.min_confidence_threshold;

    let mut recommendations = Vec::new();
    if overlap < 0.4 {
        recommendations.push("Response shares little vocabulary with retrieved sources.".to_string());
    }
    if coverage < 0.4 {
        recommendations.push("Many sentences are not supported by any retrieved chunk.".to_string());
    }
    if recommendations.is_empty() && !is_grounded {
        recommendations.push("Confidence below threshold; consider retrieving additional sources.".to_string());
    }

    GroundingResult {
        is_grounded,
        confidence,
        word_overlap: overlap,
        sentence_coverage: coverage,
        source_relevance: relevance,
        factual_consistency: consistency,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hit(text: &str, similarity: f32) -> SearchHit {
        SearchHit {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            document_title: "Doc".to_string(),
            document_url: "https://example.com".to_string(),
            source_type: "github".to_string(),
            text: text.to_string(),
            similarity,
        }
    }

    #[test]
    fn zero_sources_yields_fixed_fallback() {
        let result = validate_grounding("Anything at all.", &[], &GroundingConfig::default());
        assert!(!result.is_grounded);
        assert_eq!(result.confidence, 0.0);
        assert!(result.recommendations[0].contains("No sources"));
    }

    #[test]
    fn confidence_is_bounded_in_unit_interval() {
        let hits = vec![hit("the refresh interval defaults to 3 minutes", 0.9)];
        let result = validate_grounding("The refresh interval defaults to 3 minutes.", &hits, &GroundingConfig::default());
        assert!(result.confidence >= 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn heavily_overlapping_response_is_grounded() {
        let hits = vec![hit("the refresh interval defaults to 3 minutes for all repositories", 0.95)];
        let result = validate_grounding(
            "The refresh interval defaults to 3 minutes for all repositories.",
            &hits,
            &GroundingConfig::default(),
        );
        assert!(result.is_grounded);
    }

    #[test]
    fn unrelated_response_is_not_grounded() {
        let hits = vec![hit("the refresh interval defaults to 3 minutes", 0.9)];
        let result = validate_grounding(
            "Bananas are a good source of potassium and fiber for breakfast.",
            &hits,
            &GroundingConfig::default(),
        );
        assert!(!result.is_grounded);
    }

    #[test]
    fn hedging_language_reduces_factual_consistency() {
        let hits = vec![hit("Acme Corp reported 42 million in revenue", 0.9)];
        let confident = validate_grounding("Acme Corp reported 42 million in revenue.", &hits, &GroundingConfig::default());
        let hedged = validate_grounding(
            "I think Acme Corp possibly reported 42 million in revenue.",
            &hits,
            &GroundingConfig::default(),
        );
        assert!(hedged.factual_consistency <= confident.factual_consistency);
    }
}
