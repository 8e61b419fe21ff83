//! Citation assembly (§4.7 "Citation assembly").

use std::collections::HashMap;

use uuid::Uuid;

use super::types::{Citation, SearchHit};

const EXCERPT_MAX_CHARS: usize = 150;
const NEEDLE_WORDS: usize = 5;
const NEEDLE_MAX_CHARS: usize = 50;

/// Deduplicate hits by parent document, keeping the highest-similarity one
/// for each, sorted by relevance descending.
pub fn build_citations(hits: &[SearchHit]) -> Vec<Citation> {
    let mut best_by_doc: HashMap<Uuid, &SearchHit> = HashMap::new();
    for hit in hits {
        best_by_doc
            .entry(hit.document_id)
            .and_modify(|existing| {
                if hit.similarity > existing.similarity {
                    *existing = hit;
                }
            })
            .or_insert(hit);
    }

    let mut deduped: Vec<&SearchHit> = best_by_doc.into_values().collect();
    deduped.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));

    deduped
        .into_iter()
        .enumerate()
        .map(|(i, hit)| Citation {
            marker: (i + 1) as u32,
            document_id: hit.document_id,
            title: hit.document_title.clone(),
            url: hit.document_url.clone(),
            excerpt: truncate_excerpt(&hit.text),
        })
        .collect()
}

/// Truncate to `EXCERPT_MAX_CHARS`, preferring a sentence then a word
/// boundary.
fn truncate_excerpt(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= EXCERPT_MAX_CHARS {
        return text.to_string();
    }
    let window: String = chars[..EXCERPT_MAX_CHARS].iter().collect();
    if let Some(pos) = window.rfind(". ") {
        return window[..pos + 1].to_string();
    }
    if let Some(pos) = window.rfind(' ') {
        return window[..pos].to_string();
    }
    window
}

/// Each citation's leading key phrase is its first sentence trimmed to 50
/// chars, reduced to its first 5 words as the match needle. Inject `[n]`
/// markers into `response` the first time each needle is found; a position
/// is marked at most once.
pub fn inject_markers(response: &str, citations: &[Citation]) -> String {
    let mut result = response.to_string();
    let mut marked_ranges: Vec<(usize, usize)> = Vec::new();

    for citation in citations {
        let needle = leading_key_phrase(&citation.excerpt);
        if needle.is_empty() {
            continue;
        }
        if let Some(pos) = result.find(&needle) {
            let end = pos + needle.len();
            let overlaps = marked_ranges.iter().any(|&(s, e)| pos < e && end > s);
            if overlaps {
                continue;
            }
            let marker = format!(" [{}]", citation.marker);
            result.insert_str(end, &marker);
            marked_ranges.push((pos, end + marker.len()));
        }
    }
    result
}

fn leading_key_phrase(text: &str) -> String {
    let first_sentence = text.split(". ").next().unwrap_or(text);
    let trimmed: String = first_sentence.chars().take(NEEDLE_MAX_CHARS).collect();
    trimmed.split_whitespace().take(NEEDLE_WORDS).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: Uuid, title: &str, similarity: f32, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: Uuid::new_v4(),
            document_id: doc,
            document_title: title.to_string(),
            document_url: format!("https://example.com/{title}"),
            source_type: "github".to_string(),
            text: text.to_string(),
            similarity,
        }
    }

    #[test]
    fn dedupes_by_document_keeping_highest_similarity() {
        let doc = Uuid::new_v4();
        let hits = vec![hit(doc, "Doc A", 0.5, "low"), hit(doc, "Doc A", 0.9, "high")];
        let citations = build_citations(&hits);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].excerpt, "high");
    }

    #[test]
    fn sorted_by_relevance_descending() {
        let hits = vec![
            hit(Uuid::new_v4(), "Low", 0.3, "low text"),
            hit(Uuid::new_v4(), "High", 0.95, "high text"),
        ];
        let citations = build_citations(&hits);
        assert_eq!(citations[0].title, "High");
        assert_eq!(citations[0].marker, 1);
        assert_eq!(citations[1].marker, 2);
    }

    #[test]
    fn excerpt_truncates_at_sentence_boundary() {
        let long = format!("{}. {}", "a".repeat(100), "trailing content that should be cut off entirely");
        let truncated = truncate_excerpt(&long);
        assert!(truncated.len() <= 150);
        assert!(truncated.ends_with('.'));
    }

    #[test]
    fn marker_injected_once_per_citation() {
        let doc = Uuid::new_v4();
        let citations = vec![Citation {
            marker: 1,
            document_id: doc,
            title: "T".into(),
            url: "u".into(),
            excerpt: "the refresh interval defaults to 3 minutes".into(),
        }];
        let response = "The refresh interval defaults to 3 minutes, as configured.";
        let marked = inject_markers(response, &citations);
        assert_eq!(marked.matches("[1]").count(), 1);
    }

    #[test]
    fn no_match_means_no_marker_injected() {
        let citations = vec![Citation {
            marker: 1,
            document_id: Uuid::new_v4(),
            title: "T".into(),
            url: "u".into(),
            excerpt: "completely unrelated excerpt text".into(),
        }];
        let response = "This response shares nothing with the excerpt.";
        let marked = inject_markers(response, &citations);
        assert!(!marked.contains("[1]"));
    }
}
