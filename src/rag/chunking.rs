//! Document chunking (§4.5 "Chunking contract").

use crate::config::ChunkingConfig;

const SLIDING_WINDOW_THRESHOLD: usize = 10_000;
const BREAK_SEARCH_WINDOW: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub index: u32,
    pub text: String,
    pub start_offset: u32,
    pub end_offset: u32,
}

pub fn chunk_document(content: &str, config: &ChunkingConfig) -> Vec<RawChunk> {
    if content.is_empty() {
        return Vec::new();
    }

    let use_sliding_window_directly = content.chars().count() > SLIDING_WINDOW_THRESHOLD;

    let pieces: Vec<&str> = if config.preserve_paragraphs && !use_sliding_window_directly {
        content.split("\n\n").filter(|p| !p.trim().is_empty()).collect()
    } else {
        vec![content]
    };

    let mut chunks = Vec::new();
    let mut cursor: usize = 0;
    let mut index: u32 = 0;

    for piece in pieces {
        let piece_start = cursor;
        if piece.chars().count() <= config.max_chunk_size {
            chunks.push(RawChunk {
                index,
                text: piece.to_string(),
                start_offset: piece_start as u32,
                end_offset: (piece_start + piece.chars().count()) as u32,
            });
            index += 1;
        } else {
            let sub = sliding_window(piece, config);
            for (text, start, end) in sub {
                chunks.push(RawChunk {
                    index,
                    text,
                    start_offset: (piece_start + start) as u32,
                    end_offset: (piece_start + end) as u32,
                });
                index += 1;
            }
        }
        cursor = piece_start + piece.chars().count() + 2; // account for the "\n\n" separator
    }

    chunks
}

/// Splits `text` into overlapping windows, preferring a sentence/newline/space
/// break within the last `BREAK_SEARCH_WINDOW` characters of each window.
fn sliding_window(text: &str, config: &ChunkingConfig) -> Vec<(String, usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = (start + config.max_chunk_size).min(len);
        if end < len {
            if let Some(break_at) = find_break_point(&chars, start, end) {
                end = break_at;
            }
        }
        let slice: String = chars[start..end].iter().collect();
        windows.push((slice, start, end));

        if end >= len {
            break;
        }
        let next_start = end.saturating_sub(config.overlap_size);
        start = if next_start > start { next_start } else { end };
    }

    windows
}

fn find_break_point(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let search_from = end.saturating_sub(BREAK_SEARCH_WINDOW).max(start);
    let window: String = chars[search_from..end].iter().collect();

    if let Some(pos) = window.rfind(". ") {
        return Some(search_from + window[..pos].chars().count() + 2);
    }
    if let Some(pos) = window.rfind('\n') {
        return Some(search_from + window[..pos].chars().count() + 1);
    }
    if let Some(pos) = window.rfind(' ') {
        return Some(search_from + window[..pos].chars().count() + 1);
    }
    None
}
