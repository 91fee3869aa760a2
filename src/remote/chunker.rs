//! Page text chunking for remote search
//!
//! Splits extracted page text into at most `max_chunks` overlapping batches.
//! Each cut is placed at the last natural boundary found in the final 30% of
//! the window: a blank line, then a line break, then a sentence end, then any
//! whitespace, and only then the raw size limit.

use crate::config::RemoteConfig;
use crate::models::Batch;
use crate::walker::{ceil_char_boundary, floor_char_boundary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Upper bound on one batch, in bytes of UTF-8 text
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_chunks: usize,
    /// Forced advance when overlap would not move past the previous start
    pub min_advance: usize,
}

impl From<&RemoteConfig> for ChunkConfig {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
            max_chunks: config.max_chunks,
            min_advance: config.min_advance,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::from(&RemoteConfig::default())
    }
}

/// Boundaries are only searched for past this share of the window
const MIN_CUT_RATIO_NUM: usize = 7;
const MIN_CUT_RATIO_DEN: usize = 10;

pub fn create_batches(text: &str, config: &ChunkConfig) -> Vec<Batch> {
    let mut batches = Vec::new();
    if text.is_empty() || config.max_chunks == 0 {
        return batches;
    }

    let chunk_size = config.chunk_size.max(1);
    let mut start = 0;

    while start < text.len() && batches.len() < config.max_chunks {
        let mut hard_end = floor_char_boundary(text, start.saturating_add(chunk_size));
        if hard_end <= start {
            // Window smaller than one char
            hard_end = ceil_char_boundary(text, start + 1);
        }

        let end = if hard_end >= text.len() {
            text.len()
        } else {
            choose_cut(text, start, hard_end)
        };

        batches.push(Batch {
            text: text[start..end].to_string(),
            start_offset: start,
            ordinal: batches.len(),
        });

        if end >= text.len() {
            break;
        }

        let mut next = floor_char_boundary(text, end.saturating_sub(config.overlap));
        if next <= start {
            next = ceil_char_boundary(text, start.saturating_add(config.min_advance.max(1)).min(end));
        }
        if next <= start {
            next = end;
        }
        start = next;
    }

    if let Some(last) = batches.last() {
        if last.end_offset() < text.len() {
            log::warn!(
                "Page text truncated to {} batches ({} of {} bytes covered)",
                batches.len(),
                last.end_offset(),
                text.len()
            );
        }
    }

    batches
}

/// End offset for a window `[start, hard_end)` that does not reach the end of `text`
fn choose_cut(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];
    let min_cut = floor_char_boundary(
        window,
        window.len() * MIN_CUT_RATIO_NUM / MIN_CUT_RATIO_DEN,
    );
    let tail = &window[min_cut..];

    let cut = tail
        .rfind("\n\n")
        .map(|pos| pos + 2)
        .or_else(|| tail.rfind('\n').map(|pos| pos + 1))
        .or_else(|| last_sentence_end(tail))
        .or_else(|| {
            tail.char_indices()
                .filter(|(_, c)| c.is_whitespace())
                .last()
                .map(|(pos, c)| pos + c.len_utf8())
        });

    match cut {
        Some(offset) if min_cut + offset > 0 => start + min_cut + offset,
        _ => hard_end,
    }
}

/// Offset just past the last `.`, `!` or `?` that is followed by whitespace
fn last_sentence_end(text: &str) -> Option<usize> {
    let mut last = None;
    let mut prev: Option<char> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            last = Some(i + c.len_utf8());
        }
        prev = Some(c);
    }
    last
}
