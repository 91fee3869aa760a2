//! Snippet deduplication and placement
//!
//! Remote snippets are free-form and frequently repeat each other across
//! overlapping batches. [`SnippetSet`] filters them as they arrive;
//! [`SnippetDeduplicator::locate`] then finds each survivor in the document,
//! first verbatim (ignoring case and whitespace runs) and then, for long
//! snippets, by the longest word prefix that still appears.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::config::RemoteConfig;
use crate::document::DocumentTree;
use crate::models::{MatchSpan, SourceKind};
use crate::walker::{DocumentTextWalker, TextLeaf};

/// Trim, lowercase and collapse whitespace runs to single spaces
pub fn normalize(snippet: &str) -> String {
    snippet
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn word_set(normalized: &str) -> HashSet<String> {
    normalized
        .split(' ')
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared words over the word count of the shorter snippet
fn word_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / shorter as f64
}

#[derive(Debug, Clone)]
pub struct SnippetDeduplicator {
    min_len: usize,
    overlap_threshold: f64,
    fuzzy_min_len: usize,
    fuzzy_prefix_ratio: f64,
}

impl Default for SnippetDeduplicator {
    fn default() -> Self {
        Self::new(&RemoteConfig::default())
    }
}

impl SnippetDeduplicator {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            min_len: config.min_snippet_len,
            overlap_threshold: config.overlap_threshold,
            fuzzy_min_len: config.fuzzy_min_len,
            fuzzy_prefix_ratio: config.fuzzy_prefix_ratio,
        }
    }

    /// Empty set applying this deduplicator's rules
    pub fn set(&self) -> SnippetSet {
        SnippetSet {
            min_len: self.min_len,
            overlap_threshold: self.overlap_threshold,
            kept: Vec::new(),
        }
    }

    /// Unique snippets in first-seen order, trimmed but otherwise as given
    pub fn dedupe(&self, snippets: &[String]) -> Vec<String> {
        let mut set = self.set();
        snippets
            .iter()
            .filter(|s| set.insert(s))
            .map(|s| s.trim().to_string())
            .collect()
    }

    /// Find a snippet in the document
    ///
    /// Text already inside highlight markers is not considered. Returns
    /// `None` when the snippet is not on the page, which is not an error.
    pub fn locate<D: DocumentTree + ?Sized>(&self, doc: &D, snippet: &str) -> Option<MatchSpan> {
        let words: Vec<&str> = snippet.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }

        let leaves: Vec<TextLeaf> = DocumentTextWalker::new(doc).skipping_markers().collect();

        if let Some(span) = find_word_sequence(&leaves, &words) {
            return Some(span);
        }

        if snippet.trim().chars().count() <= self.fuzzy_min_len || words.len() < 2 {
            return None;
        }

        let min_words = ((words.len() as f64) * self.fuzzy_prefix_ratio).ceil() as usize;
        for n in (min_words.max(1)..words.len()).rev() {
            if let Some(span) = find_word_sequence(&leaves, &words[..n]) {
                log::debug!(
                    "Placed snippet by {}/{} word prefix: {:?}",
                    n,
                    words.len(),
                    snippet
                );
                return Some(span);
            }
        }

        log::debug!("Snippet not found on page: {:?}", snippet);
        None
    }
}

fn word_sequence_regex(words: &[&str]) -> Option<Regex> {
    let pattern = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s+");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

fn find_word_sequence(leaves: &[TextLeaf], words: &[&str]) -> Option<MatchSpan> {
    let re = word_sequence_regex(words)?;
    leaves.iter().find_map(|leaf| {
        re.find(&leaf.text)
            .map(|m| MatchSpan::within_leaf(leaf.node, m.start(), m.end(), SourceKind::AiSnippet))
    })
}

/// Incrementally deduplicated snippets
///
/// A snippet is rejected if its normalized form is shorter than the minimum
/// length, equals a kept one, or shares more than the overlap threshold of
/// words with a kept one.
#[derive(Debug, Clone)]
pub struct SnippetSet {
    min_len: usize,
    overlap_threshold: f64,
    kept: Vec<(String, HashSet<String>)>,
}

impl SnippetSet {
    /// Returns `true` if the snippet is new
    pub fn insert(&mut self, snippet: &str) -> bool {
        let normalized = normalize(snippet);
        if normalized.chars().count() < self.min_len {
            return false;
        }
        if self.kept.iter().any(|(n, _)| *n == normalized) {
            return false;
        }

        let words = word_set(&normalized);
        if self
            .kept
            .iter()
            .any(|(_, kept)| word_overlap(&words, kept) > self.overlap_threshold)
        {
            return false;
        }

        self.kept.push((normalized, words));
        true
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
