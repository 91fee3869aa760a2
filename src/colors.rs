//! Color slot assignment
//!
//! Each distinct term or pattern of a search gets a slot in a small fixed
//! palette, cycling once the palette runs out. Repeated terms share a slot,
//! and terms that differ only by case share one too unless the search is
//! case-sensitive.

use std::collections::HashMap;

use crate::models::{ColorSlot, MatchSpan};

/// Largest palette a host is expected to style
pub const MAX_PALETTE: u8 = 5;

#[derive(Debug, Clone, Copy)]
pub struct ColorAssigner {
    palette_size: u8,
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self::new(MAX_PALETTE)
    }
}

impl ColorAssigner {
    pub fn new(palette_size: u8) -> Self {
        Self {
            palette_size: palette_size.clamp(1, MAX_PALETTE),
        }
    }

    /// Slots for the given terms, indexed like the terms themselves
    pub fn assign<S: AsRef<str>>(&self, terms: &[S], case_sensitive: bool) -> ColorAssignment {
        let mut distinct: HashMap<String, u8> = HashMap::new();
        let mut slots = Vec::with_capacity(terms.len());

        for term in terms {
            let key = if case_sensitive {
                term.as_ref().to_string()
            } else {
                term.as_ref().to_lowercase()
            };
            let next = (distinct.len() % self.palette_size as usize) as u8;
            let ordinal = *distinct.entry(key).or_insert(next);
            slots.push(ColorSlot(ordinal));
        }

        ColorAssignment { slots }
    }
}

/// Result of [`ColorAssigner::assign`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorAssignment {
    slots: Vec<ColorSlot>,
}

impl ColorAssignment {
    /// Everything in the first slot (single-term, single-regex and AI results)
    pub fn uniform() -> Self {
        Self::default()
    }

    pub fn slot_for_index(&self, index: Option<usize>) -> ColorSlot {
        index
            .and_then(|i| self.slots.get(i).copied())
            .unwrap_or_default()
    }

    pub fn slot_for(&self, span: &MatchSpan) -> ColorSlot {
        self.slot_for_index(span.source_pattern_index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeId;
    use crate::models::SourceKind;

    #[test]
    fn test_slots_cycle_through_palette() {
        let assigner = ColorAssigner::new(3);
        let terms = ["a", "b", "c", "d", "e"];
        let assignment = assigner.assign(&terms, false);
        let slots: Vec<u8> = (0..5).map(|i| assignment.slot_for_index(Some(i)).0).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_repeated_terms_share_slot() {
        let assignment = ColorAssigner::default().assign(&["cat", "dog", "CAT"], false);
        assert_eq!(assignment.slot_for_index(Some(2)), ColorSlot(0));
        assert_eq!(assignment.slot_for_index(Some(1)), ColorSlot(1));
    }

    #[test]
    fn test_case_sensitive_terms_are_distinct() {
        let assignment = ColorAssigner::default().assign(&["cat", "CAT"], true);
        assert_eq!(assignment.slot_for_index(Some(1)), ColorSlot(1));
    }

    #[test]
    fn test_deterministic() {
        let assigner = ColorAssigner::default();
        let terms = ["x", "y", "z"];
        assert_eq!(assigner.assign(&terms, false), assigner.assign(&terms, false));
    }

    #[test]
    fn test_untagged_spans_use_first_slot() {
        let assignment = ColorAssigner::default().assign(&["a", "b"], false);
        let span = MatchSpan::within_leaf(NodeId(1), 0, 1, SourceKind::AiSnippet);
        assert_eq!(assignment.slot_for(&span), ColorSlot(0));
        let tagged = span.with_pattern_index(Some(1));
        assert_eq!(assignment.slot_for(&tagged), ColorSlot(1));
    }

    #[test]
    fn test_palette_size_is_clamped() {
        let assignment = ColorAssigner::new(0).assign(&["a", "b"], false);
        assert_eq!(assignment.slot_for_index(Some(1)), ColorSlot(0));
    }
}
