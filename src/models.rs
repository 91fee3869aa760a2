//! Core data models for pagelight
//!
//! These records are shared by the matcher, the renderer and the remote
//! orchestrator. Nodes are only ever referenced through [`NodeId`] handles.

use serde::{Deserialize, Serialize};

use crate::document::NodeId;

/// A position inside a text leaf
///
/// `offset` is a byte offset into the leaf's UTF-8 text and always falls on
/// a char boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPosition {
    pub node: NodeId,
    pub offset: usize,
}

impl TextPosition {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// How a span was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Literal,
    Regex,
    AiSnippet,
}

/// A located occurrence in the text tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSpan {
    pub start: TextPosition,
    pub end: TextPosition,
    /// Index of the term/pattern that produced this span (multi-term and multi-regex modes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_pattern_index: Option<usize>,
    pub source_kind: SourceKind,
    /// Identifier of the remote snippet this span was placed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<String>,
}

impl MatchSpan {
    /// Span covering `[start, end)` of a single text leaf
    pub fn within_leaf(node: NodeId, start: usize, end: usize, source_kind: SourceKind) -> Self {
        Self {
            start: TextPosition::new(node, start),
            end: TextPosition::new(node, end),
            source_pattern_index: None,
            source_kind,
            snippet_id: None,
        }
    }

    pub fn with_pattern_index(mut self, index: Option<usize>) -> Self {
        self.source_pattern_index = index;
        self
    }

    pub fn with_snippet_id(mut self, id: impl Into<String>) -> Self {
        self.snippet_id = Some(id.into());
        self
    }

    pub fn is_single_leaf(&self) -> bool {
        self.start.node == self.end.node
    }

    /// Byte length for single-leaf spans, `None` when the span crosses leaves
    pub fn byte_len(&self) -> Option<usize> {
        self.is_single_leaf()
            .then(|| self.end.offset.saturating_sub(self.start.offset))
    }
}

/// Per-search mode settings, owned by the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub multi_term: bool,
    #[serde(default)]
    pub ai_mode: bool,
    /// Upgrade keyword queries ("email", "phone numbers") to canned patterns
    #[serde(default = "default_detect_patterns")]
    pub detect_patterns: bool,
}

fn default_detect_patterns() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            use_regex: false,
            multi_term: false,
            ai_mode: false,
            detect_patterns: true,
        }
    }
}

/// Rendering group for a term or pattern (0-based, below the palette size)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorSlot(pub u8);

/// Identity of a text leaf: where it sits in the tree and what it contains
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint {
    /// Ancestor chain from the root down to the leaf
    pub path: Vec<NodeId>,
    pub content_hash: blake3::Hash,
}

impl ContentFingerprint {
    pub fn new(path: &[NodeId], text: &str) -> Self {
        Self {
            path: path.to_vec(),
            content_hash: blake3::hash(text.as_bytes()),
        }
    }
}

/// A bounded slice of page text sent to the remote matcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub text: String,
    /// Byte offset of `text` within the extracted page text
    pub start_offset: usize,
    pub ordinal: usize,
}

impl Batch {
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.text.len()
    }
}

/// One issued remote call, kept until the search finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTokenConsumption {
    pub batch_ordinal: usize,
    pub snippet_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_byte_len() {
        let span = MatchSpan::within_leaf(NodeId(3), 4, 9, SourceKind::Literal);
        assert_eq!(span.byte_len(), Some(5));
        assert!(span.is_single_leaf());
    }

    #[test]
    fn test_cross_leaf_span_has_no_len() {
        let span = MatchSpan {
            start: TextPosition::new(NodeId(1), 2),
            end: TextPosition::new(NodeId(2), 1),
            source_pattern_index: None,
            source_kind: SourceKind::AiSnippet,
            snippet_id: None,
        };
        assert_eq!(span.byte_len(), None);
    }

    #[test]
    fn test_settings_defaults_from_json() {
        let settings: Settings = serde_json::from_str(r#"{"useRegex":true}"#).unwrap();
        assert!(settings.use_regex);
        assert!(!settings.case_sensitive);
        assert!(settings.detect_patterns);
    }

    #[test]
    fn test_fingerprint_depends_on_path_and_text() {
        let a = ContentFingerprint::new(&[NodeId(0), NodeId(1)], "hello");
        let b = ContentFingerprint::new(&[NodeId(0), NodeId(2)], "hello");
        let c = ContentFingerprint::new(&[NodeId(0), NodeId(1)], "hello!");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ContentFingerprint::new(&[NodeId(0), NodeId(1)], "hello"));
    }

    #[test]
    fn test_span_serializes_camel_case() {
        let span = MatchSpan::within_leaf(NodeId(1), 0, 3, SourceKind::AiSnippet)
            .with_snippet_id("b0-s1");
        let json = serde_json::to_string(&span).unwrap();
        assert!(json.contains(r#""sourceKind":"ai-snippet""#));
        assert!(json.contains(r#""snippetId":"b0-s1""#));
        assert!(!json.contains("sourcePatternIndex"));
    }
}
