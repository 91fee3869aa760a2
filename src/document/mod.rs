//! Document tree collaborator
//!
//! The engine never owns the page. It sees nodes only through opaque
//! [`NodeId`] handles and asks a [`DocumentTree`] implementation to traverse
//! them, report computed visibility, and add or remove highlight markers.
//! Structural changes made by the host are delivered over a channel from
//! [`DocumentTree::subscribe`]; marker insertions made through this trait are
//! not reported.

pub mod memory;

pub use memory::{MemoryDocument, SnapshotNode};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{ColorSlot, SourceKind, TextPosition};

/// Opaque handle to a node in the host tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    Element { tag: &'a str },
    Text(&'a str),
}

/// Computed rendering state of an element
///
/// Values are resolved the way a browser resolves them, so an inherited
/// property such as `visibility` already reflects the element's ancestors
/// unless the element overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComputedStyle {
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f32,
    /// Laid out with zero width or height
    pub zero_size: bool,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display_none: false,
            visibility_hidden: false,
            opacity: 1.0,
            zero_size: false,
        }
    }
}

impl ComputedStyle {
    pub fn hidden() -> Self {
        Self {
            display_none: true,
            ..Self::default()
        }
    }

    pub fn is_rendered(&self) -> bool {
        !self.display_none && !self.visibility_hidden && !self.zero_size && self.opacity > 0.0
    }

    /// Nothing below this element can render, whatever its own style says
    pub fn hides_subtree(&self) -> bool {
        self.display_none || self.opacity <= 0.0
    }
}

/// Visual treatment applied to a highlight marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStyle {
    pub color: ColorSlot,
    /// Marker of the currently selected match
    pub current: bool,
    pub kind: SourceKind,
}

/// Structural change notification from the host tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationEvent {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Characters of text introduced by the added nodes
    pub added_text_len: usize,
}

pub type MutationReceiver = mpsc::UnboundedReceiver<MutationEvent>;

/// Elements whose text is never page content
pub const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "meta", "link", "title", "iframe",
    "object", "embed", "canvas", "svg",
];

pub fn is_non_content_tag(tag: &str) -> bool {
    NON_CONTENT_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0} no longer exists")]
    StaleNode(NodeId),

    #[error("range {start}..{end} is outside text node {node} (length {len})")]
    OutOfBounds {
        node: NodeId,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("node {0} is not a highlight marker")]
    NotAMarker(NodeId),

    #[error("range cannot be wrapped: {0}")]
    InvalidRange(String),
}

/// Operations the engine needs from the host tree
pub trait DocumentTree {
    fn root(&self) -> NodeId;

    /// Children in document order
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// `None` when the handle is stale
    fn kind(&self, node: NodeId) -> Option<NodeKind<'_>>;

    /// Computed style of an element (text nodes report the default style)
    fn style(&self, node: NodeId) -> ComputedStyle;

    fn is_marker(&self, node: NodeId) -> bool;

    /// Surround `[start, end)` of a text node with a new marker element
    ///
    /// The text node keeps `[0, start)`, so offsets below `start` remain valid.
    fn wrap_text(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        style: MarkerStyle,
    ) -> Result<NodeId, DomError>;

    /// Fallback for ranges that no longer fit their node: re-resolve the range
    /// against the node's current content and wrap whatever it now covers
    fn extract_and_wrap(
        &mut self,
        start: TextPosition,
        end: TextPosition,
        style: MarkerStyle,
    ) -> Result<NodeId, DomError>;

    fn set_marker_style(&mut self, marker: NodeId, style: MarkerStyle) -> Result<(), DomError>;

    /// Remove a marker, putting its text back where it was
    fn unwrap_marker(&mut self, marker: NodeId) -> Result<(), DomError>;

    /// Receive notifications about host-made structural changes
    fn subscribe(&mut self) -> MutationReceiver;

    fn text(&self, node: NodeId) -> Option<&str> {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => Some(text),
            _ => None,
        }
    }

    fn contains(&self, node: NodeId) -> bool {
        self.kind(node).is_some()
    }

    /// Whether `node` can still be reached from the root
    fn is_attached(&self, node: NodeId) -> bool {
        let root = self.root();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == root {
                return true;
            }
            if !self.contains(id) {
                return false;
            }
            current = self.parent(id);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_content_tags_case_insensitive() {
        assert!(is_non_content_tag("SCRIPT"));
        assert!(is_non_content_tag("style"));
        assert!(!is_non_content_tag("p"));
    }

    #[test]
    fn test_computed_style_rendered() {
        assert!(ComputedStyle::default().is_rendered());
        assert!(!ComputedStyle::hidden().is_rendered());
        let transparent = ComputedStyle {
            opacity: 0.0,
            ..ComputedStyle::default()
        };
        assert!(!transparent.is_rendered());
        assert!(transparent.hides_subtree());

        let invisible = ComputedStyle {
            visibility_hidden: true,
            ..ComputedStyle::default()
        };
        assert!(!invisible.is_rendered());
        assert!(!invisible.hides_subtree());
    }

    #[test]
    fn test_style_deserializes_with_defaults() {
        let style: ComputedStyle = serde_json::from_str(r#"{"visibilityHidden":true}"#).unwrap();
        assert!(style.visibility_hidden);
        assert_eq!(style.opacity, 1.0);
    }
}
