//! In-memory arena implementation of [`DocumentTree`]
//!
//! Nodes live in a flat arena indexed by [`NodeId`]; removed nodes leave a
//! hole so stale handles resolve to `None` instead of aliasing new nodes.
//! Used by the test suite and the developer harness, and as the reference
//! for how a host binding is expected to split and re-merge text nodes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{
    ComputedStyle, DocumentTree, DomError, MarkerStyle, MutationEvent, MutationReceiver, NodeId,
    NodeKind,
};
use crate::models::TextPosition;
use crate::walker::floor_char_boundary;

const MARKER_TAG: &str = "mark";

#[derive(Debug, Clone)]
enum Content {
    Element {
        tag: String,
        style: ComputedStyle,
        marker: Option<MarkerStyle>,
    },
    Text {
        text: String,
        /// Created by splitting another text node during wrapping
        split_tail: bool,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    content: Content,
}

/// Serializable tree used to load documents from JSON
///
/// ```json
/// {"tag": "body", "children": [{"tag": "p", "children": [{"text": "Hello"}]}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotNode {
    Text {
        text: String,
    },
    Element {
        tag: String,
        /// Computed style; inherited values are not propagated on load
        #[serde(default)]
        style: ComputedStyle,
        #[serde(default)]
        children: Vec<SnapshotNode>,
    },
}

#[derive(Debug)]
pub struct MemoryDocument {
    nodes: Vec<Option<NodeData>>,
    root: NodeId,
    subscribers: Vec<mpsc::UnboundedSender<MutationEvent>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Empty document with a `<body>` root
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            subscribers: Vec::new(),
        };
        doc.root = doc.alloc(
            None,
            Content::Element {
                tag: "body".to_string(),
                style: ComputedStyle::default(),
                marker: None,
            },
        );
        doc
    }

    pub fn from_snapshot(snapshot: &SnapshotNode) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            subscribers: Vec::new(),
        };
        doc.root = doc.build(None, snapshot);
        doc
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: SnapshotNode =
            serde_json::from_str(json).context("Failed to parse document snapshot")?;
        Ok(Self::from_snapshot(&snapshot))
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> Result<NodeId, DomError> {
        self.append_styled(parent, tag, ComputedStyle::default())
    }

    pub fn append_styled(
        &mut self,
        parent: NodeId,
        tag: &str,
        style: ComputedStyle,
    ) -> Result<NodeId, DomError> {
        let id = self.attach(
            parent,
            Content::Element {
                tag: tag.to_string(),
                style,
                marker: None,
            },
        )?;
        self.notify(MutationEvent {
            added: vec![id],
            ..MutationEvent::default()
        });
        Ok(id)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, DomError> {
        let id = self.attach(
            parent,
            Content::Text {
                text: text.to_string(),
                split_tail: false,
            },
        )?;
        self.notify(MutationEvent {
            added: vec![id],
            removed: Vec::new(),
            added_text_len: text.chars().count(),
        });
        Ok(id)
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.content {
            Content::Text { text: current, .. } => {
                *current = text.to_string();
            }
            Content::Element { .. } => {
                return Err(DomError::InvalidRange(format!("{} is not a text node", node)));
            }
        }
        self.notify(MutationEvent {
            added: vec![node],
            removed: Vec::new(),
            added_text_len: text.chars().count(),
        });
        Ok(())
    }

    pub fn set_style(&mut self, node: NodeId, new_style: ComputedStyle) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.content {
            Content::Element { style, .. } => {
                *style = new_style;
                Ok(())
            }
            Content::Text { .. } => Err(DomError::InvalidRange(format!(
                "{} is a text node and has no style",
                node
            ))),
        }
    }

    /// Detach a node and drop its subtree
    pub fn remove(&mut self, node: NodeId) -> Result<(), DomError> {
        let parent = self.node(node)?.parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|c| *c != node);
        }
        self.free(node);
        self.notify(MutationEvent {
            removed: vec![node],
            ..MutationEvent::default()
        });
        Ok(())
    }

    /// All text in document order, hidden content included
    pub fn text_content(&self) -> String {
        self.leaf_texts().concat()
    }

    /// Every text node's content in document order
    pub fn leaf_texts(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.data(id) else { continue };
            match &data.content {
                Content::Text { text, .. } => out.push(text.clone()),
                Content::Element { .. } => stack.extend(data.children.iter().rev().copied()),
            }
        }
        out
    }

    pub fn marker_count(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .filter(|n| matches!(n.content, Content::Element { marker: Some(_), .. }))
            .count()
    }

    pub fn marker_style(&self, node: NodeId) -> Option<MarkerStyle> {
        match self.data(node)?.content {
            Content::Element { marker, .. } => marker,
            Content::Text { .. } => None,
        }
    }

    fn build(&mut self, parent: Option<NodeId>, snapshot: &SnapshotNode) -> NodeId {
        match snapshot {
            SnapshotNode::Text { text } => self.alloc(
                parent,
                Content::Text {
                    text: text.clone(),
                    split_tail: false,
                },
            ),
            SnapshotNode::Element {
                tag,
                style,
                children,
            } => {
                let id = self.alloc(
                    parent,
                    Content::Element {
                        tag: tag.clone(),
                        style: *style,
                        marker: None,
                    },
                );
                let child_ids: Vec<NodeId> =
                    children.iter().map(|c| self.build(Some(id), c)).collect();
                if let Some(data) = self.data_mut(id) {
                    data.children = child_ids;
                }
                id
            }
        }
    }

    fn alloc(&mut self, parent: Option<NodeId>, content: Content) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeData {
            parent,
            children: Vec::new(),
            content,
        }));
        id
    }

    fn attach(&mut self, parent: NodeId, content: Content) -> Result<NodeId, DomError> {
        if !matches!(self.node(parent)?.content, Content::Element { .. }) {
            return Err(DomError::InvalidRange(format!(
                "cannot append to text node {}",
                parent
            )));
        }
        let id = self.alloc(Some(parent), content);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn free(&mut self, id: NodeId) {
        let children = self.data(id).map(|d| d.children.clone()).unwrap_or_default();
        for child in children {
            self.free(child);
        }
        if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0 as usize).and_then(|n| n.as_ref())
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0 as usize).and_then(|n| n.as_mut())
    }

    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.data(id).ok_or(DomError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.data_mut(id).ok_or(DomError::StaleNode(id))
    }

    fn is_split_tail(&self, id: NodeId) -> bool {
        matches!(
            self.data(id).map(|d| &d.content),
            Some(Content::Text { split_tail: true, .. })
        )
    }

    /// Merge adjacent text siblings in `children[lo..hi]` into the first of each run
    fn merge_text_run(&mut self, parent: NodeId, lo: usize, mut hi: usize) -> Result<(), DomError> {
        let mut i = lo;
        while i + 1 < hi {
            let (a, b) = {
                let children = &self.node(parent)?.children;
                (children[i], children[i + 1])
            };
            let b_text = match (self.text(a), self.text(b)) {
                (Some(_), Some(b_text)) => b_text.to_string(),
                _ => {
                    i += 1;
                    continue;
                }
            };
            if let Content::Text { text, .. } = &mut self.node_mut(a)?.content {
                text.push_str(&b_text);
            }
            self.node_mut(parent)?.children.remove(i + 1);
            self.free(b);
            hi -= 1;
        }
        Ok(())
    }

    fn notify(&mut self, event: MutationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl DocumentTree for MemoryDocument {
    fn root(&self) -> NodeId {
        self.root
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.data(node).map(|d| d.children.clone()).unwrap_or_default()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.data(node).and_then(|d| d.parent)
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind<'_>> {
        self.data(node).map(|d| match &d.content {
            Content::Element { tag, .. } => NodeKind::Element { tag },
            Content::Text { text, .. } => NodeKind::Text(text),
        })
    }

    fn style(&self, node: NodeId) -> ComputedStyle {
        match self.data(node).map(|d| &d.content) {
            Some(Content::Element { style, .. }) => *style,
            _ => ComputedStyle::default(),
        }
    }

    fn is_marker(&self, node: NodeId) -> bool {
        self.marker_style(node).is_some()
    }

    fn wrap_text(
        &mut self,
        node: NodeId,
        start: usize,
        end: usize,
        style: MarkerStyle,
    ) -> Result<NodeId, DomError> {
        let data = self.node(node)?;
        let Content::Text { text, .. } = &data.content else {
            return Err(DomError::InvalidRange(format!("{} is not a text node", node)));
        };
        if start >= end
            || end > text.len()
            || !text.is_char_boundary(start)
            || !text.is_char_boundary(end)
        {
            return Err(DomError::OutOfBounds {
                node,
                start,
                end,
                len: text.len(),
            });
        }
        let parent = data
            .parent
            .ok_or_else(|| DomError::InvalidRange(format!("{} has no parent", node)))?;
        let middle = text[start..end].to_string();
        let tail = text[end..].to_string();
        let position = self
            .node(parent)?
            .children
            .iter()
            .position(|c| *c == node)
            .ok_or(DomError::StaleNode(node))?;

        if let Content::Text { text, .. } = &mut self.node_mut(node)?.content {
            text.truncate(start);
        }
        let marker = self.alloc(
            Some(parent),
            Content::Element {
                tag: MARKER_TAG.to_string(),
                style: ComputedStyle::default(),
                marker: Some(style),
            },
        );
        let inner = self.alloc(
            Some(marker),
            Content::Text {
                text: middle,
                split_tail: false,
            },
        );
        self.node_mut(marker)?.children.push(inner);
        let tail_id = self.alloc(
            Some(parent),
            Content::Text {
                text: tail,
                split_tail: true,
            },
        );
        self.node_mut(parent)?
            .children
            .splice(position + 1..position + 1, [marker, tail_id]);
        Ok(marker)
    }

    fn extract_and_wrap(
        &mut self,
        start: TextPosition,
        end: TextPosition,
        style: MarkerStyle,
    ) -> Result<NodeId, DomError> {
        if start.node != end.node {
            return Err(DomError::InvalidRange(
                "range spans more than one text node".to_string(),
            ));
        }
        let text = self
            .text(start.node)
            .ok_or(DomError::StaleNode(start.node))?;
        let len = text.len();
        let s = floor_char_boundary(text, start.offset.min(len));
        let e = floor_char_boundary(text, end.offset.min(len));
        if s >= e {
            return Err(DomError::InvalidRange(format!(
                "range {}..{} is empty in {} after re-resolving",
                start.offset, end.offset, start.node
            )));
        }
        self.wrap_text(start.node, s, e, style)
    }

    fn set_marker_style(&mut self, marker: NodeId, new_style: MarkerStyle) -> Result<(), DomError> {
        match &mut self.node_mut(marker)?.content {
            Content::Element {
                marker: Some(style),
                ..
            } => {
                *style = new_style;
                Ok(())
            }
            _ => Err(DomError::NotAMarker(marker)),
        }
    }

    fn unwrap_marker(&mut self, marker: NodeId) -> Result<(), DomError> {
        let data = self.node(marker)?;
        if !matches!(data.content, Content::Element { marker: Some(_), .. }) {
            return Err(DomError::NotAMarker(marker));
        }
        let parent = data
            .parent
            .ok_or_else(|| DomError::InvalidRange(format!("{} has no parent", marker)))?;
        let moved = data.children.clone();
        let idx = self
            .node(parent)?
            .children
            .iter()
            .position(|c| *c == marker)
            .ok_or(DomError::StaleNode(marker))?;

        for child in &moved {
            if let Some(d) = self.data_mut(*child) {
                d.parent = Some(parent);
            }
        }
        self.node_mut(parent)?
            .children
            .splice(idx..=idx, moved.iter().copied());
        if let Some(slot) = self.nodes.get_mut(marker.0 as usize) {
            *slot = None;
        }

        // The prefix always sits right before the marker; a tail is only
        // merged back if wrapping created it.
        let children = self.node(parent)?.children.clone();
        let lo = if idx > 0 && self.text(children[idx - 1]).is_some() {
            idx - 1
        } else {
            idx
        };
        let mut hi = idx + moved.len();
        if let Some(next) = children.get(hi) {
            if self.is_split_tail(*next) {
                hi += 1;
            }
        }
        self.merge_text_run(parent, lo, hi)
    }

    fn subscribe(&mut self) -> MutationReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }
}
