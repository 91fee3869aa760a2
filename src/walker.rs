//! Visible text leaf traversal
//!
//! A [`DocumentTextWalker`] yields the text-bearing leaves of a document in
//! document order, skipping anything that is not rendered or not content.
//! Walkers hold no state beyond their own stack: a fresh walker always starts
//! from the root.

use crate::document::{DocumentTree, NodeId, NodeKind, is_non_content_tag};
use crate::models::ContentFingerprint;

/// A visible text leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLeaf {
    pub node: NodeId,
    pub text: String,
    /// Ancestors from the root down, ending with the leaf itself
    pub path: Vec<NodeId>,
}

impl TextLeaf {
    pub fn fingerprint(&self) -> ContentFingerprint {
        ContentFingerprint::new(&self.path, &self.text)
    }
}

struct Pending {
    node: NodeId,
    ancestors: Vec<NodeId>,
    /// Nearest element above `node`
    element: Option<NodeId>,
}

pub struct DocumentTextWalker<'a, D: DocumentTree + ?Sized> {
    doc: &'a D,
    stack: Vec<Pending>,
    skip_markers: bool,
}

impl<'a, D: DocumentTree + ?Sized> DocumentTextWalker<'a, D> {
    pub fn new(doc: &'a D) -> Self {
        Self {
            doc,
            stack: vec![Pending {
                node: doc.root(),
                ancestors: Vec::new(),
                element: None,
            }],
            skip_markers: false,
        }
    }

    /// Do not descend into highlight markers (their text is already matched)
    pub fn skipping_markers(mut self) -> Self {
        self.skip_markers = true;
        self
    }

    pub fn next_leaf(&mut self) -> Option<TextLeaf> {
        while let Some(Pending {
            node,
            mut ancestors,
            element,
        }) = self.stack.pop()
        {
            match self.doc.kind(node) {
                Some(NodeKind::Text(text)) => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    // A leaf renders exactly when its own element does
                    if element.is_some_and(|e| !self.doc.style(e).is_rendered()) {
                        continue;
                    }
                    ancestors.push(node);
                    return Some(TextLeaf {
                        node,
                        text: text.to_string(),
                        path: ancestors,
                    });
                }
                Some(NodeKind::Element { tag }) => {
                    if !self.should_descend(node, tag) {
                        continue;
                    }
                    ancestors.push(node);
                    for child in self.doc.children(node).into_iter().rev() {
                        self.stack.push(Pending {
                            node: child,
                            ancestors: ancestors.clone(),
                            element: Some(node),
                        });
                    }
                }
                // Stale handle; the host removed it mid-walk
                None => continue,
            }
        }
        None
    }

    /// Visibility is judged per leaf; only subtree-hiding styles prune here
    fn should_descend(&self, node: NodeId, tag: &str) -> bool {
        if is_non_content_tag(tag) {
            return false;
        }
        if self.skip_markers && self.doc.is_marker(node) {
            return false;
        }
        !self.doc.style(node).hides_subtree()
    }
}

impl<D: DocumentTree + ?Sized> Iterator for DocumentTextWalker<'_, D> {
    type Item = TextLeaf;

    fn next(&mut self) -> Option<TextLeaf> {
        self.next_leaf()
    }
}

/// Visible page text, one leaf per line, as sent to the remote matcher
pub fn collect_page_text<D: DocumentTree + ?Sized>(doc: &D) -> String {
    DocumentTextWalker::new(doc)
        .map(|leaf| leaf.text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Largest char boundary `<= index`
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= index`
pub(crate) fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
