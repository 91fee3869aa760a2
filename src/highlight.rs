//! Highlight rendering
//!
//! Wraps match spans in marker elements through the [`DocumentTree`]
//! collaborator, in fixed-size batches with a cooperative yield after each
//! batch. Markers are tracked in creation order and removed in reverse, which
//! lets the host merge split text nodes back into their original form.
//!
//! Spans within one text node are painted from the highest start offset down:
//! wrapping splits the node and keeps only the text before the wrapped range,
//! so lower offsets stay valid.

use std::cmp::Reverse;

use crate::colors::ColorAssignment;
use crate::config::HighlightConfig;
use crate::document::{DocumentTree, DomError, MarkerStyle, NodeId};
use crate::models::MatchSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MarkerRecord {
    marker: NodeId,
    /// Index of the span in the session's match list
    span_index: usize,
    style: MarkerStyle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaintReport {
    pub painted: usize,
    /// Painted spans whose range had to be re-resolved; their marker may
    /// cover less than the matched text
    pub partial: usize,
    /// Spans that could not be wrapped even after the fallback
    pub skipped: usize,
    /// Spans dropped because the highlight ceiling was reached
    pub truncated: usize,
}

#[derive(Debug)]
pub struct HighlightRenderer {
    batch_size: usize,
    max_highlights: usize,
    markers: Vec<MarkerRecord>,
    current: Option<usize>,
}

impl Default for HighlightRenderer {
    fn default() -> Self {
        Self::new(&HighlightConfig::default())
    }
}

impl HighlightRenderer {
    pub fn new(config: &HighlightConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_highlights: config.max_highlights,
            markers: Vec::new(),
            current: None,
        }
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn marker_for(&self, span_index: usize) -> Option<NodeId> {
        self.markers
            .iter()
            .find(|r| r.span_index == span_index)
            .map(|r| r.marker)
    }

    /// Replace all highlights with `spans`
    pub async fn paint<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        spans: &[MatchSpan],
        current: Option<usize>,
        colors: &ColorAssignment,
    ) -> PaintReport {
        self.clear(doc).await;
        self.current = current;
        let report = self.wrap_spans(doc, spans, 0, colors).await;
        log::debug!(
            "Painted {} marker(s) ({} partial, {} skipped, {} over limit)",
            report.painted,
            report.partial,
            report.skipped,
            report.truncated
        );
        report
    }

    /// Paint more spans without touching existing markers
    ///
    /// `first_index` is the match-list index of `spans[0]`.
    pub async fn add_spans<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        spans: &[MatchSpan],
        first_index: usize,
        colors: &ColorAssignment,
    ) -> PaintReport {
        self.wrap_spans(doc, spans, first_index, colors).await
    }

    /// Remove every marker, restoring the original text nodes
    pub async fn clear<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) {
        let markers = std::mem::take(&mut self.markers);
        self.current = None;
        if markers.is_empty() {
            return;
        }

        for (n, record) in markers.iter().rev().enumerate() {
            if let Err(e) = doc.unwrap_marker(record.marker) {
                // The host may have removed the marker's subtree itself
                log::debug!("Skipping marker {}: {}", record.marker, e);
            }
            if (n + 1) % self.batch_size == 0 {
                tokio::task::yield_now().await;
            }
        }
        log::debug!("Cleared {} marker(s)", markers.len());
    }

    /// Span indices whose marker is no longer on the page
    pub fn detached_spans<D: DocumentTree + ?Sized>(&self, doc: &D) -> Vec<usize> {
        self.markers
            .iter()
            .filter(|r| !doc.is_attached(r.marker))
            .map(|r| r.span_index)
            .collect()
    }

    /// Follow a shrink of the match list
    ///
    /// `remap[i]` is the new index of span `i`, or `None` if the span was
    /// dropped. Markers of dropped spans are unwrapped if still on the page.
    pub fn retain_spans<D: DocumentTree + ?Sized>(&mut self, doc: &mut D, remap: &[Option<usize>]) {
        let before = self.markers.len();
        self.markers.retain_mut(|record| {
            match remap.get(record.span_index).copied().flatten() {
                Some(index) => {
                    record.span_index = index;
                    true
                }
                None => {
                    if doc.is_attached(record.marker) {
                        if let Err(e) = doc.unwrap_marker(record.marker) {
                            log::debug!("Skipping marker {}: {}", record.marker, e);
                        }
                    }
                    false
                }
            }
        });
        self.current = self.current.and_then(|i| remap.get(i).copied().flatten());
        log::debug!("Dropped {} marker(s) of removed spans", before - self.markers.len());
    }

    /// Move the current-match emphasis to another span
    pub fn set_current<D: DocumentTree + ?Sized>(&mut self, doc: &mut D, index: Option<usize>) {
        if self.current == index {
            return;
        }
        let previous = self.current;
        self.current = index;

        for record in self.markers.iter_mut() {
            let is_current = Some(record.span_index) == index;
            let was_current = Some(record.span_index) == previous;
            if is_current == was_current {
                continue;
            }
            record.style.current = is_current;
            if let Err(e) = doc.set_marker_style(record.marker, record.style) {
                log::debug!("Failed to restyle marker {}: {}", record.marker, e);
            }
        }
    }

    async fn wrap_spans<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        spans: &[MatchSpan],
        first_index: usize,
        colors: &ColorAssignment,
    ) -> PaintReport {
        let mut report = PaintReport::default();

        let room = self.max_highlights.saturating_sub(self.markers.len());
        let accepted = spans.len().min(room);
        report.truncated = spans.len() - accepted;
        if report.truncated > 0 {
            log::info!(
                "Highlight limit of {} reached, {} span(s) not painted",
                self.max_highlights,
                report.truncated
            );
        }

        let mut order: Vec<usize> = (0..accepted).collect();
        order.sort_by_key(|&i| (spans[i].start.node, Reverse(spans[i].start.offset)));

        for batch in order.chunks(self.batch_size) {
            for &i in batch {
                let span = &spans[i];
                let span_index = first_index + i;
                let style = MarkerStyle {
                    color: colors.slot_for(span),
                    current: self.current == Some(span_index),
                    kind: span.source_kind,
                };
                match wrap_span(doc, span, style) {
                    Ok((marker, exact)) => {
                        self.markers.push(MarkerRecord {
                            marker,
                            span_index,
                            style,
                        });
                        report.painted += 1;
                        if !exact {
                            report.partial += 1;
                        }
                    }
                    Err(e) => {
                        log::warn!("Could not highlight span {}: {}", span_index, e);
                        report.skipped += 1;
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        report
    }
}

/// Wrap in place, or re-resolve the range if the node changed since the scan
///
/// The flag is false when the fallback was taken.
fn wrap_span<D: DocumentTree + ?Sized>(
    doc: &mut D,
    span: &MatchSpan,
    style: MarkerStyle,
) -> Result<(NodeId, bool), DomError> {
    if span.is_single_leaf() {
        match doc.wrap_text(span.start.node, span.start.offset, span.end.offset, style) {
            Ok(marker) => return Ok((marker, true)),
            Err(e) => log::debug!("In-place wrap failed, extracting instead: {}", e),
        }
    }
    doc.extract_and_wrap(span.start, span.end, style)
        .map(|marker| (marker, false))
}
