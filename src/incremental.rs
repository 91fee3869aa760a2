//! Incremental re-scanning of content added after a search
//!
//! When a search commits, every visible leaf is fingerprinted (its ancestor
//! chain plus a hash of its text). Later change notifications only cause leaves with an
//! unknown fingerprint to be matched, so the cost of a re-scan follows the
//! amount of new content rather than the size of the page.
//!
//! Notifications are coalesced by [`MutationDebouncer`]: nothing fires until
//! the tree has been quiet for the configured period and either enough new
//! text has accumulated or nodes were removed.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{IncrementalConfig, SearchConfig};
use crate::document::{DocumentTree, MutationEvent, MutationReceiver};
use crate::error::SearchError;
use crate::matcher::{CompiledPattern, SearchMode, compile_patterns};
use crate::models::{ContentFingerprint, MatchSpan};
use crate::walker::DocumentTextWalker;

#[derive(Debug, Clone)]
pub struct IncrementalMatcher {
    seen: HashSet<ContentFingerprint>,
    patterns: Vec<CompiledPattern>,
    cap: usize,
    progress_interval: usize,
    primary_in_flight: bool,
    ai_results_displayed: bool,
}

impl Default for IncrementalMatcher {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl IncrementalMatcher {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            seen: HashSet::new(),
            patterns: Vec::new(),
            cap: usize::MAX,
            progress_interval: config.progress_interval.max(1),
            primary_in_flight: false,
            ai_results_displayed: false,
        }
    }

    /// Snapshot the document at the start of a primary search
    pub fn begin<D: DocumentTree + ?Sized>(&mut self, doc: &D) {
        self.reset();
        self.primary_in_flight = true;
        self.absorb(doc);
    }

    /// The primary search committed (or was abandoned)
    pub fn finish_primary(&mut self) {
        self.primary_in_flight = false;
    }

    /// Match future leaves against `mode`
    ///
    /// `cap` bounds the total number of spans the session may hold.
    pub fn set_mode(
        &mut self,
        mode: &SearchMode,
        case_sensitive: bool,
        cap: usize,
    ) -> Result<(), SearchError> {
        self.patterns = compile_patterns(mode, case_sensitive)?;
        self.cap = cap;
        Ok(())
    }

    pub fn set_ai_results_displayed(&mut self, displayed: bool) {
        self.ai_results_displayed = displayed;
    }

    /// Whether [`scan_new`](Self::scan_new) would do anything
    pub fn is_active(&self) -> bool {
        !self.primary_in_flight && !self.ai_results_displayed && !self.patterns.is_empty()
    }

    /// Mark every currently visible leaf as seen
    ///
    /// Called after painting, since wrapping splits text nodes into new
    /// fragments that must not be matched again.
    pub fn absorb<D: DocumentTree + ?Sized>(&mut self, doc: &D) {
        let before = self.seen.len();
        self.seen.extend(
            DocumentTextWalker::new(doc)
                .skipping_markers()
                .map(|leaf| leaf.fingerprint()),
        );
        log::trace!("Snapshot grew from {} to {} leaves", before, self.seen.len());
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.patterns.clear();
        self.cap = usize::MAX;
        self.primary_in_flight = false;
        self.ai_results_displayed = false;
    }

    /// Match only leaves that were not in the snapshot
    ///
    /// `existing` is the number of spans the session already holds. New
    /// fingerprints are recorded only if the scan completes.
    pub async fn scan_new<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &D,
        cancel: &CancellationToken,
        existing: usize,
    ) -> Result<Vec<MatchSpan>, SearchError> {
        if !self.is_active() {
            log::trace!("Incremental scan skipped (inactive)");
            return Ok(Vec::new());
        }

        let mut spans = Vec::new();
        let mut fresh = Vec::new();
        let mut budget = self.cap.saturating_sub(existing);

        for (n, leaf) in DocumentTextWalker::new(doc).skipping_markers().enumerate() {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }

            let fingerprint = leaf.fingerprint();
            if self.seen.contains(&fingerprint) {
                continue;
            }

            for pattern in &self.patterns {
                if budget == 0 {
                    break;
                }
                let found = pattern.match_leaf(&leaf, cancel, budget)?;
                budget -= found.len();
                spans.extend(found);
            }
            fresh.push(fingerprint);

            if (n + 1) % self.progress_interval == 0 {
                tokio::task::yield_now().await;
            }
        }

        log::debug!(
            "Incremental scan: {} new leaf(s), {} new span(s)",
            fresh.len(),
            spans.len()
        );
        self.seen.extend(fresh);
        Ok(spans)
    }
}

/// Changes accumulated since the last re-scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingMutations {
    pub events: usize,
    pub added_text_len: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct MutationDebouncer {
    quiet_period: Duration,
    min_new_chars: usize,
    pending: PendingMutations,
    last_event: Option<Instant>,
}

impl Default for MutationDebouncer {
    fn default() -> Self {
        Self::new(&IncrementalConfig::default())
    }
}

impl MutationDebouncer {
    pub fn new(config: &IncrementalConfig) -> Self {
        Self {
            quiet_period: config.quiet_period(),
            min_new_chars: config.min_new_chars,
            pending: PendingMutations::default(),
            last_event: None,
        }
    }

    pub fn record(&mut self, event: &MutationEvent, now: Instant) {
        self.pending.events += 1;
        self.pending.added_text_len += event.added_text_len;
        self.pending.removed += event.removed.len();
        self.last_event = Some(now);
    }

    pub fn pending(&self) -> PendingMutations {
        self.pending
    }

    /// Removals always count, since they may leave spans pointing at detached nodes
    fn worth_handling(&self) -> bool {
        self.pending.added_text_len > self.min_new_chars || self.pending.removed > 0
    }

    /// Quiet for long enough, with enough change to be worth handling
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_event {
            Some(last) => {
                now.saturating_duration_since(last) >= self.quiet_period && self.worth_handling()
            }
            None => false,
        }
    }

    pub fn take(&mut self) -> PendingMutations {
        self.last_event = None;
        std::mem::take(&mut self.pending)
    }

    /// Wait for the next batch of changes worth handling
    ///
    /// Returns `None` once the sender side is gone and nothing worth handling
    /// is pending.
    pub async fn next_ready(&mut self, rx: &mut MutationReceiver) -> Option<PendingMutations> {
        let mut armed = self.last_event.is_some();
        loop {
            let event = if armed {
                match tokio::time::timeout(self.quiet_period, rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        if self.worth_handling() {
                            return Some(self.take());
                        }
                        // Too little so far; wait for more without a deadline
                        armed = false;
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            match event {
                Some(event) => {
                    self.record(&event, Instant::now());
                    armed = true;
                }
                None => {
                    return self.worth_handling().then(|| self.take());
                }
            }
        }
    }
}
