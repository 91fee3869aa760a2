//! The live search session
//!
//! [`SearchController`] owns the one active session: query, settings, match
//! list, cursor, colors, markers and the incremental snapshot. Starting a new
//! search cancels the previous session's token and clears its markers before
//! anything else happens, so two sessions never coexist.
//!
//! A search tries, in order: the query as typed (literal, multi-term, regex
//! or multi-regex), the query upgraded to a canned pattern when it names one
//! ("emails", "phone numbers"), and finally the remote matcher when AI mode is
//! on. Remote results are painted batch by batch as they arrive.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::colors::{ColorAssigner, ColorAssignment};
use crate::config::EngineConfig;
use crate::document::DocumentTree;
use crate::error::SearchError;
use crate::highlight::HighlightRenderer;
use crate::incremental::{IncrementalMatcher, MutationDebouncer, PendingMutations};
use crate::matcher::{MatchEngine, SearchMode};
use crate::models::{MatchSpan, Settings};
use crate::navigation::NavigationCursor;
use crate::patterns::{DetectedPattern, PatternDetector};
use crate::progress::{RemoteStatus, SearchEvent};
use crate::remote::{BatchSink, RemoteMatcher, RemoteSearchOrchestrator};
use crate::snippets::SnippetDeduplicator;
use crate::store::{KeyValueStore, load_settings, save_settings};
use crate::walker::collect_page_text;

pub type EventListener = Box<dyn FnMut(&SearchEvent)>;

/// Which stage produced the session's matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPath {
    /// Nothing to search for
    Empty,
    Literal,
    Regex,
    /// The query named a canned pattern
    Pattern,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSummary {
    pub total: usize,
    pub current: Option<usize>,
    /// "i of n" label for the host's counter
    pub label: String,
    pub path: SearchPath,
    pub matches: Vec<MatchSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RemoteStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<DetectedPattern>,
}

/// Cancels whatever search the controller is currently running
///
/// Obtained before starting a search and usable while it runs.
#[derive(Debug, Clone)]
pub struct Canceller(Arc<Mutex<CancellationToken>>);

impl Canceller {
    pub fn cancel(&self) {
        match self.0.lock() {
            Ok(token) => token.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }
}

struct SessionState {
    query: String,
    spans: Vec<MatchSpan>,
    cursor: NavigationCursor,
    colors: ColorAssignment,
    renderer: HighlightRenderer,
    incremental: IncrementalMatcher,
    cancel: CancellationToken,
}

impl SessionState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            query: String::new(),
            spans: Vec::new(),
            cursor: NavigationCursor::new(),
            colors: ColorAssignment::uniform(),
            renderer: HighlightRenderer::new(&config.highlight),
            incremental: IncrementalMatcher::new(&config.search),
            cancel: CancellationToken::new(),
        }
    }

    /// Append spans to the match list and paint them
    async fn append<D: DocumentTree + ?Sized>(&mut self, doc: &mut D, new_spans: Vec<MatchSpan>) {
        let first = self.spans.len();
        self.spans.extend(new_spans);
        self.cursor.set_count(self.spans.len());
        self.renderer.set_current(doc, self.cursor.current());
        self.renderer
            .add_spans(doc, &self.spans[first..], first, &self.colors)
            .await;
    }

    /// Drop spans whose nodes the host removed from the page
    ///
    /// Returns the number of spans dropped. The selection stays on the same
    /// span if it survived, otherwise it moves to the next surviving one.
    fn prune_detached<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) -> usize {
        let mut keep: Vec<bool> = self
            .spans
            .iter()
            .map(|span| doc.is_attached(span.start.node) && doc.is_attached(span.end.node))
            .collect();
        for index in self.renderer.detached_spans(&*doc) {
            if let Some(k) = keep.get_mut(index) {
                *k = false;
            }
        }
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return 0;
        }

        let mut next = 0;
        let remap: Vec<Option<usize>> = keep
            .iter()
            .map(|&k| {
                k.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        let selected = self
            .cursor
            .current()
            .map(|c| keep.iter().take(c).filter(|k| **k).count());

        let mut flags = keep.iter();
        self.spans.retain(|_| flags.next().copied().unwrap_or(false));
        self.renderer.retain_spans(doc, &remap);
        self.cursor.set_count(self.spans.len());
        if let Some(index) = selected {
            self.cursor.jump_to(index);
        }
        self.renderer.set_current(doc, self.cursor.current());

        log::debug!("Dropped {} span(s) on removed nodes", dropped);
        dropped
    }
}

fn emit(listener: &mut Option<EventListener>, event: SearchEvent) {
    log::trace!("{}", event.status_message());
    if let Some(listener) = listener.as_mut() {
        listener(&event);
    }
}

pub struct SearchController<R: RemoteMatcher, S: KeyValueStore> {
    config: EngineConfig,
    engine: MatchEngine,
    detector: PatternDetector,
    colors: ColorAssigner,
    remote: R,
    store: S,
    settings: Settings,
    session: SessionState,
    cancel_slot: Arc<Mutex<CancellationToken>>,
    listener: Option<EventListener>,
}

impl<R: RemoteMatcher, S: KeyValueStore> SearchController<R, S> {
    pub fn new(config: EngineConfig, remote: R, store: S) -> Self {
        let settings = load_settings(&store).unwrap_or_else(|e| {
            log::warn!("Using default settings: {:#}", e);
            Settings::default()
        });
        let session = SessionState::new(&config);
        let cancel_slot = Arc::new(Mutex::new(session.cancel.clone()));

        Self {
            engine: MatchEngine::new(&config.search),
            detector: PatternDetector::new(),
            colors: ColorAssigner::new(config.highlight.palette_size),
            config,
            remote,
            store,
            settings,
            session,
            cancel_slot,
            listener: None,
        }
    }

    /// Receive progress and status events
    pub fn set_listener(&mut self, listener: impl FnMut(&SearchEvent) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn canceller(&self) -> Canceller {
        Canceller(Arc::clone(&self.cancel_slot))
    }

    /// Cancel the running search; committed highlights stay
    pub fn cancel(&self) {
        self.session.cancel.cancel();
    }

    /// Settings last used (or persisted by a previous run)
    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn query(&self) -> &str {
        &self.session.query
    }

    pub fn matches(&self) -> &[MatchSpan] {
        &self.session.spans
    }

    pub fn cursor(&self) -> &NavigationCursor {
        &self.session.cursor
    }

    pub fn marker_count(&self) -> usize {
        self.session.renderer.marker_count()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A debouncer configured for this controller's mutation handling
    pub fn debouncer(&self) -> MutationDebouncer {
        MutationDebouncer::new(&self.config.incremental)
    }

    pub fn next<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) -> Option<usize> {
        let index = self.session.cursor.next();
        self.session.renderer.set_current(doc, index);
        index
    }

    pub fn previous<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) -> Option<usize> {
        let index = self.session.cursor.previous();
        self.session.renderer.set_current(doc, index);
        index
    }

    pub fn jump_to<D: DocumentTree + ?Sized>(&mut self, doc: &mut D, index: usize) -> Option<usize> {
        let index = self.session.cursor.jump_to(index);
        self.session.renderer.set_current(doc, index);
        index
    }

    /// End the session and remove its highlights
    pub async fn reset<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) {
        self.teardown(doc).await;
        log::debug!("Session reset");
    }

    async fn teardown<D: DocumentTree + ?Sized>(&mut self, doc: &mut D) -> CancellationToken {
        self.session.cancel.cancel();
        self.session.renderer.clear(doc).await;
        self.session.spans.clear();
        self.session.cursor.reset();
        self.session.colors = ColorAssignment::uniform();
        self.session.incremental.reset();
        self.session.query.clear();

        let token = CancellationToken::new();
        self.session.cancel = token.clone();
        match self.cancel_slot.lock() {
            Ok(mut slot) => *slot = token.clone(),
            Err(poisoned) => *poisoned.into_inner() = token.clone(),
        }
        token
    }

    fn remember_settings(&mut self, settings: Settings) {
        if settings == self.settings {
            return;
        }
        self.settings = settings;
        if let Err(e) = save_settings(&mut self.store, &settings) {
            log::warn!("Failed to save settings: {:#}", e);
        }
    }

    fn summary(
        &self,
        path: SearchPath,
        status: Option<RemoteStatus>,
        pattern: Option<DetectedPattern>,
    ) -> SearchSummary {
        let cursor = &self.session.cursor;
        SearchSummary {
            total: cursor.total(),
            current: cursor.current(),
            label: cursor.label(),
            path,
            matches: self.session.spans.clone(),
            status,
            pattern,
        }
    }

    /// Run a new search, replacing the current session
    ///
    /// Cancellation yields `Err(SearchError::Cancelled)`; anything painted
    /// before the cancel (progressive remote results) stays on the page.
    pub async fn search<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        query: &str,
        settings: Settings,
    ) -> Result<SearchSummary, SearchError> {
        let cancel = self.teardown(doc).await;
        self.remember_settings(settings);
        self.session.query = query.to_string();

        let Some(mode) = SearchMode::from_query(query, &settings) else {
            emit(&mut self.listener, SearchEvent::Done { total: 0 });
            return Ok(self.summary(SearchPath::Empty, None, None));
        };

        log::info!("Searching for '{}' ({:?})", query.trim(), settings);
        emit(
            &mut self.listener,
            SearchEvent::Started {
                query: query.trim().to_string(),
            },
        );

        self.session.incremental.begin(&*doc);
        let result = self.run_search(doc, query, mode, settings, &cancel).await;
        self.session.incremental.finish_primary();

        match result {
            Ok(summary) => {
                emit(
                    &mut self.listener,
                    SearchEvent::Done {
                        total: summary.total,
                    },
                );
                log::info!("Search for '{}' finished: {}", query.trim(), summary.label);
                Ok(summary)
            }
            Err(SearchError::Cancelled) => {
                log::debug!("Search for '{}' cancelled", query.trim());
                emit(&mut self.listener, SearchEvent::Cancelled);
                Err(SearchError::Cancelled)
            }
            Err(e) => {
                log::warn!("Search for '{}' failed: {}", query.trim(), e);
                if let Some(status) = RemoteStatus::from_error(&e) {
                    emit(&mut self.listener, SearchEvent::Remote { status });
                }
                emit(&mut self.listener, SearchEvent::Done { total: 0 });
                Err(e)
            }
        }
    }

    async fn run_search<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        query: &str,
        mode: SearchMode,
        settings: Settings,
        cancel: &CancellationToken,
    ) -> Result<SearchSummary, SearchError> {
        let case_sensitive = settings.case_sensitive;
        let spans = self.scan(&*doc, &mode, case_sensitive, cancel).await?;
        if !spans.is_empty() {
            let path = if mode.is_regex() {
                SearchPath::Regex
            } else {
                SearchPath::Literal
            };
            self.commit(doc, &mode, case_sensitive, spans).await?;
            return Ok(self.summary(path, None, None));
        }

        if settings.detect_patterns && !mode.is_regex() {
            if let Some(pattern) = self.detector.detect(query) {
                emit(
                    &mut self.listener,
                    SearchEvent::PatternDetected {
                        description: pattern.description.clone(),
                    },
                );
                let pattern_mode = pattern.search_mode();
                // Canned patterns carry their own case rules
                let spans = self.scan(&*doc, &pattern_mode, false, cancel).await?;
                if !spans.is_empty() || !settings.ai_mode {
                    self.commit(doc, &pattern_mode, false, spans).await?;
                    return Ok(self.summary(SearchPath::Pattern, None, Some(pattern)));
                }
            }
        }

        if settings.ai_mode {
            return self.remote_search(doc, query, cancel).await;
        }

        let path = if mode.is_regex() {
            SearchPath::Regex
        } else {
            SearchPath::Literal
        };
        self.commit(doc, &mode, case_sensitive, Vec::new()).await?;
        Ok(self.summary(path, None, None))
    }

    async fn scan<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &D,
        mode: &SearchMode,
        case_sensitive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let listener = &mut self.listener;
        let mut progress = |found: usize| emit(&mut *listener, SearchEvent::Scanning { found });
        self.engine
            .run(doc, mode, case_sensitive, cancel, &mut progress)
            .await
    }

    /// Make `spans` the session's matches and paint them
    async fn commit<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        mode: &SearchMode,
        case_sensitive: bool,
        spans: Vec<MatchSpan>,
    ) -> Result<(), SearchError> {
        let session = &mut self.session;
        session.colors = self.colors.assign(&mode.terms(), case_sensitive);
        session.cursor.set_count(spans.len());

        if !spans.is_empty() {
            emit(
                &mut self.listener,
                SearchEvent::Painting { count: spans.len() },
            );
            session
                .renderer
                .paint(doc, &spans, session.cursor.current(), &session.colors)
                .await;
        }
        session.spans = spans;

        let cap = if mode.is_regex() {
            self.engine.regex_match_cap()
        } else {
            usize::MAX
        };
        session.incremental.set_mode(mode, case_sensitive, cap)?;
        session.incremental.absorb(&*doc);
        Ok(())
    }

    async fn remote_search<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<SearchSummary, SearchError> {
        let page_text = collect_page_text(&*doc);
        let mut sink = HighlightSink {
            doc,
            session: &mut self.session,
            locator: SnippetDeduplicator::new(&self.config.remote),
            max_results: self.config.remote.max_results,
            listener: &mut self.listener,
        };

        let result = RemoteSearchOrchestrator::new(&self.remote, &mut self.store, &self.config)
            .run(query.trim(), &page_text, &mut sink, cancel)
            .await;

        let status = match result {
            Ok(outcome) => {
                if outcome.cancelled {
                    return Err(SearchError::Cancelled);
                }
                if outcome.any_placed() {
                    None
                } else if outcome.snippets.is_empty() {
                    Some(RemoteStatus::NoResults)
                } else {
                    Some(RemoteStatus::NothingPlaced)
                }
            }
            // Soft failure: zero results plus an inline status
            Err(e @ SearchError::RemoteTransient { .. }) => {
                log::warn!("{}", e);
                RemoteStatus::from_error(&e)
            }
            Err(e) => return Err(e),
        };

        if !self.session.spans.is_empty() {
            self.session.incremental.set_ai_results_displayed(true);
        }
        if let Some(status) = &status {
            emit(
                &mut self.listener,
                SearchEvent::Remote {
                    status: status.clone(),
                },
            );
        }
        Ok(self.summary(SearchPath::Remote, status, None))
    }

    /// Bring the session up to date with host changes
    ///
    /// Spans on removed nodes are dropped first. Content that appeared since
    /// the search committed is then matched, unless remote results are
    /// displayed. Returns the number of new matches.
    pub async fn apply_mutations<D: DocumentTree + ?Sized>(
        &mut self,
        doc: &mut D,
        pending: &PendingMutations,
    ) -> Result<usize, SearchError> {
        let session = &mut self.session;
        let dropped = if pending.removed > 0 {
            session.prune_detached(doc)
        } else {
            0
        };

        let mut added = 0;
        if session.incremental.is_active() {
            log::debug!(
                "Re-scanning after {} change(s) adding {} chars",
                pending.events,
                pending.added_text_len
            );
            let cancel = session.cancel.clone();
            let new_spans = session
                .incremental
                .scan_new(&*doc, &cancel, session.spans.len())
                .await?;
            added = new_spans.len();
            if added > 0 {
                session.append(doc, new_spans).await;
                session.incremental.absorb(&*doc);
            }
        }

        if dropped > 0 || added > 0 {
            emit(
                &mut self.listener,
                SearchEvent::Done {
                    total: session.spans.len(),
                },
            );
        }
        Ok(added)
    }
}

/// Places each remote batch's snippets on the page as soon as it arrives
struct HighlightSink<'a, D: DocumentTree + ?Sized> {
    doc: &'a mut D,
    session: &'a mut SessionState,
    locator: SnippetDeduplicator,
    max_results: usize,
    listener: &'a mut Option<EventListener>,
}

#[async_trait(?Send)]
impl<'a, D: DocumentTree + ?Sized> BatchSink for HighlightSink<'a, D> {
    async fn on_batch(&mut self, ordinal: usize, total: usize, snippets: &[String]) -> usize {
        let mut placed: Vec<MatchSpan> = Vec::new();

        for (i, snippet) in snippets.iter().enumerate() {
            if self.session.spans.len() + placed.len() >= self.max_results {
                log::debug!("Remote result limit of {} reached", self.max_results);
                break;
            }
            let Some(span) = self.locator.locate(&*self.doc, snippet) else {
                continue;
            };
            let duplicate = self
                .session
                .spans
                .iter()
                .chain(placed.iter())
                .any(|s| s.start == span.start);
            if duplicate {
                continue;
            }
            placed.push(span.with_snippet_id(format!("b{}-s{}", ordinal, i)));
        }

        let count = placed.len();
        if count > 0 {
            self.session.append(&mut *self.doc, placed).await;
        }
        emit(
            &mut *self.listener,
            SearchEvent::RemoteBatch {
                current: ordinal + 1,
                total,
                placed: count,
            },
        );
        count
    }
}
