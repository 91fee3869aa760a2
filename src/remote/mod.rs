//! Batched remote search
//!
//! When exact and pattern matching find nothing, the page text is sent to a
//! remote natural-language matcher in overlapping batches. Batches run
//! strictly one after another with a short pause between them; each batch's
//! new snippets are handed to a [`BatchSink`] as soon as they arrive so the
//! caller can highlight progressively.
//!
//! Only pre-flight checks (content size, sign-in, rate limits) fail the whole
//! search. A batch that still fails after its retries is counted and skipped.

pub mod chunker;
pub mod client;
pub mod rate_limit;
pub mod response;

pub use chunker::{ChunkConfig, create_batches};
pub use client::{HttpRemoteMatcher, MatchRequest, MatchResponse, RemoteError, RemoteMatcher, UsageReport};
pub use rate_limit::{RateLimited, RateLimiter};
pub use response::parse_snippets;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{RejectReason, SearchError};
use crate::models::{Batch, PendingTokenConsumption};
use crate::snippets::SnippetDeduplicator;
use crate::store::KeyValueStore;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You find passages in a web page that answer or relate to the user's query. \
Reply with a JSON array of strings. Each string must be copied verbatim from the page content, \
be a complete phrase or sentence, and be at most 300 characters long. \
Return an empty array if nothing in the content is relevant. Do not add commentary.";

/// Receives each batch's new snippets as soon as the batch completes
#[async_trait(?Send)]
pub trait BatchSink {
    /// Returns how many of `snippets` were placed on the page
    async fn on_batch(&mut self, ordinal: usize, total: usize, snippets: &[String]) -> usize;
}

/// Where an orchestration currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    RateLimitCheck,
    Rejected,
    Chunking,
    Requesting { ordinal: usize },
    Retrying { ordinal: usize, attempt: usize },
    Completed { ordinal: usize },
    Combining,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSearchOutcome {
    /// Deduplicated snippets across all batches, capped at `max_results`
    pub snippets: Vec<String>,
    /// Snippets the sink reported as placed
    pub placed: usize,
    pub batches_issued: usize,
    pub batches_failed: usize,
    pub consumption: Vec<PendingTokenConsumption>,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl RemoteSearchOutcome {
    pub fn any_placed(&self) -> bool {
        self.placed > 0
    }
}

enum BatchFailure {
    Cancelled,
    Remote(RemoteError),
}

pub struct RemoteSearchOrchestrator<'a, R: RemoteMatcher + ?Sized, S: KeyValueStore + ?Sized> {
    remote: &'a R,
    store: &'a mut S,
    config: &'a EngineConfig,
    dedup: SnippetDeduplicator,
    state: OrchestratorState,
}

impl<'a, R: RemoteMatcher + ?Sized, S: KeyValueStore + ?Sized> RemoteSearchOrchestrator<'a, R, S> {
    pub fn new(remote: &'a R, store: &'a mut S, config: &'a EngineConfig) -> Self {
        Self {
            remote,
            store,
            config,
            dedup: SnippetDeduplicator::new(&config.remote),
            state: OrchestratorState::Idle,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) {
        log::trace!("Remote search: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn reject(
        &mut self,
        reason: RejectReason,
        message: String,
        retry_after: Option<std::time::Duration>,
    ) -> SearchError {
        self.transition(OrchestratorState::Rejected);
        log::info!("Remote search rejected ({:?}): {}", reason, message);
        SearchError::RemoteRejected {
            reason,
            message,
            retry_after,
        }
    }

    /// Run a remote search over `page_text`
    pub async fn run(
        &mut self,
        query: &str,
        page_text: &str,
        sink: &mut dyn BatchSink,
        cancel: &CancellationToken,
    ) -> Result<RemoteSearchOutcome, SearchError> {
        let config = self.config;
        let remote_config = &config.remote;
        self.transition(OrchestratorState::RateLimitCheck);

        let chars = page_text.chars().count();
        if chars > remote_config.max_content_chars {
            return Err(self.reject(
                RejectReason::ContentTooLarge,
                format!(
                    "This page is too large for AI search ({} characters, limit {}).",
                    chars, remote_config.max_content_chars
                ),
                None,
            ));
        }

        if !self.remote.is_authenticated() {
            return Err(self.reject(
                RejectReason::NotAuthenticated,
                "Sign in to use AI search.".to_string(),
                None,
            ));
        }

        if page_text.trim().is_empty() {
            log::debug!("No page text to send to the remote matcher");
            self.transition(OrchestratorState::Done);
            return Ok(RemoteSearchOutcome::default());
        }

        // Partition first so the limiter records the calls actually made
        let batches = create_batches(page_text, &ChunkConfig::from(remote_config));
        let total = batches.len();
        let limited = RateLimiter::new(&mut *self.store, &config.rate_limit)
            .check_and_record(total, Utc::now());
        if let Err(limited) = limited {
            return Err(self.reject(
                RejectReason::RateLimited,
                limited.message(),
                Some(limited.retry_after),
            ));
        }

        self.transition(OrchestratorState::Chunking);
        log::info!(
            "Remote search '{}' via {}: {} batch(es) over {} chars",
            query,
            self.remote.name(),
            total,
            chars
        );

        let system_prompt = remote_config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut outcome = RemoteSearchOutcome::default();
        let mut seen = self.dedup.set();
        let mut collected: Vec<String> = Vec::new();
        let mut resynced = false;
        let mut last_error: Option<RemoteError> = None;

        for batch in &batches {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            if batch.ordinal > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        outcome.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(remote_config.inter_batch_delay()) => {}
                }
            }

            outcome.batches_issued += 1;
            let request = MatchRequest {
                query: query.to_string(),
                content: batch.text.clone(),
                custom_system_prompt: Some(system_prompt.clone()),
            };

            let result = self.request_batch(&request, batch, &mut resynced, cancel).await;
            let snippets = match &result {
                Ok(response) => parse_snippets(&response.raw_response),
                Err(_) => Vec::new(),
            };
            outcome.consumption.push(PendingTokenConsumption {
                batch_ordinal: batch.ordinal,
                snippet_count: snippets.len(),
            });

            match result {
                Ok(_) => {
                    let fresh: Vec<String> = snippets
                        .iter()
                        .filter(|s| seen.insert(s))
                        .map(|s| s.trim().to_string())
                        .collect();
                    log::debug!(
                        "Batch {}/{}: {} snippet(s), {} new",
                        batch.ordinal + 1,
                        total,
                        snippets.len(),
                        fresh.len()
                    );

                    self.transition(OrchestratorState::Completed {
                        ordinal: batch.ordinal,
                    });
                    outcome.placed += sink.on_batch(batch.ordinal, total, &fresh).await;
                    collected.extend(fresh);
                }
                Err(BatchFailure::Cancelled) => {
                    outcome.cancelled = true;
                    break;
                }
                Err(BatchFailure::Remote(e)) => {
                    log::warn!("Batch {}/{} failed: {}", batch.ordinal + 1, total, e);
                    outcome.batches_failed += 1;
                    last_error = Some(e);
                }
            }
        }

        self.transition(OrchestratorState::Combining);
        let mut snippets = self.dedup.dedupe(&collected);
        snippets.truncate(remote_config.max_results);
        outcome.snippets = snippets;

        self.report_usage(&outcome.consumption, outcome.any_placed()).await;
        self.transition(OrchestratorState::Done);

        let all_failed = !outcome.cancelled
            && outcome.batches_issued > 0
            && outcome.batches_failed == outcome.batches_issued;
        if all_failed {
            if let Some(cause) = last_error {
                return Err(SearchError::RemoteTransient { cause });
            }
        }

        log::info!(
            "Remote search finished: {} snippet(s), {} placed, {}/{} batch(es) failed{}",
            outcome.snippets.len(),
            outcome.placed,
            outcome.batches_failed,
            outcome.batches_issued,
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        Ok(outcome)
    }

    /// One batch with retries and at most one credit resync per orchestration
    async fn request_batch(
        &mut self,
        request: &MatchRequest,
        batch: &Batch,
        resynced: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<MatchResponse, BatchFailure> {
        let remote = self.remote;
        let max_retries = self.config.remote.max_retries;
        let mut attempt = 0;

        self.transition(OrchestratorState::Requesting {
            ordinal: batch.ordinal,
        });

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BatchFailure::Cancelled),
                result = remote.find_snippets(request) => result,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(RemoteError::InsufficientCredits(message)) if !*resynced => {
                    *resynced = true;
                    log::info!(
                        "Insufficient credits on batch {}, resyncing user data",
                        batch.ordinal + 1
                    );
                    if let Err(e) = remote.resync_user().await {
                        log::warn!("User resync failed: {}", e);
                        return Err(BatchFailure::Remote(RemoteError::InsufficientCredits(message)));
                    }
                }
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.config.remote.retry_delay(attempt));
                    attempt += 1;
                    log::warn!(
                        "Batch {} failed, retrying ({}/{}) in {:?}: {}",
                        batch.ordinal + 1,
                        attempt,
                        max_retries,
                        delay,
                        e
                    );
                    self.transition(OrchestratorState::Retrying {
                        ordinal: batch.ordinal,
                        attempt,
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BatchFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(BatchFailure::Remote(e)),
            }
        }
    }

    async fn report_usage(&self, consumption: &[PendingTokenConsumption], any_placed: bool) {
        for entry in consumption {
            let report = UsageReport {
                batch_ordinal: entry.batch_ordinal,
                snippet_count: entry.snippet_count,
                matches_found: u8::from(any_placed),
            };
            if let Err(e) = self.remote.report_usage(&report).await {
                log::warn!("Failed to report usage for batch {}: {}", entry.batch_ordinal, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RemoteConfig};
    use crate::store::{MemoryStore, RATE_LIMIT_KEY};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedMatcher {
        authenticated: bool,
        responses: Mutex<VecDeque<Result<String, RemoteError>>>,
        requests: Mutex<Vec<MatchRequest>>,
        reports: Mutex<Vec<UsageReport>>,
        resyncs: Mutex<usize>,
    }

    impl ScriptedMatcher {
        fn new(responses: Vec<Result<&str, RemoteError>>) -> Self {
            Self {
                authenticated: true,
                responses: Mutex::new(responses.into_iter().map(|r| r.map(str::to_string)).collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RemoteMatcher for ScriptedMatcher {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn find_snippets(&self, request: &MatchRequest) -> Result<MatchResponse, RemoteError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("[]".to_string()));
            next.map(|raw_response| MatchResponse { raw_response })
        }

        async fn report_usage(&self, report: &UsageReport) -> Result<(), RemoteError> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }

        async fn resync_user(&self) -> Result<(), RemoteError> {
            *self.resyncs.lock().unwrap() += 1;
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Places every snippet it is given
    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<(usize, usize, Vec<String>)>,
        place: bool,
    }

    #[async_trait(?Send)]
    impl BatchSink for RecordingSink {
        async fn on_batch(&mut self, ordinal: usize, total: usize, snippets: &[String]) -> usize {
            self.batches.push((ordinal, total, snippets.to_vec()));
            if self.place { snippets.len() } else { 0 }
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            remote: RemoteConfig {
                chunk_size: 100,
                chunk_overlap: 10,
                min_advance: 10,
                retry_base_delay_ms: 1,
                inter_batch_delay_ms: 1,
                ..RemoteConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn page(words: usize) -> String {
        (0..words).map(|i| format!("word{} ", i)).collect()
    }

    #[tokio::test]
    async fn test_single_batch_streams_and_reports() {
        let matcher = ScriptedMatcher::new(vec![Ok(r#"["Revenue grew 12%"]"#)]);
        let mut store = MemoryStore::new();
        let config = EngineConfig::default();
        let mut sink = RecordingSink {
            place: true,
            ..RecordingSink::default()
        };
        let cancel = CancellationToken::new();

        let mut orchestrator = RemoteSearchOrchestrator::new(&matcher, &mut store, &config);
        let outcome = orchestrator
            .run("growth", "Revenue grew 12% last quarter.", &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(orchestrator.state(), OrchestratorState::Done);
        assert_eq!(outcome.snippets, vec!["Revenue grew 12%"]);
        assert_eq!(outcome.placed, 1);
        assert_eq!(outcome.batches_issued, 1);
        assert_eq!(sink.batches, vec![(0, 1, vec!["Revenue grew 12%".to_string()])]);

        let requests = matcher.requests.lock().unwrap();
        assert_eq!(requests[0].query, "growth");
        assert_eq!(requests[0].custom_system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));

        let reports = matcher.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].matches_found, 1);
    }

    #[tokio::test]
    async fn test_rejects_oversized_page_before_any_call() {
        let matcher = ScriptedMatcher::new(vec![]);
        let mut store = MemoryStore::new();
        let mut config = EngineConfig::default();
        config.remote.max_content_chars = 10;
        let mut sink = RecordingSink::default();

        let err = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "this text is longer than ten", &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::RemoteRejected {
                reason: RejectReason::ContentTooLarge,
                ..
            }
        ));
        assert!(matcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_when_not_signed_in() {
        let matcher = ScriptedMatcher {
            authenticated: false,
            ..ScriptedMatcher::default()
        };
        let mut store = MemoryStore::new();
        let config = EngineConfig::default();
        let err = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "some page text", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::RemoteRejected {
                reason: RejectReason::NotAuthenticated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_with_retry_after() {
        let matcher = ScriptedMatcher::new(vec![]);
        let mut store = MemoryStore::new();
        let config = EngineConfig {
            rate_limit: RateLimitConfig {
                per_minute: 1,
                ..RateLimitConfig::default()
            },
            ..EngineConfig::default()
        };
        let cancel = CancellationToken::new();

        RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "page text here", &mut RecordingSink::default(), &cancel)
            .await
            .unwrap();
        let err = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "page text here", &mut RecordingSink::default(), &cancel)
            .await
            .unwrap_err();
        match err {
            SearchError::RemoteRejected {
                reason: RejectReason::RateLimited,
                retry_after,
                message,
            } => {
                assert!(retry_after.is_some());
                assert!(message.contains("Try again in"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_records_each_issued_batch() {
        let matcher = ScriptedMatcher::new(vec![]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        // Boundary snapping leaves a one-byte tail for a third batch
        let text = format!("{}c", "ab ".repeat(63));

        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", &text, &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        let expected = create_batches(&text, &ChunkConfig::from(&config.remote)).len();
        assert_eq!(expected, 3);
        assert_eq!(outcome.batches_issued, expected);
        let history: Vec<i64> =
            serde_json::from_value(store.get(RATE_LIMIT_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(history.len(), expected);
    }

    #[tokio::test]
    async fn test_batches_are_sequential_and_deduplicated() {
        let matcher = ScriptedMatcher::new(vec![
            Ok(r#"["word1 word2 word3 word4"]"#),
            Ok(r#"["word1 word2 word3 word4", "word20 word21 word22"]"#),
            Ok("[]"),
        ]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let mut sink = RecordingSink {
            place: true,
            ..RecordingSink::default()
        };
        let text = page(30);

        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", &text, &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let ordinals: Vec<usize> = sink.batches.iter().map(|b| b.0).collect();
        assert_eq!(ordinals, (0..ordinals.len()).collect::<Vec<_>>());
        assert_eq!(sink.batches[1].2, vec!["word20 word21 word22".to_string()]);
        assert_eq!(outcome.snippets.len(), 2);
        assert_eq!(outcome.consumption.len(), outcome.batches_issued);
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let matcher = ScriptedMatcher::new(vec![
            Err(RemoteError::Network("reset".to_string())),
            Err(RemoteError::Retryable {
                message: "busy".to_string(),
                retry_after: Some(std::time::Duration::from_millis(1)),
            }),
            Ok(r#"["a snippet long enough"]"#),
        ]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.snippets.len(), 1);
        assert_eq!(outcome.batches_failed, 0);
        assert_eq!(matcher.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_search() {
        let matcher = ScriptedMatcher::new(vec![
            Err(RemoteError::Api {
                status: 400,
                message: "bad".to_string(),
            }),
            Ok(r#"["word15 word16 word17"]"#),
            Ok("[]"),
        ]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", &page(30), &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.snippets, vec!["word15 word16 word17"]);
        // Issued batches are reported whether or not they succeeded
        assert_eq!(matcher.reports.lock().unwrap().len(), outcome.batches_issued);
    }

    #[tokio::test]
    async fn test_all_batches_failing_is_transient_error() {
        let matcher = ScriptedMatcher::new(vec![
            Err(RemoteError::Api {
                status: 400,
                message: "bad".to_string(),
            }),
        ]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let err = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::RemoteTransient {
                cause: RemoteError::Api { status: 400, .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_credit_error_resyncs_once() {
        let matcher = ScriptedMatcher::new(vec![
            Err(RemoteError::InsufficientCredits("empty".to_string())),
            Ok(r#"["recovered after resync"]"#),
        ]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*matcher.resyncs.lock().unwrap(), 1);
        assert_eq!(outcome.snippets, vec!["recovered after resync"]);
    }

    #[tokio::test]
    async fn test_nothing_placed_is_reported_as_zero() {
        let matcher = ScriptedMatcher::new(vec![Ok(r#"["not on the page at all"]"#)]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.any_placed());
        assert_eq!(outcome.snippets.len(), 1);
        assert_eq!(matcher.reports.lock().unwrap()[0].matches_found, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_nothing() {
        let matcher = ScriptedMatcher::new(vec![]);
        let mut store = MemoryStore::new();
        let config = fast_config();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &cancel)
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.batches_issued, 0);
        assert!(matcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_system_prompt_is_sent() {
        let matcher = ScriptedMatcher::new(vec![]);
        let mut store = MemoryStore::new();
        let mut config = fast_config();
        config.remote.system_prompt = Some("Only quotes.".to_string());
        RemoteSearchOrchestrator::new(&matcher, &mut store, &config)
            .run("q", "short page", &mut RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            matcher.requests.lock().unwrap()[0].custom_system_prompt.as_deref(),
            Some("Only quotes.")
        );
    }
}
