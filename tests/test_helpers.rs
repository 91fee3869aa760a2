//! Test helpers for end-to-end search tests
//!
//! Provides page fixtures, a fast engine configuration and a scripted remote
//! matcher whose traffic can be inspected after it has been moved into a
//! controller.

#![allow(dead_code)]

use async_trait::async_trait;
use pagelight::remote::{MatchRequest, MatchResponse, RemoteError, RemoteMatcher, UsageReport};
use pagelight::session::Canceller;
use pagelight::store::MemoryStore;
use pagelight::walker::DocumentTextWalker;
use pagelight::{DocumentTree, EngineConfig, MatchSpan, MemoryDocument, NodeId, SearchController};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Load `tests/pages/<name>.json`
pub fn load_page(name: &str) -> MemoryDocument {
    let path = PathBuf::from("tests/pages").join(format!("{}.json", name));
    let raw = std::fs::read_to_string(&path).expect("Failed to read page fixture");
    MemoryDocument::from_json(&raw).expect("Failed to parse page fixture")
}

/// A document with one `<p>` per paragraph
pub fn page(paragraphs: &[&str]) -> MemoryDocument {
    let mut doc = MemoryDocument::new();
    let root = doc.root();
    for text in paragraphs {
        let p = doc.append_element(root, "p").unwrap();
        doc.append_text(p, text).unwrap();
    }
    doc
}

/// Visible leaf texts by node, captured before anything is painted
pub fn leaf_map(doc: &MemoryDocument) -> HashMap<NodeId, String> {
    DocumentTextWalker::new(doc)
        .map(|leaf| (leaf.node, leaf.text))
        .collect()
}

/// The text each span covers, resolved against a pre-paint leaf map
pub fn span_texts(leaves: &HashMap<NodeId, String>, spans: &[MatchSpan]) -> Vec<String> {
    spans
        .iter()
        .map(|s| leaves[&s.start.node][s.start.offset..s.end.offset].to_string())
        .collect()
}

/// Defaults with millisecond delays so remote tests run quickly
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.remote.inter_batch_delay_ms = 1;
    config.remote.retry_base_delay_ms = 1;
    config.incremental.quiet_period_ms = 10;
    config
}

pub fn controller<R: RemoteMatcher>(remote: R) -> SearchController<R, MemoryStore> {
    SearchController::new(fast_config(), remote, MemoryStore::new())
}

/// Everything a [`ScriptedRemote`] was asked to do
#[derive(Default)]
pub struct RemoteLog {
    pub requests: Mutex<Vec<MatchRequest>>,
    pub reports: Mutex<Vec<UsageReport>>,
}

impl RemoteLog {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn reports(&self) -> Vec<UsageReport> {
        self.reports.lock().unwrap().clone()
    }
}

/// Remote matcher replaying canned responses, then `[]` once they run out
pub struct ScriptedRemote {
    authenticated: bool,
    responses: Mutex<VecDeque<Result<String, RemoteError>>>,
    log: Arc<RemoteLog>,
    cancel_on_call: Option<(usize, Arc<Mutex<Option<Canceller>>>)>,
}

impl ScriptedRemote {
    pub fn replying(responses: &[&str]) -> (Self, Arc<RemoteLog>) {
        Self::scripted(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn scripted(responses: Vec<Result<String, RemoteError>>) -> (Self, Arc<RemoteLog>) {
        let log = Arc::new(RemoteLog::default());
        let remote = Self {
            authenticated: true,
            responses: Mutex::new(responses.into()),
            log: Arc::clone(&log),
            cancel_on_call: None,
        };
        (remote, log)
    }

    pub fn signed_out() -> Self {
        let (mut remote, _) = Self::replying(&[]);
        remote.authenticated = false;
        remote
    }

    /// Fire the canceller stored in `slot` when the `call`-th request (1-based) arrives
    pub fn cancelling_on_call(mut self, call: usize, slot: Arc<Mutex<Option<Canceller>>>) -> Self {
        self.cancel_on_call = Some((call, slot));
        self
    }
}

#[async_trait]
impl RemoteMatcher for ScriptedRemote {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn find_snippets(&self, request: &MatchRequest) -> Result<MatchResponse, RemoteError> {
        let call = {
            let mut requests = self.log.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((at, slot)) = &self.cancel_on_call {
            if call == *at {
                if let Some(canceller) = slot.lock().unwrap().as_ref() {
                    canceller.cancel();
                }
            }
        }

        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()));
        next.map(|raw_response| MatchResponse { raw_response })
    }

    async fn report_usage(&self, report: &UsageReport) -> Result<(), RemoteError> {
        self.log.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn resync_user(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
