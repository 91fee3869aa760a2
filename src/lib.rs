//! Pagelight: in-page search and highlight engine
//!
//! Pagelight finds every occurrence of a query in a live, mutable text tree,
//! paints non-destructive highlights over them, and lets the host cycle
//! through matches in document order. When literal and pattern matching come
//! up empty, it falls back to a remote natural-language matcher and re-locates
//! the returned snippets in the tree.
//!
//! # Architecture
//!
//! - **Walker**: visible text leaves of the document, in order
//! - **Match Engine**: literal, multi-term, regex and multi-regex scans
//! - **Incremental Matcher**: scans only content that appeared since the last pass
//! - **Highlight Renderer**: batched wrapping/unwrapping of marker elements
//! - **Remote Orchestrator**: chunked, rate-limited, sequential remote matching
//! - **Session**: the single live search tying the pieces together
//!
//! # Example Usage
//!
//! ```no_run
//! use pagelight::{EngineConfig, MemoryDocument, SearchController, Settings};
//! use pagelight::remote::HttpRemoteMatcher;
//! use pagelight::store::MemoryStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut doc = MemoryDocument::from_json(r#"{"tag":"body","children":[{"text":"hello world"}]}"#)?;
//! let config = EngineConfig::default();
//! let remote = HttpRemoteMatcher::new(&config.remote, None);
//! let mut controller = SearchController::new(config, remote, MemoryStore::new());
//!
//! let summary = controller.search(&mut doc, "world", Settings::default()).await?;
//! println!("{} matches", summary.total);
//! controller.next(&mut doc);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod colors;
pub mod config;
pub mod document;
pub mod error;
pub mod highlight;
pub mod incremental;
pub mod matcher;
pub mod models;
pub mod navigation;
pub mod output;
pub mod patterns;
pub mod progress;
pub mod remote;
pub mod session;
pub mod snippets;
pub mod store;
pub mod walker;

// Re-export commonly used types
pub use config::EngineConfig;
pub use document::{DocumentTree, MemoryDocument, NodeId};
pub use error::SearchError;
pub use matcher::{MatchEngine, SearchMode};
pub use models::{MatchSpan, Settings, SourceKind, TextPosition};
pub use navigation::NavigationCursor;
pub use session::{SearchController, SearchSummary};
