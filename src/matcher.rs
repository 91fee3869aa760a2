//! Match engine
//!
//! Scans the visible leaves of a document and produces [`MatchSpan`]s in one
//! of four modes. The mode is a tagged [`SearchMode`] chosen once per search;
//! each mode compiles to a list of [`CompiledPattern`]s and the same scan loop
//! runs them all.
//!
//! # Ordering
//!
//! Multi-term and multi-regex searches run one full pass over the document
//! per term, so results are grouped by term (term-major), and sorted by
//! position only within each term's group. Match numbering shown to users
//! follows this order.
//!
//! # Cooperation
//!
//! The scan checks the cancellation token at every leaf and inside the
//! per-leaf match loops, and yields to the runtime every `progress_interval`
//! leaves after reporting progress.

use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::document::DocumentTree;
use crate::error::{InvalidPattern, SearchError};
use crate::models::{MatchSpan, Settings, SourceKind};
use crate::walker::{DocumentTextWalker, TextLeaf};

/// What to search for, decided once per search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    Literal(String),
    MultiLiteral(Vec<String>),
    Regex(String),
    MultiRegex(Vec<String>),
}

impl SearchMode {
    /// Interpret a raw query under the given settings
    ///
    /// Returns `None` for queries with nothing to search for.
    pub fn from_query(query: &str, settings: &Settings) -> Option<Self> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let mode = match (settings.use_regex, settings.multi_term) {
            (false, false) => SearchMode::Literal(query.to_string()),
            (true, false) => SearchMode::Regex(query.to_string()),
            (false, true) => SearchMode::MultiLiteral(tokenize_query(query, false)),
            (true, true) => SearchMode::MultiRegex(tokenize_query(query, true)),
        };

        if mode.terms().is_empty() {
            return None;
        }
        Some(mode)
    }

    pub fn terms(&self) -> Vec<&str> {
        match self {
            SearchMode::Literal(t) | SearchMode::Regex(t) => vec![t.as_str()],
            SearchMode::MultiLiteral(ts) | SearchMode::MultiRegex(ts) => {
                ts.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, SearchMode::Regex(_) | SearchMode::MultiRegex(_))
    }

    pub fn source_kind(&self) -> SourceKind {
        if self.is_regex() {
            SourceKind::Regex
        } else {
            SourceKind::Literal
        }
    }
}

/// Split a query into terms
///
/// Terms are separated by unquoted whitespace. `"` and `'` (and `?`, outside
/// regex mode) open a quoted term that runs to the matching closing
/// character, or to the end of the query if it is never closed.
pub fn tokenize_query(query: &str, regex_mode: bool) -> Vec<String> {
    let is_quote = |c: char| c == '"' || c == '\'' || (!regex_mode && c == '?');

    let mut terms = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    let mut flush = |current: &mut String, terms: &mut Vec<String>| {
        if !current.trim().is_empty() {
            terms.push(std::mem::take(current));
        } else {
            current.clear();
        }
    };

    for ch in query.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                flush(&mut current, &mut terms);
            }
            Some(_) => current.push(ch),
            None if is_quote(ch) => {
                flush(&mut current, &mut terms);
                quote = Some(ch);
            }
            None if ch.is_whitespace() => flush(&mut current, &mut terms),
            None => current.push(ch),
        }
    }
    flush(&mut current, &mut terms);

    terms
}

#[derive(Debug, Clone)]
enum Needle {
    /// Case-sensitive literal
    Exact(String),
    /// Case-folded literal or user regex
    Pattern(Regex),
}

/// One term or pattern ready to run against leaf text
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    needle: Needle,
    index: Option<usize>,
    kind: SourceKind,
}

impl CompiledPattern {
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// All non-overlapping, non-empty matches in one leaf, at most `limit`
    pub fn match_leaf(
        &self,
        leaf: &TextLeaf,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let ranges = self.find_ranges(&leaf.text, cancel, limit)?;
        Ok(ranges
            .into_iter()
            .map(|(start, end)| {
                MatchSpan::within_leaf(leaf.node, start, end, self.kind).with_pattern_index(self.index)
            })
            .collect())
    }

    fn find_ranges(
        &self,
        text: &str,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<(usize, usize)>, SearchError> {
        let mut found = Vec::new();
        match &self.needle {
            Needle::Exact(term) => {
                let mut from = 0;
                while found.len() < limit {
                    if cancel.is_cancelled() {
                        return Err(SearchError::Cancelled);
                    }
                    let Some(pos) = text[from..].find(term.as_str()) else {
                        break;
                    };
                    let start = from + pos;
                    let end = start + term.len();
                    found.push((start, end));
                    from = end;
                }
            }
            Needle::Pattern(re) => {
                let mut pos = 0;
                while pos <= text.len() && found.len() < limit {
                    if cancel.is_cancelled() {
                        return Err(SearchError::Cancelled);
                    }
                    let Some(m) = re.find_at(text, pos) else {
                        break;
                    };
                    if m.start() == m.end() {
                        // Zero-length match: step one char past it and retry
                        if m.end() >= text.len() {
                            break;
                        }
                        pos = m.end() + text[m.end()..].chars().next().map_or(1, char::len_utf8);
                        continue;
                    }
                    found.push((m.start(), m.end()));
                    pos = m.end();
                }
            }
        }
        Ok(found)
    }
}

/// Compile-test every pattern, reporting all that fail
pub fn validate_patterns(
    patterns: &[String],
    case_sensitive: bool,
) -> Result<Vec<Regex>, SearchError> {
    let mut compiled = Vec::with_capacity(patterns.len());
    let mut invalid = Vec::new();

    for (index, pattern) in patterns.iter().enumerate() {
        match RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(re) => compiled.push(re),
            Err(e) => invalid.push(InvalidPattern {
                index,
                pattern: pattern.clone(),
                message: regex_error_summary(&e),
            }),
        }
    }

    if !invalid.is_empty() {
        return Err(SearchError::InvalidPattern { invalid });
    }
    Ok(compiled)
}

/// Last meaningful line of a regex error (the first lines repeat the pattern)
fn regex_error_summary(err: &regex::Error) -> String {
    let full = err.to_string();
    full.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(full.as_str())
        .trim()
        .trim_start_matches("error: ")
        .to_string()
}

fn compile_literal(
    term: &str,
    index: Option<usize>,
    case_sensitive: bool,
) -> Result<CompiledPattern, SearchError> {
    let needle = if case_sensitive {
        Needle::Exact(term.to_string())
    } else {
        let re = RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()
            .map_err(|e| SearchError::InvalidPattern {
                invalid: vec![InvalidPattern {
                    index: index.unwrap_or(0),
                    pattern: term.to_string(),
                    message: regex_error_summary(&e),
                }],
            })?;
        Needle::Pattern(re)
    };
    Ok(CompiledPattern {
        needle,
        index,
        kind: SourceKind::Literal,
    })
}

/// Compile a search mode into runnable patterns
pub fn compile_patterns(
    mode: &SearchMode,
    case_sensitive: bool,
) -> Result<Vec<CompiledPattern>, SearchError> {
    match mode {
        SearchMode::Literal(term) => Ok(vec![compile_literal(term, None, case_sensitive)?]),
        SearchMode::MultiLiteral(terms) => terms
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(i, t)| compile_literal(t, Some(i), case_sensitive))
            .collect(),
        SearchMode::Regex(pattern) => {
            let compiled = validate_patterns(std::slice::from_ref(pattern), case_sensitive)?;
            Ok(compiled
                .into_iter()
                .map(|re| CompiledPattern {
                    needle: Needle::Pattern(re),
                    index: None,
                    kind: SourceKind::Regex,
                })
                .collect())
        }
        SearchMode::MultiRegex(patterns) => {
            let compiled = validate_patterns(patterns, case_sensitive)?;
            Ok(compiled
                .into_iter()
                .enumerate()
                .map(|(i, re)| CompiledPattern {
                    needle: Needle::Pattern(re),
                    index: Some(i),
                    kind: SourceKind::Regex,
                })
                .collect())
        }
    }
}

/// Scans documents for a [`SearchMode`]
#[derive(Debug, Clone)]
pub struct MatchEngine {
    regex_match_cap: usize,
    progress_interval: usize,
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(&SearchConfig::default())
    }
}

impl MatchEngine {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            regex_match_cap: config.regex_match_cap,
            progress_interval: config.progress_interval.max(1),
        }
    }

    pub fn regex_match_cap(&self) -> usize {
        self.regex_match_cap
    }

    pub async fn find_single_term<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        term: &str,
        case_sensitive: bool,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let mode = SearchMode::Literal(term.to_string());
        self.run(doc, &mode, case_sensitive, cancel, progress).await
    }

    pub async fn find_multi_term<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        terms: &[String],
        case_sensitive: bool,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let mode = SearchMode::MultiLiteral(terms.to_vec());
        self.run(doc, &mode, case_sensitive, cancel, progress).await
    }

    pub async fn find_single_regex<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        pattern: &str,
        case_sensitive: bool,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let mode = SearchMode::Regex(pattern.to_string());
        self.run(doc, &mode, case_sensitive, cancel, progress).await
    }

    pub async fn find_multi_regex<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        patterns: &[String],
        case_sensitive: bool,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let mode = SearchMode::MultiRegex(patterns.to_vec());
        self.run(doc, &mode, case_sensitive, cancel, progress).await
    }

    /// Run a search in whichever mode it is
    ///
    /// Returns a fresh span list; on cancellation nothing is returned and
    /// the caller's state is untouched.
    pub async fn run<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        mode: &SearchMode,
        case_sensitive: bool,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let patterns = compile_patterns(mode, case_sensitive)?;
        let cap = if mode.is_regex() {
            self.regex_match_cap
        } else {
            usize::MAX
        };

        log::debug!(
            "Scanning for {:?} ({} pattern(s), case_sensitive={})",
            mode,
            patterns.len(),
            case_sensitive
        );

        let spans = self.scan(doc, &patterns, cap, cancel, progress).await?;
        log::debug!("Scan produced {} span(s)", spans.len());
        Ok(spans)
    }

    async fn scan<D: DocumentTree + ?Sized>(
        &self,
        doc: &D,
        patterns: &[CompiledPattern],
        cap: usize,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<MatchSpan>, SearchError> {
        let mut spans = Vec::new();
        let mut leaves_processed = 0usize;

        // One full pass per pattern (term-major order)
        for pattern in patterns {
            for leaf in DocumentTextWalker::new(doc) {
                if cancel.is_cancelled() {
                    return Err(SearchError::Cancelled);
                }

                let remaining = cap - spans.len();
                spans.extend(pattern.match_leaf(&leaf, cancel, remaining)?);
                if spans.len() >= cap {
                    log::info!("Match cap of {} reached, stopping scan", cap);
                    progress(spans.len());
                    return Ok(spans);
                }

                leaves_processed += 1;
                if leaves_processed % self.progress_interval == 0 {
                    progress(spans.len());
                    tokio::task::yield_now().await;
                }
            }
        }

        progress(spans.len());
        Ok(spans)
    }
}
