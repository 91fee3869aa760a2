//! Error taxonomy for search sessions
//!
//! Only pre-flight remote rejections and invalid patterns reach the host as
//! failures. Cancellation is a silent abort, transient remote failures are
//! recovered per batch, and unplaceable snippets are not errors at all.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::remote::RemoteError;

/// A sub-pattern that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidPattern {
    /// Position of the sub-pattern in the query (0 for single-pattern queries)
    pub index: usize,
    pub pattern: String,
    pub message: String,
}

/// Why the remote search was refused before any call was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ContentTooLarge,
    RateLimited,
    NotAuthenticated,
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// User-initiated or superseded search
    #[error("search cancelled")]
    Cancelled,

    #[error("invalid pattern: {}", describe_invalid(.invalid))]
    InvalidPattern { invalid: Vec<InvalidPattern> },

    #[error("{message}")]
    RemoteRejected {
        reason: RejectReason,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Every issued batch failed; `cause` is the last failure seen
    #[error("remote search failed: {cause}")]
    RemoteTransient {
        #[source]
        cause: RemoteError,
    },
}

impl SearchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled)
    }
}

fn describe_invalid(invalid: &[InvalidPattern]) -> String {
    invalid
        .iter()
        .map(|p| format!("'{}' ({})", p.pattern, p.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message_names_sub_patterns() {
        let err = SearchError::InvalidPattern {
            invalid: vec![
                InvalidPattern {
                    index: 1,
                    pattern: "(".to_string(),
                    message: "unclosed group".to_string(),
                },
            ],
        };
        assert!(err.to_string().contains("'('"));
        assert!(err.to_string().contains("unclosed group"));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(SearchError::Cancelled.is_cancelled());
        assert!(!SearchError::RemoteTransient {
            cause: RemoteError::Network("reset".into())
        }.is_cancelled());
    }
}
