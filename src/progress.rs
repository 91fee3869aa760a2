//! Progress and status events for the host UI
//!
//! Serialized with a `type` tag so hosts can forward them over any JSON
//! channel.

use serde::{Deserialize, Serialize};

use crate::error::{RejectReason, SearchError};
use crate::remote::RemoteError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    /// A new session started
    Started { query: String },

    /// Matches found so far during a scan
    Scanning { found: usize },

    /// The query was upgraded to a canned pattern search
    PatternDetected { description: String },

    /// Markers being painted
    Painting { count: usize },

    /// A remote batch finished
    RemoteBatch {
        current: usize,
        total: usize,
        placed: usize,
    },

    /// Remote search status worth showing inline
    Remote { status: RemoteStatus },

    /// Search committed
    Done { total: usize },

    /// Search abandoned (user cancel or superseded)
    Cancelled,
}

impl SearchEvent {
    /// Get a human-readable status message for this event
    pub fn status_message(&self) -> String {
        match self {
            SearchEvent::Started { query } => format!("Searching for \"{}\"...", query),
            SearchEvent::Scanning { found } => format!("Scanning... {} found", found),
            SearchEvent::PatternDetected { description } => {
                format!("Searching for {}...", description.to_lowercase())
            }
            SearchEvent::Painting { count } => format!("Highlighting {} matches...", count),
            SearchEvent::RemoteBatch { current, total, .. } => {
                format!("AI search: section {}/{}...", current, total)
            }
            SearchEvent::Remote { status } => status.message(),
            SearchEvent::Done { total } => match total {
                0 => "No matches".to_string(),
                1 => "1 match".to_string(),
                n => format!("{} matches", n),
            },
            SearchEvent::Cancelled => "Search cancelled".to_string(),
        }
    }
}

/// Categorized outcome of a remote search that did not simply succeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteStatus {
    RateLimited { message: String, retry_after_secs: Option<u64> },
    TooLarge,
    NoCredits,
    SignInRequired,
    Generic { message: String },
    /// The remote matcher returned no snippets
    NoResults,
    /// Snippets came back but none could be found on the page
    NothingPlaced,
}

impl RemoteStatus {
    pub fn message(&self) -> String {
        match self {
            RemoteStatus::RateLimited { message, .. } => message.clone(),
            RemoteStatus::TooLarge => "This page is too large for AI search.".to_string(),
            RemoteStatus::NoCredits => "You're out of AI search credits.".to_string(),
            RemoteStatus::SignInRequired => "Sign in to use AI search.".to_string(),
            RemoteStatus::Generic { message } => format!("AI search failed: {}", message),
            RemoteStatus::NoResults => "AI search found nothing relevant.".to_string(),
            RemoteStatus::NothingPlaced => {
                "AI search found results, but none could be located on this page.".to_string()
            }
        }
    }

    /// Status to show for a failed search, if any
    pub fn from_error(err: &SearchError) -> Option<Self> {
        match err {
            SearchError::RemoteRejected {
                reason,
                message,
                retry_after,
            } => Some(match reason {
                RejectReason::RateLimited => RemoteStatus::RateLimited {
                    message: message.clone(),
                    retry_after_secs: retry_after.map(|d| d.as_secs()),
                },
                RejectReason::ContentTooLarge => RemoteStatus::TooLarge,
                RejectReason::NotAuthenticated => RemoteStatus::SignInRequired,
            }),
            SearchError::RemoteTransient { cause } => Some(Self::from_remote_error(cause)),
            SearchError::Cancelled | SearchError::InvalidPattern { .. } => None,
        }
    }

    /// Status for a batch failure that outlasted its retries
    pub fn from_remote_error(err: &RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized(_) => RemoteStatus::SignInRequired,
            RemoteError::InsufficientCredits(_) => RemoteStatus::NoCredits,
            RemoteError::ContentTooLarge(_) => RemoteStatus::TooLarge,
            RemoteError::RateLimited {
                message,
                retry_after,
            } => RemoteStatus::RateLimited {
                message: message.clone(),
                retry_after_secs: retry_after.map(|d| d.as_secs()),
            },
            RemoteError::Retryable { .. } | RemoteError::Network(_) | RemoteError::Api { .. } => {
                RemoteStatus::Generic {
                    message: err.to_string(),
                }
            }
        }
    }
}
