//! Rolling-window rate limiting for remote searches
//!
//! Request timestamps (epoch milliseconds) are kept in the key-value store
//! under [`RATE_LIMIT_KEY`] and pruned to the last day on every check. A
//! search is admitted only if every window has room for all of its batches.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::store::{KeyValueStore, RATE_LIMIT_KEY};

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Minute,
    Hour,
    Day,
}

impl RateWindow {
    fn span_ms(&self) -> i64 {
        match self {
            RateWindow::Minute => MINUTE_MS,
            RateWindow::Hour => HOUR_MS,
            RateWindow::Day => DAY_MS,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RateWindow::Minute => "minute",
            RateWindow::Hour => "hour",
            RateWindow::Day => "day",
        }
    }
}

/// A window without room for the requested batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub window: RateWindow,
    pub limit: usize,
    pub retry_after: Duration,
}

impl RateLimited {
    pub fn message(&self) -> String {
        format!(
            "AI search limit reached ({} per {}). Try again in {}.",
            self.limit,
            self.window.name(),
            format_wait(self.retry_after)
        )
    }
}

/// "45 seconds", "3 minutes", "1 hour"
pub fn format_wait(wait: Duration) -> String {
    let secs = wait.as_secs().max(1);
    let (amount, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs.div_ceil(60), "minute")
    } else {
        (secs.div_ceil(3600), "hour")
    };
    if amount == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", amount, unit)
    }
}

pub struct RateLimiter<'a, S: KeyValueStore + ?Sized> {
    store: &'a mut S,
    config: RateLimitConfig,
}

impl<'a, S: KeyValueStore + ?Sized> RateLimiter<'a, S> {
    pub fn new(store: &'a mut S, config: &RateLimitConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    fn limit(&self, window: RateWindow) -> usize {
        match window {
            RateWindow::Minute => self.config.per_minute,
            RateWindow::Hour => self.config.per_hour,
            RateWindow::Day => self.config.per_day,
        }
    }

    /// Stored timestamps; unreadable history counts as empty
    fn history(&self) -> Vec<i64> {
        match self.store.get(RATE_LIMIT_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                log::warn!("Discarding malformed rate limit history: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read rate limit history: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Admit `requests` new calls at `now`, recording them if allowed
    pub fn check_and_record(&mut self, requests: usize, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let now_ms = now.timestamp_millis();
        let mut history = self.history();
        history.retain(|t| now_ms - *t < DAY_MS && *t <= now_ms);

        for window in [RateWindow::Minute, RateWindow::Hour, RateWindow::Day] {
            let limit = self.limit(window);
            let in_window: Vec<i64> = history
                .iter()
                .copied()
                .filter(|t| now_ms - *t < window.span_ms())
                .collect();

            if in_window.len() + requests > limit {
                // Wait until enough of the oldest entries age out
                let must_expire = (in_window.len() + requests).saturating_sub(limit);
                let mut sorted = in_window;
                sorted.sort_unstable();
                let wait_ms = sorted
                    .get(must_expire.saturating_sub(1))
                    .map(|t| t + window.span_ms() - now_ms)
                    .unwrap_or_else(|| window.span_ms());
                let limited = RateLimited {
                    window,
                    limit,
                    retry_after: Duration::from_millis(wait_ms.max(1000) as u64),
                };
                log::info!("Remote search rate limited: {}", limited.message());
                return Err(limited);
            }
        }

        history.extend(std::iter::repeat_n(now_ms, requests));
        if let Err(e) = self.store.set(RATE_LIMIT_KEY, Value::from(history)) {
            log::warn!("Failed to save rate limit history: {:#}", e);
        }
        Ok(())
    }
}
