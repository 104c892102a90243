//! Rate-limit header parsing and wait computation

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Wait used when a 429 carries no usable header
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Throttling hints returned by a source API
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeader {
    /// Absolute time the quota resets
    pub reset_at: Option<DateTime<Utc>>,
    /// Relative wait (`Retry-After` in seconds)
    pub retry_after: Option<Duration>,
}

impl RateLimitHeader {
    pub fn reset_at(reset_at: DateTime<Utc>) -> Self {
        Self {
            reset_at: Some(reset_at),
            retry_after: None,
        }
    }

    pub fn retry_after(wait: Duration) -> Self {
        Self {
            reset_at: None,
            retry_after: Some(wait),
        }
    }

    /// Read `Retry-After` and `X-RateLimit-Reset` style headers
    ///
    /// Reset values are accepted as epoch seconds, epoch milliseconds or RFC 3339.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let retry_after = headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let reset_at = ["x-ratelimit-reset", "x-rate-limit-reset", "ratelimit-reset"]
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|v| v.to_str().ok())
            .and_then(parse_reset);

        Self { reset_at, retry_after }
    }

    pub fn is_empty(&self) -> bool {
        self.reset_at.is_none() && self.retry_after.is_none()
    }
}

fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(number) = value.parse::<i64>() {
        // Anything past year ~2286 in seconds is really milliseconds
        return if number > 9_999_999_999 {
            Utc.timestamp_millis_opt(number).single()
        } else {
            Utc.timestamp_opt(number, 0).single()
        };
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Time to wait before the next request: `max(reset - now, 0)`
///
/// `Retry-After` wins over a reset timestamp when both are present. The
/// result is never negative; an empty header yields the default wait.
pub fn compute_wait_time(header: &RateLimitHeader, now: DateTime<Utc>) -> Duration {
    if let Some(wait) = header.retry_after {
        return wait;
    }
    match header.reset_at {
        Some(reset_at) => (reset_at - now).to_std().unwrap_or(Duration::ZERO),
        None => DEFAULT_RATE_LIMIT_WAIT,
    }
}
