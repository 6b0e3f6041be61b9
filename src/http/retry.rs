//! Retry eligibility for dispatched requests.

use std::ops::RangeInclusive;
use std::time::Duration;

use super::transport::TransportError;
use crate::descriptor::Method;

/// Methods that may be retried at all.
pub const RETRY_METHODS: [Method; 5] = [
    Method::Get,
    Method::Post,
    Method::Put,
    Method::Options,
    Method::Delete,
];

/// Response statuses that trigger a retry (502 Bad Gateway through 504 Gateway Timeout).
pub const RETRY_STATUSES: RangeInclusive<u16> = 502..=504;

/// Whether a failed attempt is eligible for another try, budget aside.
///
/// Failures without a response never qualify.
pub fn is_retryable(method: Method, error: &TransportError) -> bool {
    RETRY_METHODS.contains(&method)
        && error
            .status_code()
            .is_some_and(|status| RETRY_STATUSES.contains(&status))
}

/// Bounded retries with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// `retries_done` counts the retries already spent, not the first attempt.
    pub fn should_retry(&self, retries_done: u32, method: Method, error: &TransportError) -> bool {
        retries_done < self.max_retries && is_retryable(method, error)
    }
}
