//! Retry and pacing shared by the wiki client and the view count scrapers.

use std::cell::Cell;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub retries: usize,
    /// Grows linearly with each attempt.
    pub delay_ms: u64,
}

impl RetryPolicy {
    fn delay(self, attempt: usize) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_mul(attempt as u64))
    }
}

/// Keeps consecutive requests at least `interval` apart and counts them.
#[derive(Debug, Default)]
pub(crate) struct Throttle {
    last_request_at: Cell<Option<Instant>>,
    requests: Cell<usize>,
}

impl Throttle {
    pub fn wait(&self, interval: Duration) {
        if let Some(last) = self.last_request_at.get() {
            let elapsed = last.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed);
            }
        }
        self.last_request_at.set(Some(Instant::now()));
        self.requests.set(self.requests.get() + 1);
    }

    pub fn requests(&self) -> usize {
        self.requests.get()
    }
}

/// Sends the request built by `request`, rebuilding it for each retry of a
/// transient failure. Any non-success status left at the end is an error.
pub(crate) fn send_with_retry(
    policy: RetryPolicy,
    throttle: &Throttle,
    interval: Duration,
    request: impl Fn() -> RequestBuilder,
) -> Result<Response> {
    let mut attempt = 0usize;
    loop {
        throttle.wait(interval);
        let failure = match request().send() {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                if attempt >= policy.retries || !is_retryable_status(status) {
                    bail!("HTTP {status}");
                }
                format!("HTTP {status}")
            }
            Err(error) => {
                if attempt >= policy.retries || !is_retryable_error(&error) {
                    return Err(error).context("request failed");
                }
                error.to_string()
            }
        };
        attempt += 1;
        let delay = policy.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, %failure, "retrying request");
        sleep(delay);
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use reqwest::StatusCode;

    use super::{RetryPolicy, Throttle, is_retryable_status};

    #[test]
    fn throttle_spaces_and_counts_requests() {
        let throttle = Throttle::default();
        let started = Instant::now();
        throttle.wait(Duration::from_millis(20));
        throttle.wait(Duration::from_millis(20));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(throttle.requests(), 2);
    }

    #[test]
    fn retry_delay_grows_linearly() {
        let policy = RetryPolicy {
            retries: 3,
            delay_ms: 250,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(3), Duration::from_millis(750));
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
