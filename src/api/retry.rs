//! Timeout and bounded retry for the read-only GETs made to the catalog and
//! the geocoder.

use reqwest::StatusCode;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(StatusCode),
}

impl FetchError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    /// Any other 4xx is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            FetchError::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
        }
    }

    /// Exponential backoff: base, 2*base, 4*base, ...
    fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `attempt` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, F>(&self, what: &str, mut attempt: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        let mut tried = 0;
        loop {
            tried += 1;
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && tried < self.max_attempts => {
                    let wait = self.delay_before(tried);
                    log::warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        what,
                        e,
                        wait,
                        tried + 1,
                        self.max_attempts
                    );
                    thread::sleep(wait);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Send a GET built by `build_request` and decode its JSON body, retrying
/// transient failures according to `policy`.
///
/// The builder closure is called once per attempt since a request builder
/// is consumed by `send`. Transport errors are stripped of the request URL,
/// which can carry an API key in its query string.
pub fn get_json<F>(
    what: &str,
    policy: &RetryPolicy,
    build_request: F,
) -> Result<serde_json::Value, FetchError>
where
    F: Fn() -> reqwest::blocking::RequestBuilder,
{
    policy.run(what, || {
        let response = build_request().send().map_err(|e| e.without_url())?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response
            .json::<serde_json::Value>()
            .map_err(|e| e.without_url())?)
    })
}
