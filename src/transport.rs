//! Blocking HTTP transport with automatic retry of transient failures.
//!
//! Callers issue what looks like a single request; the transport may put several on the
//! wire. Only methods listed in [`RetryPolicy::allowed_methods`] are retried, and only for
//! the statuses in [`RetryPolicy::status_forcelist`] or for connection-level errors. Once the
//! budget is spent the last response is handed back unchanged so the caller can inspect its
//! status and body.

use std::thread;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::GdcError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed on top of the first request.
    pub total: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub status_forcelist: Vec<u16>,
    pub allowed_methods: Vec<Method>,
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 5,
            backoff_factor: Duration::from_secs(1),
            backoff_max: Duration::from_secs(120),
            status_forcelist: vec![429, 500, 502, 503, 504],
            allowed_methods: vec![Method::POST],
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods.iter().any(|allowed| allowed == method)
    }

    pub fn is_retryable_status(&self, method: &Method, status: u16) -> bool {
        self.allows_method(method) && self.status_forcelist.contains(&status)
    }

    /// Connection failures never reached the server and are always safe to repeat; a
    /// timeout or a broken exchange is only repeated for allowed methods.
    pub fn is_retryable_error(&self, method: &Method, err: &reqwest::Error) -> bool {
        if err.is_connect() {
            return true;
        }
        self.allows_method(method) && (err.is_timeout() || err.is_request())
    }

    /// Sleep before the `retry`-th retry (1-based): none for the first, then
    /// `backoff_factor * 2^(retry - 1)` capped at `backoff_max`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(retry - 1);
        self.backoff_factor
            .saturating_mul(multiplier)
            .min(self.backoff_max)
    }

    fn retry_delay(&self, retry: u32, status: u16, headers: &HeaderMap) -> Duration {
        if self.respect_retry_after && matches!(status, 413 | 429 | 503) {
            if let Some(delay) = parse_retry_after(headers) {
                return delay.min(self.backoff_max);
            }
        }
        self.backoff(retry)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[derive(Clone)]
pub struct RetryingTransport {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingTransport {
    /// `stall_timeout` bounds connecting, waiting for response headers, and each single
    /// read of the body. There is no deadline on the transfer as a whole, so a large body
    /// that keeps arriving is never cut off.
    pub fn new(policy: RetryPolicy, stall_timeout: Duration) -> Result<Self, GdcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gdc-cohort/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GdcError::HttpClient(err.to_string()))?,
        );
        // Client-level timeouts apply per wait; a request-level one would span the whole body.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(stall_timeout)
            .timeout(stall_timeout)
            .build()
            .map_err(|err| GdcError::HttpClient(err.to_string()))?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// POSTs `body` as JSON. The body is encoded once and re-sent verbatim on every retry.
    pub fn post_json<T>(&self, url: &str, body: &T) -> Result<Response, TransportError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        let response = self.send_with_retries(Method::POST, || {
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(payload.clone())
        })?;
        Ok(response)
    }

    fn send_with_retries<F>(
        &self,
        method: Method,
        mut make_req: F,
    ) -> Result<Response, reqwest::Error>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut retry = 0u32;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if retry < self.policy.total
                        && self.policy.is_retryable_status(&method, status)
                    {
                        retry += 1;
                        let delay = self.policy.retry_delay(retry, status, resp.headers());
                        debug!(
                            url = %resp.url(),
                            status,
                            retry,
                            delay_ms = delay.as_millis() as u64,
                            "transient status, retrying"
                        );
                        drop(resp);
                        thread::sleep(delay);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if retry < self.policy.total && self.policy.is_retryable_error(&method, &err) {
                        retry += 1;
                        let delay = self.policy.backoff(retry);
                        debug!(
                            error = %err,
                            retry,
                            delay_ms = delay.as_millis() as u64,
                            "request error, retrying"
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}
