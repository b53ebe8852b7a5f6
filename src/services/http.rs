//! HTTP plumbing shared by the protocol clients and the playlist fetcher:
//! client construction, bounded retry with exponential backoff, and
//! size-limited body reads.

use futures::StreamExt;
use reqwest::{header::RETRY_AFTER, Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::Config;
use crate::error::SyncError;
use crate::metrics;

/// Errors from a single logical HTTP exchange (after retries)
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 401/403: credentials rejected, never retried
    #[error("request rejected with HTTP {0}")]
    Unauthorized(u16),
    /// 429 again after the single allowed backoff
    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },
    /// Non-retryable status
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    /// Connection failures, timeouts and 5xx beyond the retry budget
    #[error("network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },
    #[error("response body exceeds {limit_mb}MB")]
    TooLarge { limit_mb: usize },
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unauthorized(status) => SyncError::Auth(format!("HTTP {}", status)),
            FetchError::RateLimited { attempts } => SyncError::TransientNetwork {
                attempts,
                message: "rate limited (HTTP 429)".to_string(),
            },
            FetchError::Network { attempts, message } => {
                SyncError::TransientNetwork { attempts, message }
            }
            FetchError::Body(message) => SyncError::TransientNetwork {
                attempts: 1,
                message,
            },
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt for network errors and 5xx
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// No retries and no waiting
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Build the shared HTTP client.
///
/// Many IPTV panels run on self-signed certificates, so certificate
/// validation is relaxed for them.
pub fn build_client(config: &Config) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_millis(config.fetch_timeout_ms))
        .gzip(true)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| FetchError::Client(e.to_string()))
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request built by `build`, retrying per `policy`.
///
/// - 2xx returns the response
/// - 401/403 fail immediately with [`FetchError::Unauthorized`]
/// - 429 gets one backoff-and-retry (honouring `Retry-After`), then fails
/// - 5xx and transport errors retry with exponential backoff up to `max_retries`
/// - any other status fails with [`FetchError::Status`]
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    source: &'static str,
    build: F,
) -> Result<Response, FetchError>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0u32;
    let mut attempts = 0u32;
    let mut rate_limited = false;

    loop {
        attempts += 1;
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }

                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(FetchError::Unauthorized(status.as_u16()));
                }

                if status == StatusCode::TOO_MANY_REQUESTS {
                    if rate_limited {
                        return Err(FetchError::RateLimited { attempts });
                    }
                    rate_limited = true;
                    let backoff = retry_after(&resp)
                        .unwrap_or_else(|| policy.backoff(retries))
                        .min(policy.max_delay);
                    warn!(source, "fetch_retry" = attempts, "reason" = "429", "backoff_ms" = backoff.as_millis() as u64);
                    metrics::record_retry(source, "rate_limit");
                    sleep(backoff).await;
                    continue;
                }

                if status.is_server_error() {
                    if retries < policy.max_retries {
                        let backoff = policy.backoff(retries);
                        retries += 1;
                        warn!(source, "fetch_retry" = attempts, "reason" = status.as_u16(), "backoff_ms" = backoff.as_millis() as u64);
                        metrics::record_retry(source, "server_error");
                        sleep(backoff).await;
                        continue;
                    }
                    return Err(FetchError::Network {
                        attempts,
                        message: format!("HTTP {}", status.as_u16()),
                    });
                }

                return Err(FetchError::Status(status.as_u16()));
            }
            Err(err) => {
                if retries < policy.max_retries {
                    let backoff = policy.backoff(retries);
                    retries += 1;
                    warn!(source, "fetch_retry" = attempts, "reason" = "network", "backoff_ms" = backoff.as_millis() as u64);
                    metrics::record_retry(source, "network");
                    sleep(backoff).await;
                    continue;
                }
                let message = if err.is_timeout() {
                    "timed out".to_string()
                } else if err.is_connect() {
                    "server unreachable".to_string()
                } else {
                    err.to_string()
                };
                return Err(FetchError::Network { attempts, message });
            }
        }
    }
}

/// Read a whole body, failing once it grows past `limit_mb`
pub async fn read_body_limited(response: Response, limit_mb: usize) -> Result<Vec<u8>, FetchError> {
    let limit = limit_mb.saturating_mul(1024 * 1024);
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge { limit_mb });
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Body(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(FetchError::TooLarge { limit_mb });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
