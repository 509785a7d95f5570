//! Retrying HTTP client shared by the SP-API adapters.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Throttled; wait for the server's Retry-After before trying again.
    RateLimited,
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::RateLimited
    } else if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, including the first request.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wait after a 429 that carries no usable Retry-After header.
    pub rate_limit_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    fn rate_limit_wait(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, now))
            .unwrap_or(self.rate_limit_delay)
    }
}

/// Parses a Retry-After value given either as delta-seconds or as an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("still rate limited after {attempts} attempts for {url}")]
    RateLimited { url: String, attempts: usize },
    #[error("http client is shutting down")]
    Closed,
}

impl FetchError {
    /// HTTP status of the failure, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Closed => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends the request built by `build`, retrying throttling and transient failures.
    ///
    /// A 429 waits for Retry-After (or the policy's default) before the next attempt;
    /// once `max_attempts` are spent the call fails with [`FetchError::RateLimited`].
    pub async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", url);
        async {
            let attempts = self.backoff.max_attempts.max(1);
            let mut attempt = 0;
            loop {
                attempt += 1;
                let last = attempt >= attempts;
                match build(&self.client).send().await {
                    Ok(resp) if resp.status().is_success() => return Ok(resp),
                    Ok(resp) => {
                        let status = resp.status();
                        match classify_status(status) {
                            RetryDisposition::RateLimited if last => {
                                return Err(FetchError::RateLimited {
                                    url: url.to_string(),
                                    attempts,
                                });
                            }
                            RetryDisposition::RateLimited => {
                                let wait = self.backoff.rate_limit_wait(resp.headers(), Utc::now());
                                warn!(attempt, wait_ms = wait.as_millis() as u64, "throttled by upstream");
                                tokio::time::sleep(wait).await;
                            }
                            RetryDisposition::Retryable if !last => {
                                let wait = self.backoff.delay_for_attempt(attempt - 1);
                                debug!(attempt, status = status.as_u16(), "retrying server error");
                                tokio::time::sleep(wait).await;
                            }
                            _ => {
                                return Err(FetchError::HttpStatus {
                                    status: status.as_u16(),
                                    url: resp.url().to_string(),
                                });
                            }
                        }
                    }
                    Err(err) => {
                        if last || classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                            return Err(FetchError::Request(err));
                        }
                        debug!(attempt, error = %err, "retrying request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt - 1)).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
    ) -> Result<T, FetchError> {
        let resp = self
            .send_with_retry(url, |client| authorized(client.get(url), bearer_token))
            .await?;
        Ok(resp.json::<T>().await?)
    }

    /// Returns the response with its body unread so callers can stream it.
    pub async fn get_stream(&self, url: &str) -> Result<Response, FetchError> {
        self.send_with_retry(url, |client| client.get(url)).await
    }
}

fn authorized(request: RequestBuilder, bearer_token: Option<&str>) -> RequestBuilder {
    match bearer_token {
        Some(token) => request.header("x-amz-access-token", token),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            rate_limit_delay: Duration::from_secs(2),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::RateLimited);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc3339("2026-03-02T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("3", now), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 0.5 ", now), Some(Duration::from_millis(500)));
        assert_eq!(
            parse_retry_after("Mon, 02 Mar 2026 10:00:07 GMT", now),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            parse_retry_after("Mon, 02 Mar 2026 09:59:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("-1", now), None);
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn missing_retry_after_falls_back_to_default_wait() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.rate_limit_wait(&HeaderMap::new(), Utc::now()),
            Duration::from_secs(2)
        );
    }

    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{addr}/doc")
    }

    const THROTTLED: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const OK: &str =
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}";

    #[tokio::test]
    async fn throttled_request_is_retried_after_retry_after() {
        let url = serve(vec![THROTTLED, OK]).await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let body: serde_json::Value = fetcher.get_json(&url, Some("token")).await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn persistent_throttling_surfaces_rate_limited() {
        let url = serve(vec![THROTTLED, THROTTLED]).await;
        let fetcher = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_attempts: 2,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        })
        .unwrap();
        let err = fetcher.get_stream(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { attempts: 2, .. }));
        assert_eq!(err.status(), Some(429));
    }
}
