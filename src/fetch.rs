use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::{header, redirect, Client, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "WebContextBuilder/1.0 (LLM Context Scraper)";

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub max_body_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Why a page yielded no body. The `Display` text is surfaced verbatim as
/// the observer's skip reason.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not HTML ({content_type})")]
    NotHtml { content_type: String },
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("response body too large (>{0} bytes)")]
    BodyTooLarge(usize),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// A page fetcher. `Ok` carries the decoded HTML body; `Err` the reason the
/// page is skipped. Implementations hold no crawl state; concurrency is
/// bounded by the engine, not here.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Plain HTTP fetcher over a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    opts: FetchOptions,
}

impl HttpFetcher {
    /// The pool keeps up to `2 * max_concurrent` idle connections per host
    /// so the semaphore-bounded workers reuse connections instead of
    /// re-handshaking.
    pub fn new(opts: FetchOptions, max_concurrent: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(opts.user_agent.clone())
            .timeout(opts.timeout)
            .connect_timeout(opts.connect_timeout)
            .redirect(redirect::Policy::limited(10))
            .pool_max_idle_per_host(max_concurrent.saturating_mul(2))
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, opts })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let mut last = String::from("no attempts made");

        for attempt in 0..self.opts.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << (attempt - 1));
                debug!(%url, attempt, backoff_secs = backoff.as_secs(), "retrying");
                tokio::time::sleep(backoff).await;
            }

            let resp = match self
                .client
                .get(url.clone())
                .header(
                    header::ACCEPT,
                    "text/html,application/xhtml+xml;q=0.9,*/*;q=0.1",
                )
                .send()
                .await
            {
                Ok(r) => r,
                // Timeouts and connection errors are transient.
                Err(e) => {
                    last = e.to_string();
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                return Err(FetchError::Status(status.as_u16()));
            }
            if status.is_server_error() {
                last = format!("HTTP status {status}");
                continue;
            }
            if status != StatusCode::OK {
                return Err(FetchError::Status(status.as_u16()));
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            if !content_type.to_ascii_lowercase().contains("text/html") {
                return Err(FetchError::NotHtml {
                    content_type: if content_type.is_empty() {
                        "missing content-type".to_string()
                    } else {
                        content_type
                    },
                });
            }

            match read_limited(resp, self.opts.max_body_bytes).await {
                Ok(body) => return Ok(String::from_utf8_lossy(&body).into_owned()),
                Err(BodyError::TooLarge) => {
                    return Err(FetchError::BodyTooLarge(self.opts.max_body_bytes))
                }
                Err(BodyError::Stream(e)) => {
                    last = e;
                    continue;
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.opts.max_retries,
            last,
        })
    }
}

enum BodyError {
    TooLarge,
    Stream(String),
}

async fn read_limited(resp: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>, BodyError> {
    let mut stream = resp.bytes_stream();
    let mut buf = BytesMut::new();

    while let Some(item) = stream.next().await {
        let chunk = item.map_err(|e| BodyError::Stream(e.to_string()))?;
        if buf.len() + chunk.len() > max_bytes {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.to_vec())
}
