//! Page fetching: the `PageFetcher` seam, its reqwest implementation, and the
//! bounded pool every phase goes through.

use crate::charset;
use crate::config::FetchConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;
use encoding_rs::Encoding;
use rand::{Rng, rng};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, DNT, HeaderMap, HeaderName, HeaderValue,
    CONTENT_TYPE, PRAGMA, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError>;
}

// -------------------------
// reqwest implementation
// -------------------------

pub struct ReqwestFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
    origin: String,
    fallback: &'static Encoding,
}

impl ReqwestFetcher {
    pub fn new(cfg: &FetchConfig, origin: &Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(8))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()?;
        let fallback = charset::encoding_for(&cfg.fallback_charset)
            .ok_or_else(|| anyhow::anyhow!("unknown charset {:?}", cfg.fallback_charset))?;
        Ok(Self {
            client,
            user_agents: cfg.user_agents.clone(),
            origin: origin.to_string(),
            fallback,
        })
    }

    /// One throwaway request to the origin so later requests carry its cookies.
    pub async fn warmup(&self) {
        let req = self
            .client
            .get(&self.origin)
            .headers(self.headers(&self.origin));
        match req.send().await {
            Ok(r) => {
                let _ = r.bytes().await;
            }
            Err(e) => warn!(origin = %self.origin, error = %e, "warmup failed"),
        }
    }

    fn random_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let i = rng().random_range(0..self.user_agents.len());
        Some(self.user_agents[i].as_str())
    }

    fn headers(&self, referer: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ua) = self
            .random_user_agent()
            .and_then(|ua| HeaderValue::from_str(ua).ok())
        {
            h.insert(USER_AGENT, ua);
        }
        h.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        h.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ja-JP,ja;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        if let Ok(r) = HeaderValue::from_str(referer) {
            h.insert(REFERER, r);
        }
        h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        h.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        h.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        h.insert(DNT, HeaderValue::from_static("1"));
        h.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("same-origin"),
        );
        h.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("navigate"),
        );
        h.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("document"),
        );
        h
    }
}

/// Anything outside 2xx is a failure; the body is not looked at.
pub fn classify_status(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::HttpStatus(status.as_u16()))
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[async_trait]
impl PageFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError> {
        let rsp = self
            .client
            .get(url.as_str())
            .headers(self.headers(&self.origin))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = rsp.status();
        let final_url = rsp.url().clone();
        classify_status(status)?;
        let content_type = rsp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let raw = rsp.bytes().await.map_err(|e| transport_error(e, timeout))?;
        let encoding = charset::sniff(content_type.as_deref(), &raw, self.fallback);
        let (text, _, lossy) = encoding.decode(&raw);
        if lossy {
            warn!(%url, charset = encoding.name(), "body had undecodable bytes");
        }
        let text = text.into_owned();
        debug!(%url, %status, %final_url, charset = encoding.name(), len = text.len(), "fetched");
        Ok(Bytes::from(text))
    }
}

// -------------------------
// Retry policy
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_millis(cfg.backoff_base_ms),
            max: Duration::from_millis(cfg.backoff_max_ms),
        }
    }

    /// Backoff after the given failed attempt (1-based), before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Retries left for the whole run, shared by every worker.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: AtomicUsize,
}

impl RetryBudget {
    pub fn new(retries: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(retries),
        }
    }

    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

// -------------------------
// Fetch pool
// -------------------------

/// Bounded-concurrency access to the origin. A permit is held for the request
/// and the spacing pause after it, so `workers` caps both concurrency and
/// request rate. Backoff sleeps happen without a permit.
#[derive(Clone)]
pub struct FetchPool {
    fetcher: Arc<dyn PageFetcher>,
    permits: Arc<Semaphore>,
    budget: Arc<RetryBudget>,
    policy: RetryPolicy,
    request_timeout: Duration,
    spacing: Duration,
    jitter_ms: u64,
}

impl FetchPool {
    pub fn new(fetcher: Arc<dyn PageFetcher>, cfg: &FetchConfig) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(cfg.workers.max(1))),
            budget: Arc::new(RetryBudget::new(cfg.retry_budget)),
            policy: RetryPolicy::from_config(cfg),
            request_timeout: cfg.request_timeout(),
            spacing: cfg.spacing(),
            jitter_ms: cfg.jitter_ms,
        }
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn retries_left(&self) -> usize {
        self.budget.remaining()
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=self.jitter_ms))
    }

    async fn attempt(&self, url: &Url) -> Result<Bytes, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transport("fetch pool closed".into()))?;
        let result = self.fetcher.fetch(url, self.request_timeout).await;
        let pause = self.spacing + self.jitter();
        if !pause.is_zero() {
            sleep(pause).await;
        }
        result
    }

    /// Fetch with bounded retries. The last error is returned once attempts
    /// or the shared budget run out, or the failure is not retryable.
    pub async fn get(&self, url: &Url) -> Result<Bytes, FetchError> {
        let max = self.policy.max_attempts;
        let mut attempt = 1;
        loop {
            let err = match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            if !err.is_retryable() {
                debug!(%url, attempt, error = %err, "not retrying");
                return Err(err);
            }
            if attempt >= max {
                warn!(%url, attempt, error = %err, "giving up");
                return Err(err);
            }
            if !self.budget.try_take() {
                warn!(%url, attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }
            let delay = self.policy.delay(attempt) + self.jitter();
            debug!(%url, attempt, error = %err, ?delay, "retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }
}
