//! Resilient HTTP client
//!
//! [`ResilientClient`] composes the circuit breaker, per-host rate limiters,
//! the two-tier cache, and a [`Transport`]. Every call runs the same
//! pipeline:
//!
//! 1. refuse immediately if the circuit is open
//! 2. serve from cache when possible
//! 3. otherwise fetch with retries, each attempt spaced by the rate limiter
//!    and bounded by the request timeout
//! 4. write successful responses through to the cache
//!
//! All components are owned by the client; share it behind an `Arc`.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

use crate::breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::cache::{
    CacheCoordinator, CacheKey, CacheStatistics, CleanupReport, DiskCache, MemoryOnlyTier,
    PersistentTier,
};
use crate::clock::{system_clock, SharedClock};
use crate::config::{ClientConfig, ConfigError};
use crate::error::{AppError, AppResult};
use crate::limiter::RateLimiters;
use crate::storage::FsStorage;
use crate::sweeper::CleanupHandle;
use crate::transport::{ReqwestTransport, Transport, TransportResponse};

/// Message of the error returned once every attempt failed without a response
pub const RETRIES_EXHAUSTED: &str = "max retry attempts exceeded";

/// Assembles a [`ResilientClient`], letting tests swap out its collaborators
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    persistent: Option<Arc<dyn PersistentTier>>,
    clock: Option<SharedClock>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            persistent: None,
            clock: None,
        }
    }

    /// Transport to use instead of [`ReqwestTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persistent tier to use instead of the one derived from the config
    pub fn persistent_tier(mut self, tier: Arc<dyn PersistentTier>) -> Self {
        self.persistent = Some(tier);
        self
    }

    /// Clock shared by the breaker, limiters, and memory caches
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the config and wires every component together
    pub fn build(self) -> Result<ResilientClient, ConfigError> {
        let config = self.config;
        config.validate()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|e| ConfigError::InvalidValue {
                field: "user_agent",
                reason: e.to_string(),
            })?;
        let text_headers = request_headers(user_agent.clone(), "application/json");
        let binary_headers = request_headers(user_agent, "*/*");

        let clock = self.clock.unwrap_or_else(system_clock);
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&config)?,
        };
        let persistent = match self.persistent {
            Some(tier) => tier,
            None => default_persistent_tier(&config),
        };

        info!(
            base_url = %base_url,
            persistent = persistent.is_persistent(),
            "Resilient client ready"
        );

        Ok(ResilientClient {
            breaker: CircuitBreaker::new(config.breaker_settings(), clock.clone()),
            limiters: RateLimiters::new(config.min_request_interval(), clock.clone()),
            cache: CacheCoordinator::new(config.memory_cache_max_entries, persistent, clock),
            transport,
            base_url,
            text_headers,
            binary_headers,
            config,
        })
    }
}

fn request_headers(user_agent: HeaderValue, accept: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent);
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    headers
}

/// reqwest transport whose connect phase is bounded by the request timeout
fn default_transport(config: &ClientConfig) -> Result<Arc<dyn Transport>, ConfigError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.request_timeout())
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            field: "request_timeout_ms",
            reason: format!("cannot build HTTP client: {}", e),
        })?;
    Ok(Arc::new(ReqwestTransport::with_client(client)))
}

/// Disk tier when enabled and a directory is available, memory-only otherwise
fn default_persistent_tier(config: &ClientConfig) -> Arc<dyn PersistentTier> {
    if !config.disk_cache_enabled {
        return Arc::new(MemoryOnlyTier);
    }
    match config.resolved_cache_dir() {
        Ok(dir) => {
            debug!(cache_dir = %dir.display(), "Using disk cache");
            Arc::new(DiskCache::new(
                FsStorage::new(dir),
                config.disk_cache_max_size_bytes,
            ))
        }
        Err(e) => {
            warn!(error = %e, "Disk cache unavailable, caching in memory only");
            Arc::new(MemoryOnlyTier)
        }
    }
}

/// Rate-limited, circuit-protected, cached GET client
#[derive(Debug)]
pub struct ResilientClient {
    config: ClientConfig,
    base_url: String,
    text_headers: HeaderMap,
    binary_headers: HeaderMap,
    breaker: CircuitBreaker,
    limiters: RateLimiters,
    cache: CacheCoordinator,
    transport: Arc<dyn Transport>,
}

impl ResilientClient {
    /// Creates a client with the default transport and persistent tier
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches a text resource relative to the base URL
    ///
    /// # Arguments
    /// * `path` - Resource path starting with `/`, optionally with a query
    ///
    /// # Returns
    /// The response body. Responses are cached in memory for the TTL that
    /// applies to `path`.
    pub async fn fetch(&self, path: &str) -> AppResult<String> {
        validate_path(path)?;
        let url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| AppError::invalid("path", e.to_string()))?;
        let key = CacheKey::from_url("GET", &url);

        // Held until the call returns; frees the half-open trial slot on drop
        let Some(admission) = self.breaker.admit() else {
            debug!(path, "Circuit open, refusing fetch");
            return Err(AppError::service_unavailable());
        };
        if admission.is_trial() {
            debug!(path, "Half-open trial fetch");
        }

        if let Ok(body) = self.cache.get_text(&key) {
            debug!(key = %key, "Serving text response from cache");
            return Ok(body);
        }

        let body = self.fetch_remote(&url, &self.text_headers).await?;
        let text = String::from_utf8(body.to_vec())
            .map_err(|e| AppError::unknown_with_cause("response body is not valid UTF-8", e))?;

        let ttl = self.config.ttl_for(path);
        if !ttl.is_zero() {
            self.cache.put_text(&key, text.clone(), Some(ttl));
        }
        Ok(text)
    }

    /// Fetches a binary asset from an absolute URL
    ///
    /// Assets are written through to memory and the persistent tier, so they
    /// survive restarts when the disk cache is enabled.
    pub async fn fetch_binary(&self, url: &str) -> AppResult<Bytes> {
        let url = parse_asset_url(url)?;
        let key = CacheKey::from_url("GET", &url);

        // Held until the call returns; frees the half-open trial slot on drop
        let Some(admission) = self.breaker.admit() else {
            debug!(url = %url, "Circuit open, refusing binary fetch");
            return Err(AppError::service_unavailable());
        };
        if admission.is_trial() {
            debug!(url = %url, "Half-open trial binary fetch");
        }

        match self.cache.get_binary(&key).await {
            Ok(data) => {
                debug!(key = %key, "Serving binary response from cache");
                return Ok(data);
            }
            Err(e) => debug!(key = %key, reason = %e, "Binary cache miss"),
        }

        let data = self.fetch_remote(&url, &self.binary_headers).await?;

        let ttl = self.config.binary_ttl();
        if !ttl.is_zero() {
            if let Err(e) = self.cache.put_binary(&key, data.clone(), Some(ttl)).await {
                warn!(key = %key, error = %e, "Failed to persist binary response");
            }
        }
        Ok(data)
    }

    /// Empties every cache tier
    pub async fn clear_caches(&self) -> AppResult<()> {
        self.cache.clear_all().await?;
        info!("Caches cleared");
        Ok(())
    }

    pub async fn statistics(&self) -> AppResult<CacheStatistics> {
        self.cache.statistics().await
    }

    /// Removes expired entries from every tier
    pub async fn cleanup_caches(&self) -> AppResult<CleanupReport> {
        let report = self.cache.cleanup().await?;
        if report.total() > 0 {
            info!(
                text_expired = report.text_expired,
                binary_expired = report.binary_expired,
                disk_removed = report.disk_removed,
                "Cache cleanup removed entries"
            );
        }
        Ok(report)
    }

    pub fn breaker_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Starts the background sweeper at the configured `cleanup_interval_secs`
    pub fn spawn_cleanup(self: &Arc<Self>) -> CleanupHandle {
        CleanupHandle::spawn(Arc::clone(self), self.config.cleanup_interval())
    }

    /// The retry loop shared by text and binary fetches
    async fn fetch_remote(&self, url: &Url, headers: &HeaderMap) -> AppResult<Bytes> {
        let limiter = self.limiters.for_url(url);
        let timeout = self.config.request_timeout();
        let max_attempts = self.config.max_retry_attempts;
        let mut last_server_error: Option<AppError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 && self.breaker.state() == CircuitState::Open {
                warn!(url = %url, attempt, "Circuit opened during retries, giving up");
                return Err(AppError::service_unavailable());
            }

            limiter.acquire().await;
            let outcome =
                tokio::time::timeout(timeout, self.transport.get(url, headers, timeout)).await;

            let response: TransportResponse = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    warn!(url = %url, attempt, error = %e, "Request failed");
                    last_server_error = None;
                    self.backoff_after_failure(attempt).await;
                    continue;
                }
                Err(_) => {
                    self.breaker.record_failure();
                    warn!(
                        url = %url,
                        attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    last_server_error = None;
                    self.backoff_after_failure(attempt).await;
                    continue;
                }
            };

            if response.is_success() {
                self.breaker.record_success();
                debug!(url = %url, attempt, status = response.status, "Request succeeded");
                return Ok(response.body);
            }

            match response.status {
                429 => {
                    let wait = self.config.rate_limit_backoff();
                    warn!(
                        url = %url,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited by server"
                    );
                    last_server_error = None;
                    if attempt < max_attempts {
                        tokio::time::sleep(wait).await;
                    }
                }
                status => {
                    self.breaker.record_failure();
                    let err = AppError::api(status, status_message(status));
                    if !err.is_retryable() {
                        debug!(url = %url, status, "Request rejected");
                        return Err(err);
                    }
                    warn!(url = %url, attempt, status, "Server error");
                    last_server_error = Some(err);
                    self.backoff_after_failure(attempt).await;
                }
            }
        }

        Err(last_server_error.unwrap_or_else(|| AppError::network(RETRIES_EXHAUSTED)))
    }

    async fn backoff_after_failure(&self, attempt: u32) {
        if attempt < self.config.max_retry_attempts {
            let delay = self.config.retry_backoff(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }
}

fn status_message(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Paths are relative to the base URL: a leading `/` and no whitespace
fn validate_path(path: &str) -> AppResult<()> {
    if path.is_empty() {
        return Err(AppError::invalid("path", "must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(AppError::invalid("path", "must start with '/'"));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(AppError::invalid("path", "must not contain whitespace"));
    }
    Ok(())
}

fn parse_asset_url(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw).map_err(|e| AppError::invalid("url", e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::invalid("url", "must be an absolute http(s) URL"));
    }
    Ok(url)
}
