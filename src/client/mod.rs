//! Resilient model client.
//!
//! Wraps a [`TextBackend`] with a response cache, a sliding-window rate limiter,
//! retry with exponential backoff, a per-attempt timeout and a single fallback
//! model attempt.

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod error;
pub mod rate_limit;
pub mod types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::utils::text::estimate_tokens;

pub use backend::{BackendCall, GeminiBackend, TextBackend};
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use cancel::CancelToken;
pub use error::ModelError;
pub use rate_limit::{RateLimitStats, SlidingWindowLimiter};
pub use types::*;

const BASE_RETRY_DELAY_MS: u64 = 1_000;
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Backoff before the retry that follows failed attempt `attempt` (0-indexed):
/// `min(1000 * 2^attempt, 30000)` ms.
pub fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_RETRY_DELAY_MS.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

// =============================================================================
// USAGE ACCOUNTING
// =============================================================================

/// One network attempt, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub model: ModelId,
    pub attempt: u32,
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub requests: u64,
    pub cache_hits: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Default)]
struct UsageCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageCounters {
    fn record(&self, record: &AttemptRecord) {
        tracing::debug!(
            model = %record.model,
            attempt = record.attempt,
            latency_ms = record.latency_ms,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            error = record.error_code.unwrap_or("none"),
            "model attempt"
        );
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if record.error_code.is_some() {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        self.prompt_tokens
            .fetch_add(record.prompt_tokens as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(record.completion_tokens as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> UsageTotals {
        UsageTotals {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Construct once and share (`Arc<ModelClient>`) between stations. Cache and
/// rate-limit state are per client.
pub struct ModelClient {
    config: ClientConfig,
    backend: Arc<dyn TextBackend>,
    cache: Option<Arc<ResponseCache>>,
    limiter: SlidingWindowLimiter,
    usage: UsageCounters,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Drop for ModelClient {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl ModelClient {
    /// Build a client. The cache sweeper is only started inside a tokio runtime.
    pub fn new(config: ClientConfig, backend: Arc<dyn TextBackend>) -> Result<Self, ModelError> {
        if config.enable_rate_limiting && config.requests_per_minute == 0 {
            return Err(ModelError::Config(
                "requests_per_minute must be at least 1".into(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(ModelError::Config("timeout_secs must be at least 1".into()));
        }

        let cache = config.enable_caching.then(|| {
            Arc::new(ResponseCache::new(
                config.cache_ttl(),
                config.cache_max_entries,
            ))
        });
        let sweeper = match (&cache, tokio::runtime::Handle::try_current()) {
            (Some(cache), Ok(_)) if config.cache_sweep_secs > 0 => {
                Some(cache.spawn_sweeper(config.cache_sweep_interval()))
            }
            _ => None,
        };
        let limiter = if config.enable_rate_limiting {
            SlidingWindowLimiter::per_minute(config.requests_per_minute)
        } else {
            SlidingWindowLimiter::disabled()
        };

        tracing::info!(
            "Model client ready: {} (fallback: {}), backend {}",
            config.default_model,
            config
                .fallback_model
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".into()),
            backend.name()
        );

        Ok(Self {
            config,
            backend,
            cache,
            limiter,
            usage: UsageCounters::default(),
            sweeper,
        })
    }

    /// Client over the Gemini REST backend, keyed from `GEMINI_API_KEY`.
    pub fn from_env(config: ClientConfig) -> Result<Self, ModelError> {
        let backend = GeminiBackend::from_env()?;
        Self::new(config, Arc::new(backend))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ModelError> {
        self.generate_with_cancel(request, &CancelToken::new()).await
    }

    /// Generate, aborting early with [`ModelError::Cancelled`] once `cancel` fires.
    pub async fn generate_with_cancel(
        &self,
        request: GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<GenerateResponse, ModelError> {
        if request.prompt.trim().is_empty() {
            return Err(ModelError::EmptyPrompt);
        }
        let model = match request.model.as_deref() {
            Some(name) => name.parse::<ModelId>()?,
            None => self.config.default_model,
        };
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        self.usage.requests.fetch_add(1, Ordering::Relaxed);

        let key = CacheKey::for_request(model, &request);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                tracing::debug!("Cache hit for {} (key {:x})", model, key.value());
                self.usage.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
        }

        let call = self.backend_call(model, &request);
        let mut failures = 0u32;
        let response = match self.run_primary(&call, &request, cancel, &mut failures).await {
            Ok(response) => response,
            Err(err) if err.is_fatal() => return Err(err),
            Err(exhausted) => {
                let last = match exhausted {
                    ModelError::ExhaustedRetries { source, .. } => *source,
                    other => other,
                };
                match self.fallback_for(model) {
                    None => {
                        tracing::error!("{} failed and no fallback is configured: {}", model, last);
                        return Err(ModelError::AllModelsFailed {
                            models: model.to_string(),
                            source: Box::new(last),
                        });
                    }
                    Some(fallback) => {
                        tracing::warn!(
                            "Primary model {} exhausted retries ({}). Trying fallback {}",
                            model,
                            last.code(),
                            fallback
                        );
                        let call = BackendCall {
                            model: fallback,
                            ..call
                        };
                        match self.attempt(&call, &request, cancel, 0, failures).await {
                            Ok(response) => response,
                            Err(err) if matches!(err, ModelError::Cancelled) => return Err(err),
                            Err(err) => {
                                tracing::error!("Fallback model {} failed: {}", fallback, err);
                                return Err(ModelError::AllModelsFailed {
                                    models: format!("{model}, {fallback}"),
                                    source: Box::new(err),
                                });
                            }
                        }
                    }
                }
            }
        };

        if let Some(cache) = &self.cache {
            cache.insert(key, response.clone()).await;
        }
        Ok(response)
    }

    fn fallback_for(&self, model: ModelId) -> Option<ModelId> {
        self.config.fallback_model.filter(|f| *f != model)
    }

    fn backend_call(&self, model: ModelId, request: &GenerateRequest) -> BackendCall {
        BackendCall {
            model,
            prompt: request.full_prompt(),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_output_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            top_p: request.top_p.unwrap_or(DEFAULT_TOP_P),
            top_k: request.top_k.unwrap_or(DEFAULT_TOP_K),
            stop_sequences: request.stop_sequences.clone(),
        }
    }

    /// Up to `max_retries + 1` attempts against the primary model.
    async fn run_primary(
        &self,
        call: &BackendCall,
        request: &GenerateRequest,
        cancel: &CancelToken,
        failures: &mut u32,
    ) -> Result<GenerateResponse, ModelError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(call, request, cancel, attempt, *failures).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    *failures += 1;
                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(ModelError::ExhaustedRetries {
                            model: call.model.to_string(),
                            attempts: attempt + 1,
                            source: Box::new(err),
                        });
                    }
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        "Request to {} failed ({}). Retrying in {}ms (attempt {}/{})",
                        call.model,
                        err,
                        delay.as_millis(),
                        attempt + 1,
                        self.config.max_retries
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One rate-limited, timeout-bounded network attempt plus response shaping.
    async fn attempt(
        &self,
        call: &BackendCall,
        request: &GenerateRequest,
        cancel: &CancelToken,
        attempt: u32,
        failures_so_far: u32,
    ) -> Result<GenerateResponse, ModelError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            _ = self.limiter.acquire() => {}
        }

        let timeout = self.config.timeout();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            result = tokio::time::timeout(timeout, self.backend.generate(call)) => {
                result.unwrap_or(Err(ModelError::Timeout(timeout)))
            }
        };
        let latency = started.elapsed();

        let prompt_tokens = estimate_tokens(&call.prompt);
        let shaped = outcome.and_then(|text| shape_response(request, text));
        let completion_tokens = shaped
            .as_ref()
            .map(|(content, _)| estimate_tokens(content))
            .unwrap_or(0);
        self.usage.record(&AttemptRecord {
            model: call.model,
            attempt,
            latency_ms: latency.as_millis() as u64,
            prompt_tokens,
            completion_tokens,
            error_code: shaped.as_ref().err().map(|e| e.code()),
        });

        let (content, structured) = shaped?;
        Ok(GenerateResponse {
            model: call.model,
            content,
            structured,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            metadata: ResponseMetadata {
                timestamp: Utc::now(),
                latency: latency.as_millis() as u64,
                cached: false,
                retry_count: failures_so_far,
            },
        })
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
            tracing::info!("Response cache cleared");
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        match &self.cache {
            Some(cache) => cache.stats().await,
            None => CacheStats::default(),
        }
    }

    pub async fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats().await
    }

    pub fn usage_totals(&self) -> UsageTotals {
        self.usage.snapshot()
    }

    /// Tiny round trip against the default model.
    pub async fn test_connection(&self) -> bool {
        let request = GenerateRequest::new("Test connection. Reply with \"OK\".")
            .with_temperature(0.1)
            .with_max_tokens(10);
        match self.generate(request).await {
            Ok(_) => {
                tracing::info!("Connection test successful");
                true
            }
            Err(e) => {
                tracing::error!("Connection test failed: {}", e);
                false
            }
        }
    }
}

/// Run the request's validator, substituting a partial value when allowed.
fn shape_response(
    request: &GenerateRequest,
    text: String,
) -> Result<(String, Option<serde_json::Value>), ModelError> {
    let Some(validator) = &request.validator else {
        return Ok((text, None));
    };
    match validator(&text) {
        Ok(value) => Ok((text, Some(value))),
        Err(reason) => {
            if request.allow_partial {
                if let Some(partial) = request.on_partial_fallback.as_ref().and_then(|f| f(&text)) {
                    tracing::warn!("Validation failed ({}); using partial result", reason);
                    return Ok((text, Some(partial)));
                }
            }
            Err(ModelError::ValidationFailure(reason))
        }
    }
}
