//! Response cache for the model client.
//!
//! Backed by a moka future cache with a fixed time-to-live. Entries also carry
//! their own `expires_at`, checked on every read, so an expired response is never
//! served even before moka's own eviction catches up.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::types::{GenerateRequest, GenerateResponse, ModelId, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::utils::text::truncate_chars;

const PROMPT_KEY_CHARS: usize = 500;
const CONTEXT_KEY_CHARS: usize = 200;
const SYSTEM_KEY_CHARS: usize = 200;

/// Deterministic hash of a request's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

#[derive(Hash)]
struct KeyShape<'a> {
    model: &'a str,
    prompt: &'a str,
    context: Option<&'a str>,
    system_instruction: Option<&'a str>,
    temperature_bits: u32,
    max_tokens: u32,
}

impl CacheKey {
    /// Key over model, text prefixes, temperature and max tokens.
    pub fn for_request(model: ModelId, request: &GenerateRequest) -> Self {
        let shape = KeyShape {
            model: model.as_str(),
            prompt: truncate_chars(&request.prompt, PROMPT_KEY_CHARS),
            context: request
                .context
                .as_deref()
                .map(|c| truncate_chars(c, CONTEXT_KEY_CHARS)),
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(|s| truncate_chars(s, SYSTEM_KEY_CHARS)),
            temperature_bits: request.temperature.unwrap_or(DEFAULT_TEMPERATURE).to_bits(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };
        let mut hasher = DefaultHasher::new();
        shape.hash(&mut hasher);
        CacheKey(hasher.finish())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: GenerateResponse,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

pub struct ResponseCache {
    entries: Cache<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { entries, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached response for `key`, marked `cached = true`, unless it has expired.
    pub async fn get(&self, key: &CacheKey) -> Option<GenerateResponse> {
        let entry = self.entries.get(key).await?;
        if Utc::now() > entry.expires_at {
            self.entries.invalidate(key).await;
            return None;
        }
        let mut response = entry.response;
        response.metadata.cached = true;
        Some(response)
    }

    pub async fn insert(&self, key: CacheKey, response: GenerateResponse) {
        let stored_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let entry = CacheEntry {
            response,
            stored_at,
            expires_at: stored_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.entries.insert(key, entry).await;
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    /// Remove expired entries. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now > entry.expires_at)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.entries.invalidate(key).await;
        }
        self.entries.run_pending_tasks().await;
        expired.len()
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        let mut stats = CacheStats::default();
        for (_, entry) in self.entries.iter() {
            stats.size += 1;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) if t <= entry.stored_at => t,
                _ => entry.stored_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) if t >= entry.stored_at => t,
                _ => entry.stored_at,
            });
        }
        stats
    }

    /// Periodically sweep expired entries. The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep().await;
                if removed > 0 {
                    tracing::info!("Cache cleanup: removed {} expired entries", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::{ResponseMetadata, Usage};

    fn response(content: &str) -> GenerateResponse {
        GenerateResponse {
            model: ModelId::Flash,
            content: content.to_string(),
            structured: None,
            usage: Usage::default(),
            metadata: ResponseMetadata {
                timestamp: Utc::now(),
                latency: 12,
                cached: false,
                retry_count: 0,
            },
        }
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let req = GenerateRequest::new("Summarize act one").with_context("ctx");
        assert_eq!(
            CacheKey::for_request(ModelId::Pro, &req),
            CacheKey::for_request(ModelId::Pro, &req.clone())
        );
    }

    #[test]
    fn test_cache_key_varies_with_shape() {
        let base = GenerateRequest::new("Summarize act one");
        let key = CacheKey::for_request(ModelId::Pro, &base);
        assert_ne!(key, CacheKey::for_request(ModelId::Flash, &base));
        assert_ne!(
            key,
            CacheKey::for_request(ModelId::Pro, &base.clone().with_temperature(0.2))
        );
        assert_ne!(
            key,
            CacheKey::for_request(ModelId::Pro, &base.clone().with_max_tokens(100))
        );
        assert_ne!(
            key,
            CacheKey::for_request(ModelId::Pro, &base.clone().with_system("sys"))
        );
    }

    #[test]
    fn test_cache_key_only_sees_prompt_prefix() {
        let prefix = "x".repeat(PROMPT_KEY_CHARS);
        let a = GenerateRequest::new(format!("{prefix}tail one"));
        let b = GenerateRequest::new(format!("{prefix}tail two"));
        assert_eq!(
            CacheKey::for_request(ModelId::Pro, &a),
            CacheKey::for_request(ModelId::Pro, &b)
        );

        let c = GenerateRequest::new(format!("y{}", &prefix[1..]));
        assert_ne!(
            CacheKey::for_request(ModelId::Pro, &a),
            CacheKey::for_request(ModelId::Pro, &c)
        );
    }

    #[tokio::test]
    async fn test_get_marks_cached_and_returns_latest_value() {
        let cache = ResponseCache::new(Duration::from_secs(60), 100);
        let key = CacheKey::for_request(ModelId::Flash, &GenerateRequest::new("p"));
        cache.insert(key, response("first")).await;
        cache.insert(key, response("second")).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.content, "second");
        assert!(hit.metadata.cached);
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_served() {
        let cache = ResponseCache::new(Duration::from_millis(40), 100);
        let key = CacheKey::for_request(ModelId::Flash, &GenerateRequest::new("p"));
        cache.insert(key, response("soon gone")).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60), 100);
        assert_eq!(cache.stats().await, CacheStats::default());

        for prompt in ["a", "b", "c"] {
            let key = CacheKey::for_request(ModelId::Flash, &GenerateRequest::new(prompt));
            cache.insert(key, response(prompt)).await;
        }
        let stats = cache.stats().await;
        assert_eq!(stats.size, 3);
        assert!(stats.oldest_entry.unwrap() <= stats.newest_entry.unwrap());

        cache.clear().await;
        assert_eq!(cache.stats().await.size, 0);
    }
}
