//! Test harness: a scripted model backend and client/pipeline wiring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use seven_stations::client::{BackendCall, ModelClient, ModelError, ModelId, TextBackend};
use seven_stations::config::ClientConfig;

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Backend error with an HTTP status (429/5xx retryable).
    Status(u16),
    /// Non-retryable backend error without status.
    Fatal(String),
    /// Answer after sleeping (tokio time, so paused tests stay instant).
    Slow(Duration, String),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

/// Backend that plays back a script and records every call.
///
/// When the script runs dry it repeats `default`, or fails with 503 if there
/// is none.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    default: Option<Reply>,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with `text`.
    pub fn always(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: Some(Reply::Text(text.into())),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn models_called(&self) -> Vec<ModelId> {
        self.calls().into_iter().map(|c| c.model).collect()
    }
}

#[async_trait]
impl TextBackend for ScriptedBackend {
    async fn generate(&self, call: &BackendCall) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(call.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default.clone())
            .unwrap_or(Reply::Status(503));
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Status(status) => Err(ModelError::backend_with_status(format!("HTTP {status}"), status)),
            Reply::Fatal(message) => Err(ModelError::backend(message, false)),
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Flash with FlashLite fallback, 3 retries, 30 s timeout, caching on and
/// rate limiting off.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        default_model: ModelId::Flash,
        fallback_model: Some(ModelId::FlashLite),
        max_retries: 3,
        timeout_secs: 30,
        enable_caching: true,
        enable_rate_limiting: false,
        requests_per_minute: 60,
        cache_ttl_secs: 3600,
        cache_sweep_secs: 0,
        cache_max_entries: 100,
    }
}

pub fn test_client(config: ClientConfig, backend: Arc<ScriptedBackend>) -> Arc<ModelClient> {
    Arc::new(ModelClient::new(config, backend).expect("valid test client config"))
}
