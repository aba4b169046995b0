//! Layered configuration: TOML file, then environment overrides, then defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ModelId;

pub const CONFIG_FILE_NAME: &str = "stations.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationsConfig {
    pub client: ClientConfig,
    pub pipeline: PipelineConfig,
    pub diagnostics: DiagnosticsConfig,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub default_model: ModelId,
    /// Tried once after the default model exhausts its retries. Ignored when equal to the default.
    pub fallback_model: Option<ModelId>,
    pub max_retries: u32,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    pub enable_caching: bool,
    pub enable_rate_limiting: bool,
    pub requests_per_minute: u32,
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    pub cache_max_entries: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_model: ModelId::Flash,
            fallback_model: Some(ModelId::FlashLite),
            max_retries: 3,
            timeout_secs: 120,
            enable_caching: true,
            enable_rate_limiting: true,
            requests_per_minute: 60,
            cache_ttl_secs: 3600,
            cache_sweep_secs: 300,
            cache_max_entries: 1_000,
        }
    }
}

impl ClientConfig {
    /// Pro with a Flash fallback, generous retries, caching and rate limiting on.
    pub fn production() -> Self {
        Self {
            default_model: ModelId::Pro,
            fallback_model: Some(ModelId::Flash),
            max_retries: 5,
            timeout_secs: 180,
            enable_caching: true,
            enable_rate_limiting: true,
            requests_per_minute: 50,
            ..Self::default()
        }
    }

    /// Flash with a Flash-Lite fallback, fast failure, no caching or rate limiting.
    pub fn development() -> Self {
        Self {
            default_model: ModelId::Flash,
            fallback_model: Some(ModelId::FlashLite),
            max_retries: 2,
            timeout_secs: 60,
            enable_caching: false,
            enable_rate_limiting: false,
            requests_per_minute: 100,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceMode {
    #[default]
    Rules,
    Model,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyMode {
    #[default]
    Heuristic,
    Sampling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for a single station. `None` means unbounded.
    pub stage_timeout_secs: Option<u64>,
    pub compliance: ComplianceMode,
    pub uncertainty: UncertaintyMode,
    /// Samples drawn per field by the sampling estimator.
    pub uncertainty_samples: usize,
    /// Character budget for the input excerpt embedded in station prompts.
    pub max_prompt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: None,
            compliance: ComplianceMode::default(),
            uncertainty: UncertaintyMode::default(),
            uncertainty_samples: 3,
            max_prompt_chars: 30_000,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Relationship degree at which a character counts as a critical node.
    pub critical_degree: usize,
    /// Days without activity before a conflict is abandoned.
    pub abandoned_after_days: i64,
    /// Conflicts weaker than this are flagged as weak involvement.
    pub weak_involvement_below: f64,
    /// Relationships and conflicts weaker than this are weak connections.
    pub weak_connection_below: f64,
    pub overload_threshold: usize,
    pub target_load: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            critical_degree: 3,
            abandoned_after_days: 30,
            weak_involvement_below: 3.0,
            weak_connection_below: 4.0,
            overload_threshold: 8,
            target_load: 6,
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// Load configuration.
///
/// File priority: `explicit` → `STATIONS_CONFIG` → `./stations.toml` →
/// `<config dir>/seven-stations/stations.toml`. A missing or broken file falls back
/// to defaults with a warning. Environment overrides are applied last.
pub fn load_config(explicit: Option<&Path>) -> StationsConfig {
    let mut config = candidate_paths(explicit)
        .into_iter()
        .find(|p| p.exists())
        .and_then(|path| read_config_file(&path))
        .unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var("STATIONS_CONFIG") {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("seven-stations").join(CONFIG_FILE_NAME));
    }
    paths
}

fn read_config_file(path: &Path) -> Option<StationsConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<StationsConfig>(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}. Using default.", path.display(), e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read {}: {}. Using default.", path.display(), e);
            None
        }
    }
}

/// Apply `STATIONS_*` overrides. `lookup` is `std::env::var` outside of tests.
pub fn apply_env_overrides(config: &mut StationsConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
    ) -> Option<T> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring {}={:?}: not a number", key, raw);
                None
            }
        }
    }

    if let Some(rpm) = parsed(&lookup, "STATIONS_REQUESTS_PER_MINUTE") {
        config.client.requests_per_minute = rpm;
    }
    if let Some(retries) = parsed(&lookup, "STATIONS_MAX_RETRIES") {
        config.client.max_retries = retries;
    }
    if let Some(secs) = parsed(&lookup, "STATIONS_TIMEOUT_SECS") {
        config.client.timeout_secs = secs;
    }
}
