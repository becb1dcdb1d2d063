//! Aggregate configuration for an optimizer instance.
//!
//! Process-level configuration loading stays with the embedding
//! application; this module only defines the shapes and a JSON file helper
//! for convenience.

use crate::backend::BackendDescriptor;
use crate::cache::CacheConfig;
use crate::health::HealthConfig;
use crate::resilience::CircuitBreakerConfig;
use crate::routing::RouterWeights;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-backend configuration as it appears in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cost_per_input_token: f64,
    #[serde(default)]
    pub cost_per_output_token: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Endpoint for the generic HTTP adapter, when used.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_true() -> bool {
    true
}

impl BackendSettings {
    pub fn to_descriptor(&self) -> BackendDescriptor {
        let mut descriptor = BackendDescriptor::new(&self.name)
            .with_costs(self.cost_per_input_token, self.cost_per_output_token);
        if !self.enabled {
            descriptor = descriptor.disabled();
        }
        if !self.capabilities.is_empty() {
            descriptor.capabilities = self.capabilities.clone();
        }
        descriptor
    }
}

/// Everything an [`OptimizerBuilder`](crate::optimizer::OptimizerBuilder)
/// needs besides the adapters themselves.
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    pub backends: Vec<BackendSettings>,
    pub weights: RouterWeights,
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
}

impl Default for RouterWeightsFile {
    fn default() -> Self {
        let w = RouterWeights::default();
        Self {
            cost_weight: w.cost,
            latency_weight: w.latency,
            availability_weight: w.availability,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RouterWeightsFile {
    cost_weight: f64,
    latency_weight: f64,
    availability_weight: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheFile {
    ttl_secs: Option<u64>,
    max_entries: Option<usize>,
    storage_location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BreakerFile {
    failure_threshold: Option<u32>,
    reset_interval_secs: Option<u64>,
    max_reset_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HealthFile {
    probe_ttl_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConfigFile {
    backends: Vec<BackendSettings>,
    weights: RouterWeightsFile,
    cache: CacheFile,
    breaker: BreakerFile,
    health: HealthFile,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            weights: RouterWeightsFile::default(),
            cache: CacheFile::default(),
            breaker: BreakerFile::default(),
            health: HealthFile::default(),
        }
    }
}

impl OptimizerConfig {
    /// Load configuration from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("optimizer_config"),
            )
        })?;
        let file: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to parse config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("optimizer_config"),
            )
        })?;

        let mut cache = CacheConfig::default();
        if let Some(secs) = file.cache.ttl_secs {
            cache = cache.with_ttl(Duration::from_secs(secs));
        }
        if let Some(n) = file.cache.max_entries {
            cache = cache.with_max_entries(n);
        }
        if let Some(dir) = file.cache.storage_location {
            cache = cache.with_storage_location(dir);
        }

        let mut breaker = CircuitBreakerConfig::default();
        if let Some(threshold) = file.breaker.failure_threshold {
            breaker = breaker.with_failure_threshold(threshold);
        }
        if let Some(secs) = file.breaker.reset_interval_secs {
            breaker = breaker.with_reset_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = file.breaker.max_reset_interval_secs {
            breaker = breaker.with_max_reset_interval(Duration::from_secs(secs));
        }

        let mut health = HealthConfig::default();
        if let Some(secs) = file.health.probe_ttl_secs {
            health = health.with_probe_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = file.health.probe_timeout_secs {
            health = health.with_probe_timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            backends: file.backends,
            weights: RouterWeights::new(
                file.weights.cost_weight,
                file.weights.latency_weight,
                file.weights.availability_weight,
            ),
            cache,
            breaker,
            health,
        })
    }
}
