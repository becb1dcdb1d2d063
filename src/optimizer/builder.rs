use crate::backend::{BackendAdapter, BackendDescriptor};
use crate::cache::{CacheConfig, CacheStore, FileStore, Fingerprinter, NullStore, ResponseCache};
use crate::config::OptimizerConfig;
use crate::health::{HealthConfig, HealthMonitor};
use crate::registry::BackendRegistry;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerSet};
use crate::routing::RouterWeights;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use super::core::Optimizer;

/// Builder for creating optimizers with custom configuration.
///
/// Keep this surface area small and predictable (developer-friendly).
pub struct OptimizerBuilder {
    backends: Vec<(BackendDescriptor, Arc<dyn BackendAdapter>)>,
    weights: RouterWeights,
    cache_config: CacheConfig,
    breaker_config: CircuitBreakerConfig,
    health_config: HealthConfig,
    store: Option<Arc<dyn CacheStore>>,
    max_inflight: Option<usize>,
    maintenance_interval: Duration,
    fingerprint_salt: Option<String>,
}

impl OptimizerBuilder {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            weights: RouterWeights::default(),
            cache_config: CacheConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            health_config: HealthConfig::default(),
            store: None,
            max_inflight: None,
            maintenance_interval: Duration::from_secs(60),
            fingerprint_salt: None,
        }
    }

    /// Seed weights and component configs from an [`OptimizerConfig`].
    /// Adapters still need to be attached via
    /// [`with_backend`](Self::with_backend).
    pub fn from_config(config: &OptimizerConfig) -> Self {
        let mut builder = Self::new();
        builder.weights = config.weights;
        builder.cache_config = config.cache.clone();
        builder.breaker_config = config.breaker.clone();
        builder.health_config = config.health.clone();
        builder
    }

    /// Register a backend adapter with its descriptor.
    pub fn with_backend(
        mut self,
        descriptor: BackendDescriptor,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Self {
        self.backends.push((descriptor, adapter));
        self
    }

    /// Set routing weights. Weights not summing to 1 are normalized at
    /// build time with a warning.
    pub fn with_weights(mut self, weights: RouterWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Inject a durable store, overriding `cache.storage_location`.
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Limit maximum number of in-flight backend calls.
    /// This is a simple backpressure mechanism for production safety.
    pub fn max_inflight(mut self, n: usize) -> Self {
        self.max_inflight = Some(n.max(1));
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Namespace cache fingerprints, e.g. per deployment sharing one store.
    pub fn with_fingerprint_salt(mut self, salt: impl Into<String>) -> Self {
        self.fingerprint_salt = Some(salt.into());
        self
    }

    /// Build the optimizer.
    ///
    /// Environment overrides, in the usual deploy-without-recompile manner:
    /// - `AI_OPT_BREAKER_FAILURE_THRESHOLD`
    /// - `AI_OPT_BREAKER_RESET_SECS`
    /// - `AI_OPT_MAX_INFLIGHT`
    pub fn build(self) -> Result<Optimizer> {
        let mut breaker_config = self.breaker_config;
        if let Some(threshold) = std::env::var("AI_OPT_BREAKER_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            breaker_config = breaker_config.with_failure_threshold(threshold);
        }
        if let Some(secs) = std::env::var("AI_OPT_BREAKER_RESET_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            breaker_config = breaker_config.with_reset_interval(Duration::from_secs(secs.max(1)));
        }

        let max_inflight = self.max_inflight.or_else(|| {
            std::env::var("AI_OPT_MAX_INFLIGHT")
                .ok()?
                .parse::<usize>()
                .ok()
        });
        let inflight = max_inflight.map(|n| Arc::new(Semaphore::new(n.max(1))));

        let weights = if self.weights.is_normalized() {
            self.weights
        } else {
            let normalized = self.weights.normalized().ok_or_else(|| {
                Error::configuration_with_context(
                    "routing weights must have a positive sum",
                    ErrorContext::new()
                        .with_field_path("weights")
                        .with_source("optimizer_builder"),
                )
            })?;
            warn!(
                cost = self.weights.cost,
                latency = self.weights.latency,
                availability = self.weights.availability,
                "routing weights do not sum to 1, normalizing"
            );
            normalized
        };

        let store: Arc<dyn CacheStore> = match self.store {
            Some(store) => store,
            None => match self.cache_config.storage_location.as_ref() {
                Some(dir) => Arc::new(FileStore::new(dir)?),
                None => Arc::new(NullStore::new()),
            },
        };

        let registry = Arc::new(BackendRegistry::new());
        for (descriptor, adapter) in self.backends {
            registry.register(descriptor, adapter);
        }

        let mut fingerprinter = Fingerprinter::new();
        if let Some(salt) = self.fingerprint_salt {
            fingerprinter = fingerprinter.with_salt(salt);
        }

        Ok(Optimizer::new(
            registry,
            Arc::new(ResponseCache::new(self.cache_config, store)),
            Arc::new(HealthMonitor::new(self.health_config)),
            Arc::new(CircuitBreakerSet::new(breaker_config)),
            weights,
            fingerprinter,
            inflight,
            self.maintenance_interval,
        ))
    }
}

impl Default for OptimizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
