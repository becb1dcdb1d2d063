//! The orchestrator: fingerprint → cache → selection → invoke → record.

use crate::backend::BackendAdapter;
use crate::cache::{Fingerprinter, ResponseCache};
use crate::error::AttemptFailure;
use crate::health::HealthMonitor;
use crate::registry::BackendRegistry;
use crate::resilience::{CircuitBreakerSet, CircuitState, Permit};
use crate::routing::{self, Candidate, RouterWeights};
use crate::types::{
    AttachedFile, BackendStatus, CacheStatus, CompletionRequest, OptimizedResponse, RequestOptions,
    StatusReport,
};
use crate::{Error, ErrorContext, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latency assumed for a backend nobody has observed yet.
const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// Shared pipeline state handed to the fallback chain, which may outlive the
/// calling task when it runs as a coalesced computation.
#[derive(Clone)]
pub(crate) struct ChainContext {
    pub registry: Arc<BackendRegistry>,
    pub health: Arc<HealthMonitor>,
    pub breakers: Arc<CircuitBreakerSet>,
    pub weights: RouterWeights,
    pub inflight: Option<Arc<Semaphore>>,
}

/// The explicit context object wiring fingerprinting, caching, health,
/// circuit breaking and weighted selection into one request pipeline.
///
/// Create one per deployment (or per test) through
/// [`OptimizerBuilder`](super::OptimizerBuilder); nothing here is a global.
pub struct Optimizer {
    registry: Arc<BackendRegistry>,
    cache: Arc<ResponseCache<OptimizedResponse>>,
    health: Arc<HealthMonitor>,
    breakers: Arc<CircuitBreakerSet>,
    weights: RouterWeights,
    fingerprinter: Fingerprinter,
    inflight: Option<Arc<Semaphore>>,
    maintenance_interval: Duration,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("weights", &self.weights)
            .field("maintenance_interval", &self.maintenance_interval)
            .finish_non_exhaustive()
    }
}

impl Optimizer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: Arc<BackendRegistry>,
        cache: Arc<ResponseCache<OptimizedResponse>>,
        health: Arc<HealthMonitor>,
        breakers: Arc<CircuitBreakerSet>,
        weights: RouterWeights,
        fingerprinter: Fingerprinter,
        inflight: Option<Arc<Semaphore>>,
        maintenance_interval: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            health,
            breakers,
            weights,
            fingerprinter,
            inflight,
            maintenance_interval,
            maintenance: Mutex::new(None),
        }
    }

    /// Start background cache maintenance. Idempotent.
    pub async fn initialize(&self) {
        let mut guard = self.maintenance.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let interval = self.maintenance_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.cleanup().await;
            }
        }));
        info!(maintenance_secs = interval.as_secs(), "optimizer initialized");
    }

    /// Stop background maintenance and run one final cleanup cycle.
    pub async fn shutdown(&self) {
        let handle = self.maintenance.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.cache.cleanup().await;
        info!("optimizer shut down");
    }

    /// Run one completion request through the pipeline.
    ///
    /// Validates the input, derives the fingerprint, consults the cache
    /// (unless `bypass_cache` is set), and on a miss runs weighted selection
    /// with circuit-aware fallback. A bypassed call runs the same backend
    /// chain but leaves any existing cache entry untouched.
    pub async fn optimize(
        &self,
        prompt: &str,
        files: Vec<AttachedFile>,
        options: RequestOptions,
    ) -> Result<OptimizedResponse> {
        super::validation::validate_request(prompt, &files)?;

        let request_id = uuid::Uuid::new_v4();
        let fingerprint = self.fingerprinter.fingerprint(prompt, &files, &options);
        debug!(
            request_id = %request_id,
            fingerprint = fingerprint.as_str(),
            bypass = options.bypass_cache,
            "optimize request accepted"
        );

        let wait_timeout = options.wait_timeout;
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            files,
            options,
        };
        let ctx = ChainContext {
            registry: Arc::clone(&self.registry),
            health: Arc::clone(&self.health),
            breakers: Arc::clone(&self.breakers),
            weights: self.weights,
            inflight: self.inflight.clone(),
        };

        if request.options.bypass_cache {
            return run_chain(ctx, request).await;
        }

        let ttl = self.cache.config().ttl;
        let shared = self
            .cache
            .get_or_compute(&fingerprint, ttl, move || run_chain(ctx, request));

        let (mut response, cache_hit) = match wait_timeout {
            Some(limit) => tokio::time::timeout(limit, shared).await.map_err(|_| {
                Error::runtime_with_context(
                    "timed out waiting for in-flight computation",
                    ErrorContext::new()
                        .with_details(format!("waited {:?}", limit))
                        .with_source("optimizer"),
                )
            })??,
            None => shared.await?,
        };
        response.cache_hit = cache_hit;
        Ok(response)
    }

    /// Convenience wrapper for prompt-only requests.
    pub async fn optimize_prompt(&self, prompt: &str) -> Result<OptimizedResponse> {
        self.optimize(prompt, Vec::new(), RequestOptions::default())
            .await
    }

    /// Aggregate health, circuit and cache view.
    pub async fn status(&self) -> StatusReport {
        let adapters = self.registry.adapters();
        let records = self.health.check_all(&adapters).await;

        let mut backends = Vec::new();
        for descriptor in self.registry.descriptors() {
            let record = records.iter().find(|r| r.backend_name == descriptor.name);
            let circuit = self.breakers.snapshot_of(&descriptor.name);
            backends.push(BackendStatus {
                name: descriptor.name.clone(),
                enabled: descriptor.enabled,
                healthy: record.map(|r| r.healthy).unwrap_or(false),
                latency_ms: record.map(|r| r.measured_latency.as_millis() as u64),
                circuit_state: circuit
                    .as_ref()
                    .map(|s| s.state.to_string())
                    .unwrap_or_else(|| CircuitState::Closed.to_string()),
                consecutive_failures: circuit.map(|s| s.consecutive_failures).unwrap_or(0),
            });
        }

        let stats = self.cache.stats().await;
        let healthy = backends
            .iter()
            .any(|b| b.enabled && b.healthy && b.circuit_state != CircuitState::Open.as_str());

        StatusReport {
            healthy,
            cache: CacheStatus {
                hit_rate: stats.hit_rate(),
                entries_count: stats.entries_count,
                total_requests: stats.total_requests,
                cache_hits: stats.cache_hits,
            },
            backends,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache<OptimizedResponse> {
        &self.cache
    }
}

/// Selection + fallback protocol.
///
/// Re-selects (excluding already-attempted backends) until a call succeeds,
/// a non-retryable failure surfaces, or the eligible set is exhausted.
pub(crate) async fn run_chain(
    ctx: ChainContext,
    request: CompletionRequest,
) -> Result<OptimizedResponse> {
    let mut attempts: Vec<AttemptFailure> = Vec::new();
    let mut tried: HashSet<String> = HashSet::new();

    loop {
        let base: Vec<_> = ctx
            .registry
            .descriptors()
            .into_iter()
            .filter(|d| {
                d.enabled
                    && !request.options.exclude_backends.contains(&d.name)
                    && !tried.contains(&d.name)
            })
            .collect();

        if base.is_empty() {
            return Err(exhausted(attempts, Vec::new()));
        }

        // Circuit filter first: OPEN backends are rejected without a call.
        let mut open_names: Vec<String> = Vec::new();
        let mut selectable = Vec::new();
        for descriptor in base {
            match ctx.breakers.state_of(&descriptor.name) {
                CircuitState::Open => open_names.push(descriptor.name.clone()),
                _ => selectable.push(descriptor),
            }
        }

        if selectable.is_empty() {
            return Err(exhausted(attempts, open_names));
        }

        let candidates: Vec<Candidate> = selectable
            .iter()
            .map(|d| Candidate {
                name: d.name.clone(),
                cost_per_token: d.cost_per_token(),
                avg_latency: ctx
                    .health
                    .avg_latency(&d.name)
                    .or_else(|| ctx.health.snapshot(&d.name).map(|r| r.measured_latency))
                    .unwrap_or(DEFAULT_LATENCY),
                availability: match ctx.health.snapshot(&d.name) {
                    Some(record) if record.healthy => 1.0,
                    Some(_) => 0.0,
                    None => 1.0,
                },
            })
            .collect();

        // Walk the ranking until a breaker admits the call. HALF_OPEN
        // backends hand out a single trial; a held trial skips the backend
        // without recording an attempt.
        let ranked = routing::rank(&candidates, &ctx.weights);
        let mut admitted = None;
        for entry in &ranked {
            // Adapter resolution happens before taking a permit so a backend
            // unregistered mid-flight can never strand a HALF_OPEN trial.
            let Some(adapter) = ctx.registry.adapter(&entry.candidate.name) else {
                continue;
            };
            let breaker = ctx.breakers.breaker(&entry.candidate.name);
            match breaker.acquire() {
                Ok(permit) => {
                    admitted = Some((entry.candidate.name.clone(), adapter, permit, breaker));
                    break;
                }
                Err(_) => {
                    open_names.push(entry.candidate.name.clone());
                }
            }
        }

        let Some((backend_name, adapter, permit, breaker)) = admitted else {
            return Err(exhausted(attempts, open_names));
        };

        if permit == Permit::Trial {
            debug!(backend = backend_name.as_str(), "half-open recovery trial");
        }

        match invoke(&ctx, adapter.as_ref(), &request).await {
            Ok((reply, latency)) => {
                breaker.on_success();
                ctx.health.record_latency(&backend_name, latency);
                info!(
                    backend = backend_name.as_str(),
                    duration_ms = latency.as_millis() as u64,
                    cost_eur = reply.cost_eur,
                    tokens_input = reply.tokens_input,
                    tokens_output = reply.tokens_output,
                    "backend call succeeded"
                );
                return Ok(OptimizedResponse {
                    content: reply.content,
                    backend_used: reply.backend_name,
                    cache_hit: false,
                    cost_eur: reply.cost_eur,
                    tokens_input: reply.tokens_input,
                    tokens_output: reply.tokens_output,
                });
            }
            Err(err) => {
                breaker.on_failure();
                warn!(backend = backend_name.as_str(), error = %err, "backend call failed");
                attempts.push(AttemptFailure {
                    backend: backend_name.clone(),
                    error: err.to_string(),
                });
                if !err.is_retryable() {
                    // Authentication / malformed request: no other backend
                    // will fare better, abort the chain.
                    return Err(err);
                }
                tried.insert(backend_name);
            }
        }
    }
}

async fn invoke(
    ctx: &ChainContext,
    adapter: &dyn BackendAdapter,
    request: &CompletionRequest,
) -> Result<(crate::backend::BackendReply, Duration)> {
    let _permit = match &ctx.inflight {
        Some(semaphore) => Some(
            Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map_err(|_| {
                    Error::runtime_with_context(
                        "backpressure semaphore closed",
                        ErrorContext::new().with_source("optimizer"),
                    )
                })?,
        ),
        None => None,
    };
    let started = Instant::now();
    let reply = adapter.send(request).await?;
    Ok((reply, started.elapsed()))
}

/// Aggregate error for an exhausted chain: no attempts but open circuits ⇒
/// everything was circuit-blocked; otherwise the per-attempt collection.
fn exhausted(attempts: Vec<AttemptFailure>, open: Vec<String>) -> Error {
    if attempts.is_empty() {
        if !open.is_empty() {
            let mut backends = open;
            backends.sort();
            backends.dedup();
            return Error::CircuitOpen { backends };
        }
        return Error::runtime_with_context(
            "no eligible backends",
            ErrorContext::new()
                .with_details("all backends disabled, excluded, or unregistered")
                .with_source("optimizer"),
        );
    }
    Error::AllBackendsFailed { attempts }
}
