//! 核心类型：请求、选项与优化结果的强类型表示。
//!
//! Core request/response types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A file attached to a completion request.
///
/// File contents participate in fingerprinting in declared order, so two
/// requests that attach the same files in a different order are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub name: String,
    pub content: String,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Options accompanying a completion request.
///
/// Only the output-affecting subset (`model`, `temperature`, `max_tokens`)
/// participates in the cache fingerprint. `bypass_cache`, exclusions and the
/// wait timeout are delivery controls and never change the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Preferred model identifier, forwarded verbatim to the chosen backend.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Skip the cache for this call. The backend chain still runs.
    #[serde(default)]
    pub bypass_cache: bool,
    /// Backends this caller refuses, by name.
    #[serde(default)]
    pub exclude_backends: Vec<String>,
    /// Upper bound on how long this caller waits for a coalesced result.
    /// Cancels only this caller's wait, never the shared computation.
    #[serde(skip)]
    pub wait_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn exclude_backend(mut self, name: impl Into<String>) -> Self {
        self.exclude_backends.push(name.into());
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// A validated completion request flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub files: Vec<AttachedFile>,
    pub options: RequestOptions,
}

/// The result of a completed `optimize` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedResponse {
    pub content: String,
    pub backend_used: String,
    pub cache_hit: bool,
    pub cost_eur: f64,
    pub tokens_input: u32,
    pub tokens_output: u32,
}

/// Aggregated cache counters exposed through `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub hit_rate: f64,
    pub entries_count: usize,
    pub total_requests: u64,
    pub cache_hits: u64,
}

/// Per-backend view combining health and circuit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub enabled: bool,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub circuit_state: String,
    pub consecutive_failures: u32,
}

/// Snapshot of the whole optimizer, for operators and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub healthy: bool,
    pub cache: CacheStatus,
    pub backends: Vec<BackendStatus>,
}
