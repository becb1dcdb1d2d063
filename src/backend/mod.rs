//! 后端适配层：统一的提供方接口与内置适配器。
//!
//! # Backend Module
//!
//! One capability interface ([`BackendAdapter`]) with independent named
//! implementations; the selector and orchestrator depend only on the trait
//! plus [`BackendDescriptor`] metadata, never on a concrete provider.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BackendAdapter`] | `send` / `health_check` boundary every provider implements |
//! | [`BackendDescriptor`] | Name, enablement, per-token costs, capabilities |
//! | [`BackendReply`] | Content plus reported tokens and cost |
//! | [`HealthProbe`] | Probe outcome consumed by the health monitor |
//! | [`HttpBackend`] | Generic OpenAI-compatible HTTP adapter |
//! | [`StaticBackend`] | Deterministic in-process adapter for tests and demos |

mod http;

pub use http::HttpBackend;

use crate::error::BackendErrorKind;
use crate::types::CompletionRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Static metadata describing a registered backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub enabled: bool,
    /// EUR per input token.
    pub cost_per_input_token: f64,
    /// EUR per output token.
    pub cost_per_output_token: f64,
    pub capabilities: Vec<String>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            capabilities: vec!["chat".to_string()],
        }
    }

    pub fn with_costs(mut self, input: f64, output: f64) -> Self {
        self.cost_per_input_token = input;
        self.cost_per_output_token = output;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Combined per-token cost used for routing comparisons.
    pub fn cost_per_token(&self) -> f64 {
        self.cost_per_input_token + self.cost_per_output_token
    }
}

/// What a backend returns for a completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReply {
    pub content: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_eur: f64,
    pub backend_name: String,
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthProbe {
    pub healthy: bool,
    pub latency: Duration,
}

/// The provider boundary. Implementations own their transport and auth
/// details; failures surface as [`Error::Backend`] with a kind that drives
/// the fallback decision.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, request: &CompletionRequest) -> Result<BackendReply>;
    async fn health_check(&self) -> Result<HealthProbe>;
}

/// Rough token estimate for adapters whose provider does not report usage.
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 / 4).max(1)
}

/// Deterministic in-process adapter.
///
/// Returns a fixed reply after an optional simulated delay, and can be
/// scripted to fail, which makes circuit-breaker and fallback behavior
/// reproducible in tests and demos.
pub struct StaticBackend {
    name: String,
    content: String,
    latency: Duration,
    cost_per_input_token: f64,
    cost_per_output_token: f64,
    healthy: AtomicBool,
    scripted_failures: Mutex<VecDeque<BackendErrorKind>>,
    calls: AtomicU64,
}

impl StaticBackend {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            latency: Duration::ZERO,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            healthy: AtomicBool::new(true),
            scripted_failures: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_costs(mut self, input: f64, output: f64) -> Self {
        self.cost_per_input_token = input;
        self.cost_per_output_token = output;
        self
    }

    /// Queue `count` failures of the given kind ahead of any success.
    pub fn fail_next(&self, kind: BackendErrorKind, count: usize) {
        let mut queue = self.scripted_failures.lock().unwrap();
        for _ in 0..count {
            queue.push_back(kind);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// How many `send` calls reached this backend.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackendAdapter for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &CompletionRequest) -> Result<BackendReply> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.scripted_failures.lock().unwrap().pop_front();
        if let Some(kind) = scripted {
            return Err(Error::backend(&self.name, kind, "scripted failure"));
        }

        let tokens_input = request
            .files
            .iter()
            .map(|f| estimate_tokens(&f.content))
            .sum::<u32>()
            + estimate_tokens(&request.prompt);
        let tokens_output = estimate_tokens(&self.content);
        let cost_eur = tokens_input as f64 * self.cost_per_input_token
            + tokens_output as f64 * self.cost_per_output_token;

        Ok(BackendReply {
            content: self.content.clone(),
            tokens_input,
            tokens_output,
            cost_eur,
            backend_name: self.name.clone(),
        })
    }

    async fn health_check(&self) -> Result<HealthProbe> {
        Ok(HealthProbe {
            healthy: self.healthy.load(Ordering::Relaxed),
            latency: self.latency,
        })
    }
}
