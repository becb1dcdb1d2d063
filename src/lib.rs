//! # ai-optimizer-rust
//!
//! 这是一个自适应 AI 请求路由核心，内置并发安全的响应缓存与按后端熔断。
//!
//! An adaptive request router with an integrated, concurrency-safe response
//! cache, sitting between a caller issuing completion requests and a set of
//! interchangeable backend providers.
//!
//! ## Overview
//!
//! For every request the pipeline decides whether a previously computed
//! response can be reused; if not, it picks the best-available backend under
//! cost/latency/availability constraints, isolates failing backends with a
//! per-backend circuit breaker, and persists the result for future reuse.
//!
//! ## Core Guarantees
//!
//! - **Deterministic fingerprints**: the same logical request always maps to
//!   the same cache key, independent of option ordering
//! - **In-flight coalescing**: concurrent identical requests share exactly
//!   one backend computation
//! - **Durable reuse**: cached responses survive restarts when a storage
//!   location is configured, and the cache degrades to pass-through (never
//!   an error) when the store is unreachable
//! - **Failure isolation**: a backend failing repeatedly is circuit-broken
//!   and probed for recovery on a backed-off schedule
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_optimizer_rust::backend::{BackendDescriptor, HttpBackend};
//! use ai_optimizer_rust::OptimizerBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ai_optimizer_rust::Result<()> {
//!     let optimizer = OptimizerBuilder::new()
//!         .with_backend(
//!             BackendDescriptor::new("openai").with_costs(0.0000025, 0.00001),
//!             Arc::new(HttpBackend::new(
//!                 "openai",
//!                 "https://api.openai.com/v1",
//!                 "gpt-4o-mini",
//!             )?),
//!         )
//!         .build()?;
//!
//!     optimizer.initialize().await;
//!     let response = optimizer.optimize_prompt("Explain caching in one sentence").await?;
//!     println!("[{}] {}", response.backend_used, response.content);
//!     optimizer.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`optimizer`] | Orchestrator: the single request pipeline and its builder |
//! | [`cache`] | Response cache, durable stores, fingerprinting |
//! | [`backend`] | Provider boundary: adapter trait and built-in adapters |
//! | [`registry`] | Backend descriptors and adapters by name |
//! | [`routing`] | Pure weighted selection logic |
//! | [`resilience`] | Per-backend circuit breaker |
//! | [`health`] | Cached health probes and latency observation |
//! | [`config`] | Aggregate configuration and JSON file loading |
//! | [`types`] | Request/response/status types |

pub mod backend;
pub mod cache;
pub mod config;
pub mod health;
pub mod optimizer;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod types;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BackendErrorKind, Error, ErrorContext};

// Re-export main types for convenience
pub use backend::{BackendAdapter, BackendDescriptor, BackendReply, HttpBackend, StaticBackend};
pub use cache::{CacheConfig, CacheStats, Fingerprint, Fingerprinter, ResponseCache};
pub use config::OptimizerConfig;
pub use health::{HealthConfig, HealthMonitor, HealthRecord};
pub use optimizer::{Optimizer, OptimizerBuilder};
pub use registry::BackendRegistry;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use routing::RouterWeights;
pub use types::{AttachedFile, OptimizedResponse, RequestOptions, StatusReport};
