//! 弹性模块：按后端隔离故障的熔断器状态机。
//!
//! # Resilience Module
//!
//! Per-backend failure isolation for the routing pipeline. A failing backend
//! is taken out of selection quickly and probed for recovery on a backed-off
//! schedule instead of being hammered while it is down.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CircuitBreaker`] | CLOSED / OPEN / HALF_OPEN state machine |
//! | [`CircuitBreakerSet`] | Lazily-created breaker per backend name |
//! | [`CircuitBreakerConfig`] | Threshold and reset interval configuration |
//! | [`CircuitSnapshot`] | Point-in-time view for status reporting |
//!
//! ## Example
//!
//! ```rust
//! use ai_optimizer_rust::resilience::{CircuitBreaker, CircuitBreakerConfig, Permit};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(3)
//!     .with_reset_interval(Duration::from_secs(30));
//! let breaker = CircuitBreaker::new(config);
//!
//! if let Ok(permit) = breaker.acquire() {
//!     // place the call, then report the outcome
//!     let _ = permit;
//!     breaker.on_success();
//! }
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSet, CircuitSnapshot, CircuitState, Permit,
    Rejection,
};
