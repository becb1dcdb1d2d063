//! 编排器模块：将缓存、路由与熔断装配为单一请求管线。
//!
//! # Optimizer Module
//!
//! The orchestrator wiring fingerprinting, the response cache, health
//! monitoring, circuit breaking and weighted selection into the single
//! request pipeline: fingerprint → cache lookup → (on miss) select →
//! invoke → record → cache.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Optimizer`] | Explicit context object owning all pipeline state |
//! | [`OptimizerBuilder`] | Configuration and assembly |
//!
//! ## Example
//!
//! ```rust,no_run
//! use ai_optimizer_rust::backend::{BackendDescriptor, StaticBackend};
//! use ai_optimizer_rust::OptimizerBuilder;
//! use std::sync::Arc;
//!
//! # async fn example() -> ai_optimizer_rust::Result<()> {
//! let optimizer = OptimizerBuilder::new()
//!     .with_backend(
//!         BackendDescriptor::new("local").with_costs(0.0, 0.0),
//!         Arc::new(StaticBackend::new("local", "four")),
//!     )
//!     .build()?;
//!
//! optimizer.initialize().await;
//! let response = optimizer.optimize_prompt("What is 2+2?").await?;
//! assert_eq!(response.backend_used, "local");
//! optimizer.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod builder;
mod core;
mod validation;

pub use builder::OptimizerBuilder;
pub use core::Optimizer;
