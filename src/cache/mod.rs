//! 响应缓存模块：带持久层与并发合并的响应缓存。
//!
//! # Response Caching Module
//!
//! Durable, capacity- and TTL-bounded storage of computed responses, with
//! in-flight coalescing so concurrent identical requests share one backend
//! call.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | LRU memory layer over a durable store, coalescing, stats |
//! | [`CacheConfig`] | TTL, capacity and storage location |
//! | [`CacheStore`] | Trait for durable keyed stores |
//! | [`FileStore`] | One-file-per-entry durable store |
//! | [`MemoryStore`] | Process-local store for tests |
//! | [`NullStore`] | No-op store when durability is not configured |
//! | [`Fingerprinter`] | Deterministic request fingerprints |
//!
//! ## Example
//!
//! ```rust,no_run
//! use ai_optimizer_rust::cache::{CacheConfig, FileStore, ResponseCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example() -> ai_optimizer_rust::Result<()> {
//! let store = Arc::new(FileStore::new("/var/cache/ai-optimizer")?);
//! let config = CacheConfig::new()
//!     .with_ttl(Duration::from_secs(3600))
//!     .with_max_entries(1000);
//! let cache: ResponseCache<String> = ResponseCache::new(config, store);
//! # Ok(())
//! # }
//! ```
//!
//! Durable-store failures are logged and degrade the cache to pass-through;
//! they never block or fail a request.

mod key;
mod manager;
mod store;

pub use key::{Fingerprint, Fingerprinter};
pub use manager::{CacheConfig, CacheEntry, CacheStats, ResponseCache};
pub use store::{CacheStore, FileStore, MemoryStore, NullStore};
