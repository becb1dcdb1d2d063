//! 健康监控：短时效缓存的后端探测与延迟观测。
//!
//! Health monitoring: per-backend probes cached for a short validity window
//! to bound probe frequency, plus an exponentially-weighted average of
//! observed call latencies that feeds the selector.

use crate::backend::BackendAdapter;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// How long a probe result stays valid before a re-probe.
    pub probe_ttl: Duration,
    /// Per-probe deadline; a slower backend is recorded unhealthy.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_ttl: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Outcome of the most recent probe of one backend.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub backend_name: String,
    pub healthy: bool,
    pub measured_latency: Duration,
    pub checked_at: Instant,
}

impl HealthRecord {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.checked_at.elapsed() < ttl
    }
}

/// Shared, continuously-updated health state consulted by the selector.
pub struct HealthMonitor {
    config: HealthConfig,
    records: RwLock<HashMap<String, HealthRecord>>,
    avg_latency: RwLock<HashMap<String, Duration>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            avg_latency: RwLock::new(HashMap::new()),
        }
    }

    /// Probe one backend, reusing a fresh cached record when available.
    ///
    /// A probe error or timeout is recorded as unhealthy rather than
    /// propagated.
    pub async fn check(&self, adapter: &dyn BackendAdapter) -> HealthRecord {
        let name = adapter.name().to_string();
        if let Some(record) = self.records.read().unwrap().get(&name) {
            if record.is_fresh(self.config.probe_ttl) {
                return record.clone();
            }
        }

        let started = Instant::now();
        let record = match tokio::time::timeout(self.config.probe_timeout, adapter.health_check())
            .await
        {
            Ok(Ok(probe)) => HealthRecord {
                backend_name: name.clone(),
                healthy: probe.healthy,
                measured_latency: probe.latency,
                checked_at: Instant::now(),
            },
            Ok(Err(e)) => {
                debug!(backend = name.as_str(), error = %e, "health probe failed");
                HealthRecord {
                    backend_name: name.clone(),
                    healthy: false,
                    measured_latency: started.elapsed(),
                    checked_at: Instant::now(),
                }
            }
            Err(_) => {
                debug!(backend = name.as_str(), "health probe timed out");
                HealthRecord {
                    backend_name: name.clone(),
                    healthy: false,
                    measured_latency: self.config.probe_timeout,
                    checked_at: Instant::now(),
                }
            }
        };

        if record.healthy {
            self.record_latency(&name, record.measured_latency);
        }
        self.records
            .write()
            .unwrap()
            .insert(name, record.clone());
        record
    }

    /// Probe every given backend concurrently. Individual probe failures
    /// land as unhealthy records; the batch never aborts.
    pub async fn check_all(
        &self,
        adapters: &[(String, Arc<dyn BackendAdapter>)],
    ) -> Vec<HealthRecord> {
        join_all(
            adapters
                .iter()
                .map(|(_, adapter)| self.check(adapter.as_ref())),
        )
        .await
    }

    /// Last known record, without probing. May be stale.
    pub fn snapshot(&self, backend: &str) -> Option<HealthRecord> {
        self.records.read().unwrap().get(backend).cloned()
    }

    /// Fold an observed call latency into the backend's moving average.
    pub fn record_latency(&self, backend: &str, latency: Duration) {
        let mut map = self.avg_latency.write().unwrap();
        let updated = match map.get(backend) {
            Some(prev) => prev.mul_f64(0.8) + latency.mul_f64(0.2),
            None => latency,
        };
        map.insert(backend.to_string(), updated);
    }

    pub fn avg_latency(&self, backend: &str) -> Option<Duration> {
        self.avg_latency.read().unwrap().get(backend).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;

    #[tokio::test]
    async fn test_probe_and_cache_within_ttl() {
        let monitor = HealthMonitor::new(HealthConfig::new().with_probe_ttl(Duration::from_secs(60)));
        let backend = StaticBackend::new("alpha", "ok");

        let first = monitor.check(&backend).await;
        assert!(first.healthy);

        // Flip the backend; the cached record masks it inside the window.
        backend.set_healthy(false);
        let second = monitor.check(&backend).await;
        assert!(second.healthy);
        assert_eq!(second.checked_at, first.checked_at);
    }

    #[tokio::test]
    async fn test_stale_record_reprobes() {
        let monitor =
            HealthMonitor::new(HealthConfig::new().with_probe_ttl(Duration::from_millis(10)));
        let backend = StaticBackend::new("alpha", "ok");

        assert!(monitor.check(&backend).await.healthy);
        backend.set_healthy(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!monitor.check(&backend).await.healthy);
    }

    #[tokio::test]
    async fn test_check_all_tolerates_unhealthy_backends() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let good = StaticBackend::new("good", "ok");
        let bad = StaticBackend::new("bad", "ok");
        bad.set_healthy(false);

        let adapters: Vec<(String, Arc<dyn BackendAdapter>)> = vec![
            ("good".to_string(), Arc::new(good)),
            ("bad".to_string(), Arc::new(bad)),
        ];
        let records = monitor.check_all(&adapters).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.backend_name == "good" && r.healthy));
        assert!(records.iter().any(|r| r.backend_name == "bad" && !r.healthy));
    }

    #[tokio::test]
    async fn test_latency_moving_average() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.record_latency("alpha", Duration::from_millis(100));
        assert_eq!(
            monitor.avg_latency("alpha"),
            Some(Duration::from_millis(100))
        );

        monitor.record_latency("alpha", Duration::from_millis(200));
        let avg = monitor.avg_latency("alpha").unwrap();
        assert!(avg > Duration::from_millis(100));
        assert!(avg < Duration::from_millis(200));
    }
}
