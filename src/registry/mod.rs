//! 后端注册表：按名称管理后端描述符及其适配器。
//!
//! Backend registry: descriptor plus adapter per backend name, with runtime
//! enable/disable. Listings come back sorted by name so every consumer sees
//! the same deterministic order.

use crate::backend::{BackendAdapter, BackendDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

struct RegisteredBackend {
    descriptor: BackendDescriptor,
    adapter: Arc<dyn BackendAdapter>,
}

pub struct BackendRegistry {
    inner: RwLock<HashMap<String, RegisteredBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a backend. Replacement is logged since it usually
    /// signals a configuration mistake.
    pub fn register(&self, descriptor: BackendDescriptor, adapter: Arc<dyn BackendAdapter>) {
        let name = descriptor.name.clone();
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&name) {
            warn!(backend = name.as_str(), "replacing already-registered backend");
        }
        inner.insert(
            name,
            RegisteredBackend {
                descriptor,
                adapter,
            },
        );
    }

    /// Flip a backend's enabled flag. Returns false for unknown names.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.get_mut(name) {
            Some(entry) => {
                entry.descriptor.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<BackendDescriptor> {
        self.inner
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.descriptor.clone())
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.inner
            .read()
            .unwrap()
            .get(name)
            .map(|e| Arc::clone(&e.adapter))
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        let mut out: Vec<BackendDescriptor> = self
            .inner
            .read()
            .unwrap()
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// All adapters paired with their names, sorted by name.
    pub fn adapters(&self) -> Vec<(String, Arc<dyn BackendAdapter>)> {
        let mut out: Vec<(String, Arc<dyn BackendAdapter>)> = self
            .inner
            .read()
            .unwrap()
            .iter()
            .map(|(name, e)| (name.clone(), Arc::clone(&e.adapter)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
