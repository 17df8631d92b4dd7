//! In-memory view of alive service instances
//!
//! ```text
//! Registry
//!   RwLock<HashMap<service_type, Arc<ServiceTypeRegistry>>>
//!                                   └─> RwLock<HashMap<service_id, ServiceRegisterInfo>>
//! ```
//!
//! The reflector task is the only writer. Visitors take the type-map read
//! lock just long enough to pick the per-type registries they need, then
//! copy each per-type map out under its read lock. Callbacks run with no
//! lock held, so they may query the registry again. A visitor sees each type
//! at some point in time, but no atomicity is provided across types or
//! across calls.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use super::ServiceRegisterInfo;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

/// Instances of a single service type, keyed by service id
#[derive(Debug, Default)]
pub struct ServiceTypeRegistry {
    services: RwLock<HashMap<String, ServiceRegisterInfo>>,
}

impl ServiceTypeRegistry {
    fn register(
        &self,
        service_id: &str,
        info: ServiceRegisterInfo,
    ) -> Option<ServiceRegisterInfo> {
        self.services.write().insert(service_id.to_string(), info)
    }

    fn unregister(
        &self,
        service_id: &str,
    ) -> Option<ServiceRegisterInfo> {
        self.services.write().remove(service_id)
    }

    pub fn get(
        &self,
        service_id: &str,
    ) -> Option<ServiceRegisterInfo> {
        self.services.read().get(service_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `cb(service_id, info)` for every instance present when the
    /// visit started
    pub fn visit<F>(
        &self,
        mut cb: F,
    ) where
        F: FnMut(&str, &ServiceRegisterInfo),
    {
        // parking_lot locks are fair: a nested read from `cb` would queue
        // behind a waiting writer, so the guard must be gone before `cb` runs
        let services: Vec<(String, ServiceRegisterInfo)> = self
            .services
            .read()
            .iter()
            .map(|(service_id, info)| (service_id.clone(), info.clone()))
            .collect();

        for (service_id, info) in &services {
            cb(service_id, info);
        }
    }
}

/// Service type -> [`ServiceTypeRegistry`]
///
/// Per-type registries are created on first sighting of a type and kept for
/// the lifetime of the registry, even once empty.
#[derive(Debug, Default)]
pub struct Registry {
    types: RwLock<HashMap<String, Arc<ServiceTypeRegistry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every consumer that does not bring its own
    pub fn global() -> Arc<Registry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Inserts or replaces the registration of `(service_type, service_id)`
    ///
    /// Returns the registration it replaced, if any. Re-applying the same
    /// triple leaves the registry unchanged.
    pub fn register_service(
        &self,
        service_type: &str,
        service_id: &str,
        info: ServiceRegisterInfo,
    ) -> Option<ServiceRegisterInfo> {
        self.type_registry_or_default(service_type).register(service_id, info)
    }

    /// Removes `(service_type, service_id)`; returns `false` when it was not registered
    pub fn unregister_service(
        &self,
        service_type: &str,
        service_id: &str,
    ) -> bool {
        match self.type_registry(service_type) {
            Some(registry) => registry.unregister(service_id).is_some(),
            None => false,
        }
    }

    /// Calls `cb(service_id, info)` for every known instance of `service_type`
    ///
    /// Unknown types produce no calls. Iteration order is unspecified.
    pub fn visit_by_type<F>(
        &self,
        service_type: &str,
        cb: F,
    ) where
        F: FnMut(&str, &ServiceRegisterInfo),
    {
        if let Some(registry) = self.type_registry(service_type) {
            registry.visit(cb);
        }
    }

    /// Calls `cb(service_type, service_id, info)` for every instance whose
    /// type starts with `prefix`
    pub fn visit_by_type_prefix<F>(
        &self,
        prefix: &str,
        mut cb: F,
    ) where
        F: FnMut(&str, &str, &ServiceRegisterInfo),
    {
        let matching: Vec<(String, Arc<ServiceTypeRegistry>)> = self
            .types
            .read()
            .iter()
            .filter(|(service_type, _)| service_type.starts_with(prefix))
            .map(|(service_type, registry)| (service_type.clone(), registry.clone()))
            .collect();

        for (service_type, registry) in matching {
            registry.visit(|service_id, info| cb(&service_type, service_id, info));
        }
    }

    pub fn get(
        &self,
        service_type: &str,
        service_id: &str,
    ) -> Option<ServiceRegisterInfo> {
        self.type_registry(service_type)?.get(service_id)
    }

    /// Total number of registered instances across all types
    pub fn len(&self) -> usize {
        self.types.read().values().map(|registry| registry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered instances of `service_type`
    pub fn count_by_type(
        &self,
        service_type: &str,
    ) -> usize {
        self.type_registry(service_type).map_or(0, |registry| registry.len())
    }

    /// Every service type seen so far, including types that are now empty
    pub fn service_types(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    /// All registered `(service_type, service_id)` pairs
    pub fn snapshot_keys(&self) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        self.visit_by_type_prefix("", |service_type, service_id, _| {
            keys.push((service_type.to_string(), service_id.to_string()));
        });
        keys
    }

    fn type_registry(
        &self,
        service_type: &str,
    ) -> Option<Arc<ServiceTypeRegistry>> {
        self.types.read().get(service_type).cloned()
    }

    fn type_registry_or_default(
        &self,
        service_type: &str,
    ) -> Arc<ServiceTypeRegistry> {
        if let Some(registry) = self.type_registry(service_type) {
            return registry;
        }

        self.types
            .write()
            .entry(service_type.to_string())
            .or_default()
            .clone()
    }
}
