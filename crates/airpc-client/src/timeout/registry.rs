use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::adaptive::{AdaptiveTimeout, AdaptiveTimeoutConfig};

/// Shared cache of adaptive timeouts keyed by endpoint key, created on
/// first use. Same lifecycle as the breaker registry.
pub struct TimeoutRegistry {
    timeouts: RwLock<HashMap<String, Arc<AdaptiveTimeout>>>,
    default_config: AdaptiveTimeoutConfig,
}

impl TimeoutRegistry {
    pub fn new(default_config: AdaptiveTimeoutConfig) -> Self {
        TimeoutRegistry {
            timeouts: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, key: &str) -> Arc<AdaptiveTimeout> {
        if let Some(timeout) = self.timeouts.read().expect("timeout lock poisoned").get(key) {
            return Arc::clone(timeout);
        }
        let mut timeouts = self.timeouts.write().expect("timeout lock poisoned");
        Arc::clone(
            timeouts
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AdaptiveTimeout::new(key, self.default_config.clone()))),
        )
    }

    pub fn get(&self, key: &str) -> Option<Arc<AdaptiveTimeout>> {
        self.timeouts
            .read()
            .expect("timeout lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove an entry. For tests.
    pub fn remove(&self, key: &str) {
        self.timeouts
            .write()
            .expect("timeout lock poisoned")
            .remove(key);
    }
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        Self::new(AdaptiveTimeoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_shares_instances() {
        let registry = TimeoutRegistry::default();
        let a = registry.get_or_create("svc@127.0.0.1:9001");
        let b = registry.get_or_create("svc@127.0.0.1:9001");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = TimeoutRegistry::default();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_remove() {
        let registry = TimeoutRegistry::default();
        registry.get_or_create("k");
        registry.remove("k");
        assert!(registry.get("k").is_none());
    }
}
