use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::circuit::{CircuitBreaker, CircuitBreakerConfig};

/// Shared cache of circuit breakers keyed by endpoint key
/// (`"service@host:port"`). Breakers are created on first use and live for
/// the life of the process.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        BreakerRegistry {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().expect("breaker lock poisoned").get(key) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().expect("breaker lock poisoned");
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.default_config.clone()))),
        )
    }

    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .expect("breaker lock poisoned")
            .get(key)
            .cloned()
    }

    /// Remove a breaker. For tests.
    pub fn remove(&self, key: &str) {
        self.breakers
            .write()
            .expect("breaker lock poisoned")
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.breakers.read().expect("breaker lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
