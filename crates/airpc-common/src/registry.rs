//! Service discovery seam.
//!
//! The framework consumes discovery through the [`Registry`] trait and never
//! assumes a particular backend. [`StaticRegistry`] is a process-local
//! implementation backing tests and examples.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use crate::protocol::error::Result;

/// The identity under which per-endpoint state (circuit breakers, adaptive
/// timeouts) is registered.
pub fn endpoint_key(service: &str, addr: &SocketAddr) -> String {
    format!("{}@{}:{}", service, addr.ip(), addr.port())
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Register a provider endpoint. Idempotent: registering the same
    /// `(service, addr)` twice is a no-op.
    async fn register(&self, service: &str, addr: SocketAddr) -> Result<()>;

    /// Remove a provider endpoint. Best-effort: callers in shutdown paths
    /// log failures and continue.
    async fn deregister(&self, service: &str, addr: SocketAddr) -> Result<()>;

    /// Currently healthy endpoints for a service; may be empty.
    async fn discover(&self, service: &str) -> Result<Vec<SocketAddr>>;
}

/// In-process registry with a fixed lifetime; no network backend.
#[derive(Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<String, Vec<SocketAddr>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a service with a known endpoint list.
    pub fn with_service(self, service: &str, addrs: Vec<SocketAddr>) -> Self {
        self.services
            .write()
            .expect("registry lock poisoned")
            .insert(service.to_string(), addrs);
        self
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn register(&self, service: &str, addr: SocketAddr) -> Result<()> {
        let mut services = self.services.write().expect("registry lock poisoned");
        let addrs = services.entry(service.to_string()).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
        Ok(())
    }

    async fn deregister(&self, service: &str, addr: SocketAddr) -> Result<()> {
        let mut services = self.services.write().expect("registry lock poisoned");
        if let Some(addrs) = services.get_mut(service) {
            addrs.retain(|a| *a != addr);
        }
        Ok(())
    }

    async fn discover(&self, service: &str) -> Result<Vec<SocketAddr>> {
        let services = self.services.read().expect("registry lock poisoned");
        Ok(services.get(service).cloned().unwrap_or_default())
    }
}
