//! Per-endpoint connection pools.
//!
//! Each endpoint gets a bounded pool of multiplexed connections. Acquisition
//! is asynchronous and non-blocking: capacity is a semaphore, so a caller
//! that cannot be served immediately waits as a semaphore waiter and
//! cancelling the wait while queued releases the slot (the permit is only
//! held once granted). An acquired connection is handed out as a scope guard
//! that always returns it to the pool when dropped, whatever the outcome of
//! the call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use airpc_common::{Result, RpcError};

use crate::connection::Connection;

#[derive(Clone)]
pub struct PoolConfig {
    /// Maximum open connections per endpoint.
    pub max_connections_per_endpoint: usize,
    /// TLS configuration applied to every new connection; plain TCP when
    /// absent.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections_per_endpoint: 10,
            tls: None,
        }
    }
}

struct PoolShared {
    addr: SocketAddr,
    capacity: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<Connection>>>,
    tls: Option<Arc<rustls::ClientConfig>>,
    closed: AtomicBool,
}

impl PoolShared {
    fn release(&self, conn: Arc<Connection>) {
        if self.closed.load(Ordering::Acquire) || conn.is_closed() {
            conn.close("released after close");
            return;
        }
        self.idle.lock().expect("pool lock poisoned").push(conn);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.capacity.close();
        let drained: Vec<Arc<Connection>> = self
            .idle
            .lock()
            .expect("pool lock poisoned")
            .drain(..)
            .collect();
        for conn in drained {
            conn.close("pool shutdown");
        }
    }
}

/// Bounded pool of connections to a single endpoint.
pub struct EndpointPool {
    shared: Arc<PoolShared>,
}

impl EndpointPool {
    fn new(addr: SocketAddr, config: &PoolConfig) -> Self {
        EndpointPool {
            shared: Arc::new(PoolShared {
                addr,
                capacity: Arc::new(Semaphore::new(config.max_connections_per_endpoint)),
                idle: Mutex::new(Vec::new()),
                tls: config.tls.clone(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquire a connection, reusing an idle one when possible.
    ///
    /// Waits when the pool is at capacity; the future resolving is the
    /// admission.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(RpcError::Connection(format!("{}: pool closed", shared.addr)));
        }

        let permit = Arc::clone(&shared.capacity)
            .acquire_owned()
            .await
            .map_err(|_| RpcError::Connection(format!("{}: pool closed", shared.addr)))?;

        // newest-first reuse; stale connections are discarded on the way
        loop {
            let candidate = shared.idle.lock().expect("pool lock poisoned").pop();
            match candidate {
                Some(conn) if !conn.is_closed() => {
                    return Ok(PooledConnection {
                        conn,
                        shared: Arc::clone(shared),
                        _permit: permit,
                    });
                }
                Some(stale) => {
                    debug!(peer = %shared.addr, "discarding stale pooled connection");
                    stale.close("stale");
                }
                None => break,
            }
        }

        // no idle connection; dial a new one. On failure the permit drops
        // with this frame and the slot is released.
        let conn = Connection::connect(shared.addr, shared.tls.clone()).await?;
        Ok(PooledConnection {
            conn,
            shared: Arc::clone(shared),
            _permit: permit,
        })
    }

    /// Close the pool: reject new acquisitions and tear down idle
    /// connections. In-flight guards drain as they are dropped.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Idle connections currently parked. For tests.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().expect("pool lock poisoned").len()
    }
}

/// Scope guard around an acquired connection. Dropping it returns the
/// connection to the pool (or discards it if either side has closed).
pub struct PooledConnection {
    conn: Arc<Connection>,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.shared.release(Arc::clone(&self.conn));
    }
}

/// Pools per endpoint, created on first use and torn down on shutdown.
pub struct PoolManager {
    pools: Mutex<HashMap<SocketAddr, Arc<EndpointPool>>>,
    config: PoolConfig,
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        PoolManager {
            pools: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn get_or_create(&self, addr: SocketAddr) -> Arc<EndpointPool> {
        let mut pools = self.pools.lock().expect("pool manager lock poisoned");
        Arc::clone(
            pools
                .entry(addr)
                .or_insert_with(|| Arc::new(EndpointPool::new(addr, &self.config))),
        )
    }

    /// Close every pool, releasing all connections.
    pub fn shutdown(&self) {
        let pools: Vec<Arc<EndpointPool>> = self
            .pools
            .lock()
            .expect("pool manager lock poisoned")
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close();
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
