//! The provider server.
//!
//! Accepts connections (optionally TLS), decodes framed messages, answers
//! heartbeats with PONG and dispatches requests to registered services.
//! A protocol violation closes the offending connection. Shutdown is
//! graceful: services are deregistered first, then connections drain within
//! a bounded quiet period.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use airpc_common::wire::{read_message, write_message};
use airpc_common::{MessageType, Registry, Result, RpcError, RpcMessage};

use crate::dispatch::{RpcService, ServiceDispatcher};

/// Default quiet period for draining connections at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const REGISTER_MAX_ATTEMPTS: u32 = 5;
const REGISTER_BASE_DELAY: Duration = Duration::from_millis(100);
const REGISTER_MAX_DELAY: Duration = Duration::from_secs(2);

/// PEM certificate and key paths for TLS serving.
pub struct TlsServerConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

pub struct RpcServer {
    bind_addr: SocketAddr,
    registry: Arc<dyn Registry>,
    dispatcher: Arc<ServiceDispatcher>,
    tls: Option<TlsServerConfig>,
    shutdown_grace: Duration,
}

impl RpcServer {
    pub fn new(bind_addr: SocketAddr, registry: Arc<dyn Registry>) -> Self {
        RpcServer {
            bind_addr,
            registry,
            dispatcher: Arc::new(ServiceDispatcher::new()),
            tls: None,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Register a service implementation. Registration with the discovery
    /// backend happens at [`start`](Self::start), once the bound address is
    /// known.
    pub fn register_service(&self, service: Arc<dyn RpcService>) {
        info!(service = service.service_name(), "service implementation registered");
        self.dispatcher.register(service);
    }

    /// Bind, advertise every registered service and start serving.
    pub async fn start(self) -> Result<RunningServer> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let acceptor = self.tls.as_ref().map(load_tls_acceptor).transpose()?;

        for name in self.dispatcher.service_names() {
            register_with_backoff(self.registry.as_ref(), &name, local_addr).await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            Arc::clone(&self.dispatcher),
            shutdown_rx,
        ));
        info!(addr = %local_addr, "RPC server listening");

        Ok(RunningServer {
            local_addr,
            registry: self.registry,
            dispatcher: self.dispatcher,
            shutdown_tx,
            accept_task,
            grace: self.shutdown_grace,
        })
    }
}

/// Handle to a started server.
pub struct RunningServer {
    local_addr: SocketAddr,
    registry: Arc<dyn Registry>,
    dispatcher: Arc<ServiceDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    grace: Duration,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Graceful shutdown: deregister (best-effort), stop accepting, drain
    /// connections within the quiet period.
    pub async fn shutdown(mut self) {
        info!(addr = %self.local_addr, "starting graceful shutdown");

        for name in self.dispatcher.service_names() {
            if let Err(e) = self.registry.deregister(&name, self.local_addr).await {
                error!(service = %name, error = %e, "deregistration failed during shutdown");
            }
        }

        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(self.grace, &mut self.accept_task).await {
            Ok(_) => info!(addr = %self.local_addr, "server drained"),
            Err(_) => {
                warn!(addr = %self.local_addr, "quiet period elapsed before connections drained");
                self.accept_task.abort();
            }
        }
    }
}

fn load_tls_acceptor(config: &TlsServerConfig) -> Result<TlsAcceptor> {
    use rustls_pki_types::pem::PemObject;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};

    rustls::crypto::ring::default_provider().install_default().ok();

    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(&config.cert_path)
        .map_err(|e| RpcError::Config(format!("cannot read certificate: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RpcError::Config(format!("malformed certificate: {}", e)))?;
    let key = PrivateKeyDer::from_pem_file(&config.key_path)
        .map_err(|e| RpcError::Config(format!("cannot read private key: {}", e)))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RpcError::Config(format!("TLS server config: {}", e)))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Registration retries transient registry errors with exponential backoff.
async fn register_with_backoff(
    registry: &dyn Registry,
    service: &str,
    addr: SocketAddr,
) -> Result<()> {
    let mut delay = REGISTER_BASE_DELAY;
    let mut last_error = None;

    for attempt in 1..=REGISTER_MAX_ATTEMPTS {
        match registry.register(service, addr).await {
            Ok(()) => {
                info!(service, %addr, "service registered");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    service,
                    attempt,
                    max_attempts = REGISTER_MAX_ATTEMPTS,
                    error = %e,
                    "registration failed"
                );
                last_error = Some(e);
                if attempt < REGISTER_MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(REGISTER_MAX_DELAY);
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| RpcError::Registry(format!("registration failed for {}", service))))
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    dispatcher: Arc<ServiceDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    let dispatcher = Arc::clone(&dispatcher);
                    let shutdown = shutdown.clone();
                    match acceptor.clone() {
                        Some(acceptor) => {
                            connections.spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        serve_connection(tls_stream, peer, dispatcher, shutdown).await;
                                    }
                                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                                }
                            });
                        }
                        None => {
                            connections.spawn(serve_connection(stream, peer, dispatcher, shutdown));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }

    // stop accepting, then drain the per-connection tasks (each observes
    // the same shutdown signal and exits promptly)
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    dispatcher: Arc<ServiceDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            msg = read_message(&mut stream) => msg,
            _ = shutdown.changed() => {
                debug!(%peer, "closing connection for shutdown");
                return;
            }
        };

        let msg = match msg {
            Ok(msg) => msg,
            Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(%peer, "connection closed by peer");
                return;
            }
            Err(RpcError::Protocol(reason)) => {
                warn!(%peer, %reason, "protocol violation, closing connection");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "read failed, closing connection");
                return;
            }
        };

        let reply = match msg.message_type {
            MessageType::HeartbeatRequest => {
                debug!(%peer, "heartbeat ping");
                let request_id = msg
                    .payload
                    .as_request()
                    .map(|r| r.request_id.clone())
                    .unwrap_or_default();
                Some(
                    RpcMessage::heartbeat_response(msg.message_id, &request_id)
                        .with_serializer(msg.serializer),
                )
            }
            MessageType::Request => msg.payload.as_request().map(|request| {
                let response = dispatcher.dispatch(request);
                RpcMessage::response(msg.message_id, response).with_serializer(msg.serializer)
            }),
            MessageType::Response | MessageType::HeartbeatResponse => {
                debug!(%peer, "ignoring unexpected inbound response");
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = write_message(&mut stream, &reply).await {
                warn!(%peer, error = %e, "write failed, closing connection");
                return;
            }
        }
    }
}
