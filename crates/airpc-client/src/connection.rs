//! A multiplexed connection to one endpoint.
//!
//! Each connection owns a correlation table mapping outstanding message ids
//! to pending completions. A reader task delivers responses to their
//! completions; a watchdog task sends a heartbeat after 5 s of writer
//! idleness and closes the connection when a heartbeat goes unanswered past
//! a grace period. On any connection error every pending completion is
//! failed with that cause and the table is cleared.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use airpc_common::wire::{read_message, write_message};
use airpc_common::{next_message_id, MessageType, Payload, Result, RpcError, RpcMessage, RpcResponse};

/// Writer idleness before a heartbeat is sent.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// How long an unanswered heartbeat may stay outstanding.
pub const HEARTBEAT_GRACE: Duration = Duration::from_secs(15);

trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

type PendingCompletion = oneshot::Sender<Result<RpcResponse>>;

pub struct Connection {
    peer: SocketAddr,
    writer: tokio::sync::Mutex<WriteHalf<Box<dyn IoStream>>>,
    /// Correlation table: message id → pending completion.
    pending: Mutex<HashMap<u32, PendingCompletion>>,
    closed: AtomicBool,
    last_write: Mutex<Instant>,
    /// Set while a heartbeat awaits its pong.
    heartbeat_pending_since: Mutex<Option<Instant>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    watchdog_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Dial an endpoint, optionally wrapping the stream in TLS, and start
    /// the reader and watchdog tasks.
    pub async fn connect(
        peer: SocketAddr,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Arc<Self>> {
        let tcp = TcpStream::connect(peer)
            .await
            .map_err(|e| RpcError::from_io(e, &peer.to_string()))?;

        let stream: Box<dyn IoStream> = match tls {
            Some(config) => {
                let connector = TlsConnector::from(config);
                let server_name = rustls_pki_types::ServerName::from(peer.ip());
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| RpcError::Connection(format!("{}: TLS handshake: {}", peer, e)))?;
                Box::new(tls_stream)
            }
            None => Box::new(tcp),
        };

        let (read_half, write_half) = tokio::io::split(stream);

        let connection = Arc::new(Connection {
            peer,
            writer: tokio::sync::Mutex::new(write_half),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            last_write: Mutex::new(Instant::now()),
            heartbeat_pending_since: Mutex::new(None),
            reader_task: Mutex::new(None),
            watchdog_task: Mutex::new(None),
        });

        let reader = tokio::spawn(reader_loop(read_half, Arc::downgrade(&connection)));
        let watchdog = tokio::spawn(watchdog_loop(Arc::downgrade(&connection)));
        *connection.reader_task.lock().expect("task lock poisoned") = Some(reader);
        *connection.watchdog_task.lock().expect("task lock poisoned") = Some(watchdog);

        Ok(connection)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a pending completion and write the framed message.
    ///
    /// Registration happens before the write so a fast response can never
    /// miss its completion. A failed write unregisters and surfaces the
    /// error.
    pub async fn call(&self, msg: &RpcMessage) -> Result<oneshot::Receiver<Result<RpcResponse>>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(msg.message_id, tx);

        if let Err(e) = self.send(msg).await {
            self.remove_pending(msg.message_id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Write one message without registering a completion.
    pub async fn send(&self, msg: &RpcMessage) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::Connection(format!("{}: connection closed", self.peer)));
        }
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, msg)
            .await
            .map_err(|e| match e {
                RpcError::Io(io) => RpcError::from_io(io, &self.peer.to_string()),
                other => other,
            })?;
        *self.last_write.lock().expect("last_write lock poisoned") = Instant::now();
        Ok(())
    }

    /// Drop the pending completion for `id`, if any. Used when a deadline
    /// elapses so a late response finds nothing and is discarded.
    pub fn remove_pending(&self, id: u32) {
        self.pending.lock().expect("pending lock poisoned").remove(&id);
    }

    /// Number of outstanding calls. For tests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Mark closed, fail every pending completion and stop the tasks.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.fail_all_pending(reason);
        for slot in [&self.reader_task, &self.watchdog_task] {
            if let Ok(mut task) = slot.lock() {
                if let Some(task) = task.take() {
                    task.abort();
                }
            }
        }
    }

    fn fail_all_pending(&self, reason: &str) {
        let drained: Vec<PendingCompletion> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(RpcError::Connection(format!(
                "{}: {}",
                self.peer, reason
            ))));
        }
    }

    fn handle_message(&self, msg: RpcMessage) {
        match msg.message_type {
            MessageType::Response => {
                let completion = self
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&msg.message_id);
                match completion {
                    Some(tx) => {
                        if let Payload::Response(response) = msg.payload {
                            // the receiver may have timed out and gone away
                            let _ = tx.send(Ok(response));
                        }
                    }
                    None => {
                        debug!(peer = %self.peer, msg_id = msg.message_id, "dropping late response");
                    }
                }
            }
            MessageType::HeartbeatResponse => {
                debug!(peer = %self.peer, "heartbeat pong");
                *self
                    .heartbeat_pending_since
                    .lock()
                    .expect("heartbeat lock poisoned") = None;
            }
            MessageType::Request | MessageType::HeartbeatRequest => {
                debug!(peer = %self.peer, "ignoring unexpected inbound request on client connection");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close("connection dropped");
    }
}

async fn reader_loop(mut read_half: ReadHalf<Box<dyn IoStream>>, conn: Weak<Connection>) {
    loop {
        match read_message(&mut read_half).await {
            Ok(msg) => {
                let Some(conn) = conn.upgrade() else { break };
                conn.handle_message(msg);
            }
            Err(err) => {
                if let Some(conn) = conn.upgrade() {
                    match &err {
                        RpcError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                            debug!(peer = %conn.peer, "connection closed by peer");
                        }
                        RpcError::Protocol(reason) => {
                            warn!(peer = %conn.peer, %reason, "protocol violation, closing connection");
                        }
                        other => {
                            warn!(peer = %conn.peer, error = %other, "connection error");
                        }
                    }
                    conn.close(&err.to_string());
                }
                break;
            }
        }
    }
}

async fn watchdog_loop(conn: Weak<Connection>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(conn) = conn.upgrade() else { break };
        if conn.is_closed() {
            break;
        }

        let pending_since = *conn
            .heartbeat_pending_since
            .lock()
            .expect("heartbeat lock poisoned");
        if let Some(since) = pending_since {
            if since.elapsed() >= HEARTBEAT_GRACE {
                warn!(peer = %conn.peer, "heartbeat unanswered, closing connection");
                conn.close("heartbeat unanswered");
                break;
            }
        }

        let idle = conn
            .last_write
            .lock()
            .expect("last_write lock poisoned")
            .elapsed();
        if idle >= HEARTBEAT_INTERVAL {
            debug!(peer = %conn.peer, "writer idle, sending heartbeat");
            {
                let mut pending = conn
                    .heartbeat_pending_since
                    .lock()
                    .expect("heartbeat lock poisoned");
                if pending.is_none() {
                    *pending = Some(Instant::now());
                }
            }
            let msg = RpcMessage::heartbeat_request(next_message_id());
            if let Err(e) = conn.send(&msg).await {
                warn!(peer = %conn.peer, error = %e, "heartbeat write failed, closing connection");
                conn.close("heartbeat write failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airpc_common::wire;
    use airpc_common::{RpcRequest, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A minimal provider that answers every request with its request id
    /// echoed back, after an optional delay.
    async fn spawn_echo_server(delay: Option<Duration>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    loop {
                        let msg = match wire::read_message(&mut stream).await {
                            Ok(m) => m,
                            Err(_) => break,
                        };
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        let request_id = msg
                            .payload
                            .as_request()
                            .map(|r| r.request_id.clone())
                            .unwrap_or_default();
                        let reply = RpcMessage::response(
                            msg.message_id,
                            airpc_common::RpcResponse::success(
                                request_id,
                                Value::Str("ok".to_string()),
                            ),
                        );
                        if wire::write_message(&mut stream, &reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn request_message() -> RpcMessage {
        RpcMessage::request(
            next_message_id(),
            RpcRequest::new("svc", "m", vec![], vec![]),
        )
    }

    #[tokio::test]
    async fn test_call_completes_with_response() {
        let addr = spawn_echo_server(None).await;
        let conn = Connection::connect(addr, None).await.unwrap();

        let msg = request_message();
        let rx = conn.call(&msg).await.unwrap();
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.result, Some(Value::Str("ok".to_string())));

        // the correlation table no longer holds the entry
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_multiplex() {
        let addr = spawn_echo_server(None).await;
        let conn = Connection::connect(addr, None).await.unwrap();

        let mut receivers = vec![];
        for _ in 0..16 {
            let msg = request_message();
            receivers.push(conn.call(&msg).await.unwrap());
        }
        for rx in receivers {
            assert!(rx.await.unwrap().is_ok());
        }
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        match Connection::connect(addr, None).await {
            Err(RpcError::ConnectionRefused(_)) => {}
            other => panic!("expected connection refused, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_peer_disconnect_fails_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // read nothing, just hang up after a moment
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let conn = Connection::connect(addr, None).await.unwrap();
        let msg = request_message();
        let rx = conn.call(&msg).await.unwrap();

        match rx.await.unwrap() {
            Err(RpcError::Connection(_)) => {}
            other => panic!("expected connection error, got {:?}", other),
        }
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_bad_magic_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // garbage frame: wrong magic
            let mut frame = vec![0xDE, 0xAD, 0xBE, 0xEF];
            frame.extend_from_slice(&[1, 1, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
            stream.write_all(&frame).await.unwrap();
            // keep the socket open; the client must close it anyway
            let mut buf = [0u8; 1];
            let _ = stream.read(&mut buf).await;
        });

        let conn = Connection::connect(addr, None).await.unwrap();
        let msg = request_message();
        let rx = conn.call(&msg).await.unwrap();

        assert!(rx.await.unwrap().is_err());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let addr = spawn_echo_server(Some(Duration::from_millis(200))).await;
        let conn = Connection::connect(addr, None).await.unwrap();

        let msg = request_message();
        let id = msg.message_id;
        let rx = conn.call(&msg).await.unwrap();

        // deadline fires: the pipeline removes the pending entry
        drop(rx);
        conn.remove_pending(id);
        assert_eq!(conn.pending_count(), 0);

        // the late response arrives and is silently discarded
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!conn.is_closed());

        // the connection is still usable
        let rx = conn.call(&request_message()).await.unwrap();
        assert!(rx.await.unwrap().is_ok());
    }
}
