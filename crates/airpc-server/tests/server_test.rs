//! End-to-end provider tests over raw framed TCP.

use std::sync::Arc;
use std::time::Duration;

use airpc_common::wire::{read_message, write_message};
use airpc_common::{
    next_message_id, MessageType, Registry, RpcMessage, RpcRequest, SerializerKind, StaticRegistry,
    Value,
};
use airpc_server::{RpcServer, RpcService};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

struct EchoService;

impl RpcService for EchoService {
    fn service_name(&self) -> &str {
        "com.example.EchoService"
    }

    fn invoke(
        &self,
        method: &str,
        _param_types: &[String],
        params: &[Value],
    ) -> Result<Value, String> {
        match method {
            "echo" => Ok(params.first().cloned().unwrap_or(Value::Null)),
            "fail" => Err("intentional failure".to_string()),
            other => Err(format!("unknown method: {}", other)),
        }
    }
}

async fn start_server() -> (airpc_server::RunningServer, Arc<StaticRegistry>) {
    let registry = Arc::new(StaticRegistry::new());
    let registry_dyn: Arc<dyn Registry> = registry.clone();
    let server = RpcServer::new("127.0.0.1:0".parse().unwrap(), registry_dyn)
        .with_shutdown_grace(Duration::from_secs(1));
    server.register_service(Arc::new(EchoService));
    let running = server.start().await.unwrap();
    (running, registry)
}

fn echo_request(value: Value) -> RpcMessage {
    RpcMessage::request(
        next_message_id(),
        RpcRequest::new(
            "com.example.EchoService",
            "echo",
            vec!["Value".to_string()],
            vec![value],
        ),
    )
}

#[tokio::test]
async fn test_start_registers_services() {
    let (running, registry) = start_server().await;
    let endpoints = registry.discover("com.example.EchoService").await.unwrap();
    assert_eq!(endpoints, vec![running.local_addr()]);
    running.shutdown().await;
}

#[tokio::test]
async fn test_request_is_dispatched() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    let msg = echo_request(Value::Str("ping".to_string()));
    write_message(&mut stream, &msg).await.unwrap();

    let reply = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.message_type, MessageType::Response);
    assert_eq!(reply.message_id, msg.message_id);
    let response = reply.payload.as_response().unwrap();
    assert_eq!(response.result, Some(Value::Str("ping".to_string())));
    assert!(response.error.is_none());

    running.shutdown().await;
}

#[tokio::test]
async fn test_serializer_is_echoed() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    let msg = echo_request(Value::Int(1)).with_serializer(SerializerKind::Json);
    write_message(&mut stream, &msg).await.unwrap();

    let reply = read_message(&mut stream).await.unwrap();
    assert_eq!(reply.serializer, SerializerKind::Json);

    running.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_gets_pong_with_same_message_id() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    let ping = RpcMessage::heartbeat_request(next_message_id());
    write_message(&mut stream, &ping).await.unwrap();

    let pong = read_message(&mut stream).await.unwrap();
    assert_eq!(pong.message_type, MessageType::HeartbeatResponse);
    assert_eq!(pong.message_id, ping.message_id);
    let response = pong.payload.as_response().unwrap();
    assert_eq!(response.result.as_ref().unwrap().as_str(), Some("PONG"));

    running.shutdown().await;
}

#[tokio::test]
async fn test_unknown_service_returns_error_response() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    let msg = RpcMessage::request(
        next_message_id(),
        RpcRequest::new("com.example.Nope", "m", vec![], vec![]),
    );
    write_message(&mut stream, &msg).await.unwrap();

    let reply = read_message(&mut stream).await.unwrap();
    let response = reply.payload.as_response().unwrap();
    assert!(response
        .error
        .as_deref()
        .unwrap()
        .contains("service not found"));

    running.shutdown().await;
}

#[tokio::test]
async fn test_business_error_travels_in_response() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    let msg = RpcMessage::request(
        next_message_id(),
        RpcRequest::new("com.example.EchoService", "fail", vec![], vec![]),
    );
    write_message(&mut stream, &msg).await.unwrap();

    let reply = read_message(&mut stream).await.unwrap();
    let response = reply.payload.as_response().unwrap();
    assert_eq!(response.error.as_deref(), Some("intentional failure"));

    running.shutdown().await;
}

#[tokio::test]
async fn test_multiple_requests_on_one_connection() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    for i in 0..10i64 {
        let msg = echo_request(Value::Int(i));
        write_message(&mut stream, &msg).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        let response = reply.payload.as_response().unwrap();
        assert_eq!(response.result, Some(Value::Int(i)));
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_bad_magic_closes_connection_without_reply() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    use tokio::io::AsyncWriteExt;
    let mut frame = 0xDEAD_BEEFu32.to_be_bytes().to_vec();
    frame.extend_from_slice(&[1, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0]);
    stream.write_all(&frame).await.unwrap();

    // the server closes without emitting anything
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection")
        .unwrap();
    assert_eq!(read, 0);

    running.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_deregisters_and_stops_accepting() {
    let (running, registry) = start_server().await;
    let addr = running.local_addr();

    running.shutdown().await;

    assert!(registry
        .discover("com.example.EchoService")
        .await
        .unwrap()
        .is_empty());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_open_connections_drain_on_shutdown() {
    let (running, _registry) = start_server().await;
    let mut stream = TcpStream::connect(running.local_addr()).await.unwrap();

    // connection is live before shutdown
    let msg = echo_request(Value::Null);
    write_message(&mut stream, &msg).await.unwrap();
    read_message(&mut stream).await.unwrap();

    running.shutdown().await;

    // the drained connection is gone: reads return EOF
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("connection should be closed")
        .unwrap();
    assert_eq!(read, 0);
}
