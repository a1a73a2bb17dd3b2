//! airpc provider side.
//!
//! An [`RpcServer`] binds a listener, advertises its registered services
//! through the discovery seam and serves framed requests: heartbeats get a
//! `"PONG"` reply reusing the inbound message id, requests are dispatched to
//! the matching [`RpcService`] implementation. Shutdown deregisters first
//! (best-effort), then drains connections within a bounded quiet period.
//!
//! # Example
//!
//! ```no_run
//! use airpc_common::{StaticRegistry, Value};
//! use airpc_server::{RpcServer, RpcService};
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! impl RpcService for Hello {
//!     fn service_name(&self) -> &str {
//!         "com.example.HelloService"
//!     }
//!
//!     fn invoke(&self, method: &str, _types: &[String], params: &[Value]) -> Result<Value, String> {
//!         match method {
//!             "say_hello" => {
//!                 let name = params.first().and_then(Value::as_str).unwrap_or("world");
//!                 Ok(Value::from(format!("Hello, {}!", name)))
//!             }
//!             other => Err(format!("unknown method: {}", other)),
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> airpc_common::Result<()> {
//! let registry = Arc::new(StaticRegistry::new());
//! let server = RpcServer::new("127.0.0.1:9001".parse().unwrap(), registry);
//! server.register_service(Arc::new(Hello));
//! let running = server.start().await?;
//! // ... serve until shutdown ...
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod server;

pub use dispatch::{RpcService, ServiceDispatcher};
pub use server::{RpcServer, RunningServer, TlsServerConfig, SHUTDOWN_GRACE};
