//! A standalone provider serving a greeting service on a fixed port.
//!
//! Run with: `cargo run --example provider`

use std::sync::Arc;

use airpc_common::{Registry, StaticRegistry, Value};
use airpc_server::{RpcServer, RpcService};

struct HelloService;

impl RpcService for HelloService {
    fn service_name(&self) -> &str {
        "com.example.HelloService"
    }

    fn invoke(
        &self,
        method: &str,
        _param_types: &[String],
        params: &[Value],
    ) -> Result<Value, String> {
        match method {
            "say_hello" => {
                let name = params.first().and_then(Value::as_str).unwrap_or("world");
                Ok(Value::from(format!("Hello, {}!", name)))
            }
            other => Err(format!("unknown method: {}", other)),
        }
    }
}

#[tokio::main]
async fn main() -> airpc_common::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry: Arc<dyn Registry> = Arc::new(StaticRegistry::new());
    let server = RpcServer::new("127.0.0.1:9001".parse().unwrap(), registry);
    server.register_service(Arc::new(HelloService));

    let running = server.start().await?;
    println!("provider listening on {}", running.local_addr());

    tokio::signal::ctrl_c().await?;
    running.shutdown().await;
    Ok(())
}
