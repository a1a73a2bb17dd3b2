//! Provider and consumer in one process, wired through an in-process
//! registry.
//!
//! Run with: `cargo run --example demo`

use std::sync::Arc;

use airpc_client::{service_client, RpcClient};
use airpc_common::{Registry, RpcConfig, StaticRegistry, Value};
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

service_client! {
    pub struct HelloServiceClient, service = "com.example.HelloService" {
        fn say_hello(name: "String");
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

    let registry = Arc::new(StaticRegistry::new());
    let registry_dyn: Arc<dyn Registry> = registry.clone();

    let server = RpcServer::new("127.0.0.1:0".parse().unwrap(), registry_dyn);
    server.register_service(Arc::new(HelloService));
    let running = server.start().await?;

    // the predictive balancer degrades to uniform weights while the
    // prediction service is unreachable
    let client = Arc::new(
        RpcClient::builder(registry.clone())
            .config(RpcConfig::default().apply_env())
            .build()?,
    );
    let hello = HelloServiceClient::new(Arc::clone(&client));

    for name in ["alpha", "beta", "gamma"] {
        let greeting = hello.say_hello(name).await?;
        println!("{:?}", greeting);
    }

    for metrics in client.metrics().snapshot() {
        println!(
            "{}: {} calls, {} ok, p99 {:?}ms",
            metrics.service, metrics.calls, metrics.successes, metrics.p99_latency_ms
        );
    }

    client.shutdown();
    running.shutdown().await;
    Ok(())
}
