//! Request dispatch.
//!
//! Providers implement [`RpcService`] and register it under the service
//! interface name carried in `class_name`. The dispatcher resolves each
//! request to its service and turns the outcome into a response; failures
//! are carried back as the response's error string, never as a dropped
//! connection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use airpc_common::{RpcRequest, RpcResponse, Value};

/// A service implementation callable over RPC.
pub trait RpcService: Send + Sync {
    /// The interface name clients address, e.g. `"com.example.HelloService"`.
    fn service_name(&self) -> &str;

    /// Invoke `method` with the given arguments.
    fn invoke(
        &self,
        method: &str,
        param_types: &[String],
        params: &[Value],
    ) -> Result<Value, String>;
}

/// Maps service names to implementations.
#[derive(Default)]
pub struct ServiceDispatcher {
    services: RwLock<HashMap<String, Arc<dyn RpcService>>>,
}

impl ServiceDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: Arc<dyn RpcService>) {
        let name = service.service_name().to_string();
        self.services
            .write()
            .expect("dispatcher lock poisoned")
            .insert(name, service);
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services
            .read()
            .expect("dispatcher lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let service = self
            .services
            .read()
            .expect("dispatcher lock poisoned")
            .get(&request.class_name)
            .cloned();

        match service {
            Some(service) => {
                match service.invoke(&request.method_name, &request.param_types, &request.params) {
                    Ok(result) => RpcResponse::success(&request.request_id, result),
                    Err(error) => RpcResponse::error(&request.request_id, error),
                }
            }
            None => RpcResponse::error(
                &request.request_id,
                format!("service not found: {}", request.class_name),
            ),
        }
    }
}
