use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::value::Value;

/// Counter component of generated request ids.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An RPC request as carried in a framed message body.
///
/// `class_name` identifies the target service interface and `method_name`
/// the operation on it. `param_types` carries the declared parameter type
/// names so a provider can disambiguate overloads; `params` carries the
/// argument values in declaration order. A request is immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub request_id: String,
    pub class_name: String,
    pub method_name: String,
    pub param_types: Vec<String>,
    pub params: Vec<Value>,
    pub heartbeat: bool,
}

impl RpcRequest {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        param_types: Vec<String>,
        params: Vec<Value>,
    ) -> Self {
        RpcRequest {
            request_id: generate_request_id(),
            class_name: class_name.into(),
            method_name: method_name.into(),
            param_types,
            params,
            heartbeat: false,
        }
    }

    /// An otherwise-empty request used as a heartbeat ping.
    pub fn heartbeat() -> Self {
        RpcRequest {
            request_id: generate_request_id(),
            class_name: String::new(),
            method_name: String::new(),
            param_types: Vec::new(),
            params: Vec::new(),
            heartbeat: true,
        }
    }
}

/// Generates a unique request id.
///
/// Combines the wall-clock second (upper 32 bits) with an atomic counter
/// (lower 32 bits) so ids stay unique across restarts and within a process.
fn generate_request_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{:x}", (timestamp << 32) | (counter & 0xFFFF_FFFF))
}
