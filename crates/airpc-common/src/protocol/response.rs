use serde::{Deserialize, Serialize};

use super::value::Value;

/// An RPC response as carried in a framed message body.
///
/// Exactly one of `result` / `error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        RpcResponse {
            request_id: request_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        RpcResponse {
            request_id: request_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// The heartbeat reply body.
    pub fn pong(request_id: impl Into<String>) -> Self {
        Self::success(request_id, Value::Str("PONG".to_string()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let resp = RpcResponse::success("r1", Value::Int(42));
        assert_eq!(resp.result, Some(Value::Int(42)));
        assert!(resp.error.is_none());
        assert!(!resp.is_error());
    }

    #[test]
    fn test_error_response() {
        let resp = RpcResponse::error("r1", "boom");
        assert!(resp.result.is_none());
        assert_eq!(resp.error.as_deref(), Some("boom"));
        assert!(resp.is_error());
    }

    #[test]
    fn test_pong() {
        let resp = RpcResponse::pong("hb-1");
        assert_eq!(resp.result, Some(Value::Str("PONG".to_string())));
    }
}
