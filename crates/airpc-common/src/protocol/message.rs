//! Framed message model and message id generation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{Result, RpcError};
use super::request::RpcRequest;
use super::response::RpcResponse;

/// Process-wide monotonic counter for message ids.
///
/// A message id correlates a request with its response on a connection.
/// Uniqueness is only required among outstanding calls on one connection,
/// which a shared monotonic counter trivially guarantees.
static MESSAGE_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Next message id, strictly greater than every id handed out before.
pub fn next_message_id() -> u32 {
    MESSAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    HeartbeatRequest = 2,
    HeartbeatResponse = 3,
}

impl MessageType {
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::HeartbeatRequest),
            3 => Ok(MessageType::HeartbeatResponse),
            other => Err(RpcError::Protocol(format!(
                "unknown message type: {}",
                other
            ))),
        }
    }

    /// Whether the body of this message deserializes as a request.
    pub fn carries_request(self) -> bool {
        matches!(self, MessageType::Request | MessageType::HeartbeatRequest)
    }
}

/// The decoded body of a framed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(RpcRequest),
    Response(RpcResponse),
}

impl Payload {
    pub fn as_request(&self) -> Option<&RpcRequest> {
        match self {
            Payload::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&RpcResponse> {
        match self {
            Payload::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<RpcResponse> {
        match self {
            Payload::Response(r) => Some(r),
            _ => None,
        }
    }
}

/// A framed message: header fields plus the decoded body and attachments.
///
/// `attachments` carries context-propagation headers (e.g. trace ids); they
/// travel with the body on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    pub message_type: MessageType,
    pub serializer: crate::wire::SerializerKind,
    pub message_id: u32,
    pub payload: Payload,
    pub attachments: BTreeMap<String, String>,
}

impl RpcMessage {
    pub fn request(message_id: u32, request: RpcRequest) -> Self {
        RpcMessage {
            message_type: MessageType::Request,
            serializer: crate::wire::SerializerKind::default(),
            message_id,
            payload: Payload::Request(request),
            attachments: BTreeMap::new(),
        }
    }

    pub fn response(message_id: u32, response: RpcResponse) -> Self {
        RpcMessage {
            message_type: MessageType::Response,
            serializer: crate::wire::SerializerKind::default(),
            message_id,
            payload: Payload::Response(response),
            attachments: BTreeMap::new(),
        }
    }

    pub fn heartbeat_request(message_id: u32) -> Self {
        RpcMessage {
            message_type: MessageType::HeartbeatRequest,
            serializer: crate::wire::SerializerKind::default(),
            message_id,
            payload: Payload::Request(RpcRequest::heartbeat()),
            attachments: BTreeMap::new(),
        }
    }

    pub fn heartbeat_response(message_id: u32, request_id: &str) -> Self {
        RpcMessage {
            message_type: MessageType::HeartbeatResponse,
            serializer: crate::wire::SerializerKind::default(),
            message_id,
            payload: Payload::Response(RpcResponse::pong(request_id)),
            attachments: BTreeMap::new(),
        }
    }

    pub fn with_serializer(mut self, serializer: crate::wire::SerializerKind) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }
}
