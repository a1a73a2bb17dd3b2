//! Protocol model.
//!
//! Core types shared by every component of the framework:
//!
//! - [`RpcRequest`] / [`RpcResponse`]: call bodies, immutable once sent
//! - [`RpcMessage`]: a framed message with header fields and attachments
//! - [`Value`]: serializer-agnostic argument/result values
//! - [`RpcError`]: the error taxonomy consumed by the retry policy

pub mod error;
pub mod message;
pub mod request;
pub mod response;
pub mod value;

pub use error::{Result, RpcError};
pub use message::{next_message_id, MessageType, Payload, RpcMessage};
pub use request::RpcRequest;
pub use response::RpcResponse;
pub use value::Value;
