//! airpc common types, wire protocol and configuration.
//!
//! This crate contains everything shared between the consumer and provider
//! sides of the framework:
//!
//! - **[`protocol`]**: request/response model, framed messages, message id
//!   generation and the error taxonomy
//! - **[`wire`]**: the binary frame layout and the body serializers
//! - **[`registry`]**: the service-discovery seam
//! - **[`config`]**: process-level configuration with defaults
//!
//! # Wire protocol
//!
//! ```text
//! magic(4)=0xCAFEBABE | version(1)=1 | serializer(1) | type(1) | msg_id(4) | length(4) | body
//! ```
//!
//! Requests and responses are correlated solely by `msg_id`, drawn from a
//! process-wide monotonic counter. Connections are multiplexed: responses
//! may arrive in any order relative to sends.

pub mod config;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use config::RpcConfig;
pub use protocol::{
    next_message_id, MessageType, Payload, Result, RpcError, RpcMessage, RpcRequest, RpcResponse,
    Value,
};
pub use registry::{endpoint_key, Registry, StaticRegistry};
pub use wire::SerializerKind;
