//! Body serializers.
//!
//! Two formats are supported: a self-describing JSON codec and a compact
//! postcard codec. The wire carries one byte identifying the format so both
//! sides of a connection can mix them; postcard is the default.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{Result, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializerKind {
    Json = 0,
    Postcard = 1,
}

impl Default for SerializerKind {
    fn default() -> Self {
        SerializerKind::Postcard
    }
}

impl SerializerKind {
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(SerializerKind::Json),
            1 => Ok(SerializerKind::Postcard),
            other => Err(RpcError::Protocol(format!(
                "unsupported serializer type: {}",
                other
            ))),
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializerKind::Json => Ok(serde_json::to_vec(value)?),
            SerializerKind::Postcard => Ok(postcard::to_allocvec(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            SerializerKind::Json => Ok(serde_json::from_slice(bytes)?),
            SerializerKind::Postcard => Ok(postcard::from_bytes(bytes)?),
        }
    }
}
