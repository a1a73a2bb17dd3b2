//! Wire framing.
//!
//! Every message on the wire is framed as:
//!
//! ```text
//! magic(4)=0xCAFEBABE | version(1)=1 | serializer(1) | type(1) | msg_id(4) | length(4) | body(length)
//! ```
//!
//! All integers are big-endian; the header is 15 bytes. The body is the
//! request or response (plus attachments) encoded with the serializer named
//! in the header. A frame whose magic does not match is a protocol violation
//! and the connection carrying it must be closed without resynchronization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::message::{MessageType, Payload, RpcMessage};
use crate::protocol::request::RpcRequest;
use crate::protocol::response::RpcResponse;
use crate::wire::serializer::SerializerKind;

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 15;

/// Upper bound on body length, guarding against bogus length fields.
pub const MAX_BODY_LEN: usize = 100 * 1024 * 1024;

/// Serialized body layout: attachments travel with the payload.
#[derive(Serialize, Deserialize)]
struct WireBody<T> {
    attachments: BTreeMap<String, String>,
    data: T,
}

/// Encode a message into a single contiguous frame.
pub fn encode_message(msg: &RpcMessage) -> Result<Vec<u8>> {
    let body = match &msg.payload {
        Payload::Request(request) => msg.serializer.serialize(&WireBody {
            attachments: msg.attachments.clone(),
            data: request,
        })?,
        Payload::Response(response) => msg.serializer.serialize(&WireBody {
            attachments: msg.attachments.clone(),
            data: response,
        })?,
    };

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.push(VERSION);
    frame.push(msg.serializer.to_wire());
    frame.push(msg.message_type.to_wire());
    frame.extend_from_slice(&msg.message_id.to_be_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parsed header fields.
struct Header {
    serializer: SerializerKind,
    message_type: MessageType,
    message_id: u32,
    body_len: usize,
}

fn parse_header(buf: &[u8]) -> Result<Header> {
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(RpcError::Protocol(format!("bad magic: 0x{:08X}", magic)));
    }

    // Version is validated loosely: unknown versions fall through to the
    // type switch.
    let _version = buf[4];
    let serializer = SerializerKind::from_wire(buf[5])?;
    let message_type = MessageType::from_wire(buf[6])?;
    let message_id = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);
    let body_len = u32::from_be_bytes([buf[11], buf[12], buf[13], buf[14]]) as usize;

    if body_len > MAX_BODY_LEN {
        return Err(RpcError::Protocol(format!(
            "body too large: {} bytes (max {})",
            body_len, MAX_BODY_LEN
        )));
    }

    Ok(Header {
        serializer,
        message_type,
        message_id,
        body_len,
    })
}

fn decode_body(header: &Header, body: &[u8]) -> Result<RpcMessage> {
    let (payload, attachments) = if header.message_type.carries_request() {
        let wire: WireBody<RpcRequest> = header.serializer.deserialize(body)?;
        (Payload::Request(wire.data), wire.attachments)
    } else {
        let wire: WireBody<RpcResponse> = header.serializer.deserialize(body)?;
        (Payload::Response(wire.data), wire.attachments)
    };

    Ok(RpcMessage {
        message_type: header.message_type,
        serializer: header.serializer,
        message_id: header.message_id,
        payload,
        attachments,
    })
}

/// Decode one message out of a byte buffer.
///
/// Returns `Ok(None)` when fewer bytes are buffered than a complete frame
/// needs (the cursor is conceptually rewound: nothing is consumed). On
/// success returns the message and the number of bytes consumed. A bad
/// magic or malformed header is an error; the caller must close the
/// connection.
pub fn decode_message(buf: &[u8]) -> Result<Option<(RpcMessage, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = parse_header(&buf[..HEADER_LEN])?;

    if buf.len() < HEADER_LEN + header.body_len {
        return Ok(None);
    }

    let body = &buf[HEADER_LEN..HEADER_LEN + header.body_len];
    let msg = decode_body(&header, body)?;
    Ok(Some((msg, HEADER_LEN + header.body_len)))
}

/// Write one framed message to a stream. The frame is assembled in memory
/// first so the transport never observes a partial header.
pub async fn write_message<W>(writer: &mut W, msg: &RpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message from a stream.
///
/// Blocks until a full frame is available. Returns a protocol violation for
/// bad magic or malformed headers; the caller must close the connection.
pub async fn read_message<R>(reader: &mut R) -> Result<RpcMessage>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;

    let header = parse_header(&header_buf)?;

    let mut body = vec![0u8; header.body_len];
    reader.read_exact(&mut body).await?;

    decode_body(&header, &body)
}
