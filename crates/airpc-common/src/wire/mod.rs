//! Wire codec: framing plus body serializers.

pub mod frame;
pub mod serializer;

pub use frame::{
    decode_message, encode_message, read_message, write_message, HEADER_LEN, MAGIC, MAX_BODY_LEN,
    VERSION,
};
pub use serializer::SerializerKind;
