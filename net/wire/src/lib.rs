//! Packet wire format, framing codec, and payload interceptors for netframe.
//!
//! This crate provides the low-level protocol layer shared by clients and
//! servers: a fixed-width binary header, an incremental frame decoder that
//! tolerates arbitrary stream fragmentation, and a registry of pluggable
//! codecs for structured payloads carried inside binary frames.
//!
//! ## Wire Format
//!
//! ```text
//! +------------------+----------------------------+
//! | version (1B)     | protocol revision, fixed   |
//! +------------------+----------------------------+
//! | type (1B)        | routing tag                |
//! +------------------+----------------------------+
//! | payload_len (4B) | big-endian payload length  |
//! +------------------+----------------------------+
//! | sequence (4B)    | big-endian caller sequence |
//! +------------------+----------------------------+
//! | payload          | payload_len bytes          |
//! +------------------+----------------------------+
//! ```
//!
//! All numeric fields are big-endian; the header is encoded field by field,
//! never by copying an in-memory struct onto the wire.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod interceptor;
pub mod packet;

pub use codec::{
    encode_packet, PacketDecoder, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, PROTOCOL_VERSION,
};
pub use error::WireError;
pub use interceptor::{Interceptor, InterceptorError, InterceptorRegistry, JsonInterceptor};
pub use packet::{Packet, PacketType};
