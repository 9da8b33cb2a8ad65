//! Wire framing and packet decoding for the entropy key device protocol.
//!
//! Three layers, none of which perform I/O or hold cryptographic state:
//!
//! - [`pem64`]: the restricted Base64 variant used for binary payloads, MAC
//!   halves, and 12-bit subcodes.
//! - [`frame`]: turns a raw byte stream into validated 64-byte frames.
//! - [`packet`]: classifies a frame and decodes its payload, leaving MAC
//!   verification to the connection layer that owns the keyed primitive.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod packet;
pub mod pem64;

pub use errors::{ProtocolError, Result};
pub use frame::{FRAME_SIZE, Framer, RawFrame};
pub use packet::{Class, DecodedPacket, Payload, PacketType, decode as decode_packet};
