//! Error types for framing and packet decoding.

use thiserror::Error;

/// Errors produced while decoding an already-framed 64-byte record.
///
/// These never arise from truncated or misaligned input — that is the
/// [`crate::frame::Framer`]'s job to resolve before a frame ever reaches the
/// packet decoder. They arise from a syntactically well-formed frame
/// carrying a value the protocol does not define.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Byte at offset 2 (the type tag) is not one of the eight known kinds.
    #[error("unrecognized packet type byte {0:#04x}")]
    UnknownPacketType(u8),

    /// Byte at offset 3 (the class tag) is neither `>` nor `!`.
    #[error("invalid class byte {0:#04x}")]
    InvalidClass(u8),

    /// A serial-number packet's payload decoded to fewer than 12 bytes.
    #[error("serial number payload too short: {0} bytes")]
    SerialTooShort(usize),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
