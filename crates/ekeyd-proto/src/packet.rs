//! Packet decoding: classifying a framed record and extracting its payload.
//!
//! This layer trusts the frame's SOF/EOF markers (already validated by
//! [`crate::frame::Framer`]) but not its contents. It classifies the type
//! and class tags, decodes the payload, and extracts the transmitted
//! (still-unverified) MAC. Verifying that MAC against the keyed primitive,
//! and rewriting the type to [`PacketType::KeyRejected`] on mismatch, is a
//! connection-layer concern — the crypto state lives there, not here.

use crate::{
    errors::{ProtocolError, Result},
    frame::RawFrame,
    pem64,
};

/// One of the eight packet kinds the device or host ever sends, plus the
/// sentinel the connection layer assigns on MAC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// `S` — the device's 12-byte serial number.
    SerialNumber,
    /// `I` — telemetry (FIPS/Shannon/temperature/voltage).
    Info,
    /// `W` — a firmware warning, treated as informational.
    Warn,
    /// `E` — one 32-byte encrypted entropy block.
    Entropy,
    /// `k` — the device requesting a fresh session key.
    KeyRequest,
    /// `K` — the device's nonce reply completing a key exchange.
    Key,
    /// `M` — long-term-rekey handshake MAC.
    LongTermRekeyMac,
    /// `L` — long-term-rekey nonce reply.
    LongTermRekey,
    /// Assigned by the connection layer when MAC verification fails; never
    /// produced by [`decode`] itself.
    KeyRejected,
}

impl PacketType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'S' => Some(Self::SerialNumber),
            b'I' => Some(Self::Info),
            b'W' => Some(Self::Warn),
            b'E' => Some(Self::Entropy),
            b'k' => Some(Self::KeyRequest),
            b'K' => Some(Self::Key),
            b'M' => Some(Self::LongTermRekeyMac),
            b'L' => Some(Self::LongTermRekey),
            _ => None,
        }
    }
}

/// The class tag at offset 3: whether the payload is ASCII text or binary
/// PEM64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// `>` — payload is ASCII, space-padded.
    Ascii,
    /// `!` — payload is PEM64-encoded binary.
    Binary,
}

impl Class {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'>' => Some(Self::Ascii),
            b'!' => Some(Self::Binary),
            _ => None,
        }
    }
}

/// A decoded payload: either the trimmed ASCII text, or the decoded binary
/// bytes (at most 36, since 48 Base64 characters decode to 36 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Right-trimmed ASCII text from offsets 4..54.
    Ascii(String),
    /// Decoded binary bytes from offsets 6..54.
    Binary(Vec<u8>),
}

/// A frame, classified and decoded, with its MAC still unverified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// The packet's type tag.
    pub kind: PacketType,
    /// The packet's class tag.
    pub class: Class,
    /// 12-bit subcode (sequence number for entropy packets); zero for ASCII
    /// packets, which carry no subcode field.
    pub subcode: u16,
    /// The two raw PEM64 subcode characters as transmitted, before
    /// decoding. The entropy keystream is derived from these bytes
    /// directly, not from the decoded `subcode` value.
    pub subcode_raw: [u8; 2],
    /// The decoded payload.
    pub payload: Payload,
    /// The 52 bytes the MAC is computed over: TYPE ‖ CLASS ‖ PAYLOAD.
    pub mac_covered: [u8; 52],
    /// The transmitted MAC, decoded from its 8 PEM64 characters into 6
    /// bytes (two independent 4-character groups of 3 bytes each).
    pub mac: [u8; 6],
}

/// Decodes an already-framed 64-byte record.
///
/// # Errors
///
/// - [`ProtocolError::UnknownPacketType`] if the type tag isn't one of the
///   eight known kinds.
/// - [`ProtocolError::InvalidClass`] if the class tag is neither `>` nor
///   `!`.
pub fn decode(frame: &RawFrame) -> Result<DecodedPacket> {
    let type_byte = frame[2];
    let class_byte = frame[3];

    let kind = PacketType::from_byte(type_byte).ok_or(ProtocolError::UnknownPacketType(type_byte))?;
    let class = Class::from_byte(class_byte).ok_or(ProtocolError::InvalidClass(class_byte))?;

    let mut mac_covered = [0u8; 52];
    mac_covered.copy_from_slice(&frame[2..54]);

    let mac_text = std::str::from_utf8(&frame[54..62]).unwrap_or("");
    let mac_half_a = pem64::decode(&mac_text[0..4.min(mac_text.len())]);
    let mac_half_b_start = 4.min(mac_text.len());
    let mac_half_b = pem64::decode(&mac_text[mac_half_b_start..]);
    let mut mac = [0u8; 6];
    for (i, byte) in mac_half_a.iter().take(3).enumerate() {
        mac[i] = *byte;
    }
    for (i, byte) in mac_half_b.iter().take(3).enumerate() {
        mac[3 + i] = *byte;
    }

    let (subcode, subcode_raw, payload) = match class {
        Class::Binary => {
            let subcode_chars = [frame[4], frame[5]];
            let subcode = pem64::decode_subcode(subcode_chars);
            let binary_text = std::str::from_utf8(&frame[6..54]).unwrap_or("");
            let decoded = pem64::decode(binary_text);
            (subcode, subcode_chars, Payload::Binary(decoded))
        },
        Class::Ascii => {
            let text = std::str::from_utf8(&frame[4..54]).unwrap_or("");
            (0u16, [0u8; 2], Payload::Ascii(text.trim_end_matches(' ').to_string()))
        },
    };

    Ok(DecodedPacket { kind, class, subcode, subcode_raw, payload, mac_covered, mac })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_frame() -> [u8; 64] {
        let mut frame = [b' '; 64];
        frame[0] = b'*';
        frame[1] = b' ';
        frame[62] = 0x0D;
        frame[63] = 0x0A;
        frame
    }

    #[test]
    fn decodes_ascii_info_packet() {
        let mut frame = base_frame();
        frame[2] = b'I';
        frame[3] = b'>';
        frame[4..4 + 5].copy_from_slice(b"F1000");
        let packet = decode(&frame).unwrap();
        assert_eq!(packet.kind, PacketType::Info);
        assert_eq!(packet.class, Class::Ascii);
        assert_eq!(packet.payload, Payload::Ascii("F1000".to_string()));
        assert_eq!(packet.subcode, 0);
    }

    #[test]
    fn decodes_binary_entropy_packet() {
        let mut frame = base_frame();
        frame[2] = b'E';
        frame[3] = b'!';
        frame[4] = b'A';
        frame[5] = b'B';
        let payload_chars = pem64::encode(&[0xAAu8; 32]);
        frame[6..6 + 44].copy_from_slice(payload_chars.as_bytes());
        let packet = decode(&frame).unwrap();
        assert_eq!(packet.kind, PacketType::Entropy);
        assert_eq!(packet.class, Class::Binary);
        match packet.payload {
            Payload::Binary(bytes) => assert_eq!(bytes, vec![0xAAu8; 32]),
            Payload::Ascii(_) => panic!("expected binary payload"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let mut frame = base_frame();
        frame[2] = b'?';
        frame[3] = b'>';
        assert_eq!(decode(&frame), Err(ProtocolError::UnknownPacketType(b'?')));
    }

    #[test]
    fn rejects_invalid_class() {
        let mut frame = base_frame();
        frame[2] = b'I';
        frame[3] = b'?';
        assert_eq!(decode(&frame), Err(ProtocolError::InvalidClass(b'?')));
    }

    #[test]
    fn mac_covered_bytes_are_type_class_payload() {
        let mut frame = base_frame();
        frame[2] = b'I';
        frame[3] = b'>';
        let packet = decode(&frame).unwrap();
        assert_eq!(packet.mac_covered.len(), 52);
        assert_eq!(packet.mac_covered[0], b'I');
        assert_eq!(packet.mac_covered[1], b'>');
    }
}
