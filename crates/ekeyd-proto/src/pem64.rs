//! PEM64 — the restricted Base64 variant used on the wire.
//!
//! Standard alphabet (`A-Z a-z 0-9 + /`) with `=` padding. Decoding never
//! fails outright: a byte outside the alphabet simply ends decoding at that
//! point, mirroring the firmware's inverse-table-miss behaviour rather than
//! treating it as an error.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn inverse(byte: u8) -> Option<u8> {
    ALPHABET.iter().position(|&b| b == byte).map(|i| i as u8)
}

/// Encodes `data` as standard Base64 with `=` padding.
///
/// Encoded length is `ceil(N/3) * 4` for `N` input bytes.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();

        let c0 = b0 >> 2;
        let c1 = ((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4);
        out.push(ALPHABET[c0 as usize] as char);
        out.push(ALPHABET[c1 as usize] as char);

        match b1 {
            Some(b1) => {
                let c2 = ((b1 & 0x0F) << 2) | (b2.unwrap_or(0) >> 6);
                out.push(ALPHABET[c2 as usize] as char);
            },
            None => out.push('='),
        }

        match b2 {
            Some(b2) => out.push(ALPHABET[(b2 & 0x3F) as usize] as char),
            None => out.push('='),
        }
    }
    out
}

/// Decodes a PEM64 string into bytes.
///
/// Never panics. The first byte that is neither in the alphabet nor `=`
/// padding ends decoding early and whatever was already decoded is
/// returned — callers that need a specific length (subcodes, MAC halves)
/// validate the result length themselves rather than relying on this
/// function to reject short input.
#[must_use]
pub fn decode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() / 4 * 3);
    let mut quantum = [0u8; 4];
    let mut filled = 0usize;

    for byte in text.bytes() {
        if byte == b'=' {
            break;
        }
        let Some(value) = inverse(byte) else {
            break;
        };
        quantum[filled] = value;
        filled += 1;
        if filled == 4 {
            out.push((quantum[0] << 2) | (quantum[1] >> 4));
            out.push((quantum[1] << 4) | (quantum[2] >> 2));
            out.push((quantum[2] << 6) | quantum[3]);
            filled = 0;
        }
    }

    match filled {
        2 => out.push((quantum[0] << 2) | (quantum[1] >> 4)),
        3 => {
            out.push((quantum[0] << 2) | (quantum[1] >> 4));
            out.push((quantum[1] << 4) | (quantum[2] >> 2));
        },
        _ => {},
    }

    out
}

/// Encodes a 12-bit value as exactly 2 PEM64 characters: low 6 bits first,
/// then the next 6 bits. This is the subcode's own digit order, distinct
/// from the byte-triplet packing [`encode`] uses for binary payloads.
#[must_use]
pub fn encode_subcode(value: u16) -> [u8; 2] {
    let low = (value & 0x3F) as usize;
    let high = ((value >> 6) & 0x3F) as usize;
    [ALPHABET[low], ALPHABET[high]]
}

/// Decodes 2 PEM64 characters into a 12-bit value (0..=4095).
///
/// A character outside the alphabet decodes as zero for that digit.
#[must_use]
pub fn decode_subcode(chars: [u8; 2]) -> u16 {
    let low = u16::from(inverse(chars[0]).unwrap_or(0));
    let high = u16::from(inverse(chars[1]).unwrap_or(0));
    (high << 6) | low
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "Zg==");
        assert_eq!(encode(b"fo"), "Zm8=");
        assert_eq!(encode(b"foo"), "Zm9v");
        assert_eq!(decode("Zm9v"), b"foo");
        assert_eq!(decode("Zg=="), b"f");
    }

    #[test]
    fn decode_stops_at_invalid_byte_without_panicking() {
        assert_eq!(decode("Zm9v extra garbage"), b"foo");
        assert_eq!(decode(""), Vec::<u8>::new());
        assert_eq!(decode(" "), Vec::<u8>::new());
    }

    #[test]
    fn subcode_round_trip_all_values() {
        for value in 0u16..4096 {
            let chars = encode_subcode(value);
            assert_eq!(decode_subcode(chars), value);
        }
    }

    proptest! {
        #[test]
        fn round_trip(data in prop::collection::vec(any::<u8>(), 0..128)) {
            let encoded = encode(&data);
            prop_assert_eq!(decode(&encoded), data);
        }
    }
}
