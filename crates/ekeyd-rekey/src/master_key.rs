//! Decodes a master key given on the command line, optionally carrying a
//! trailing CRC-8 check digit to catch transcription errors.

/// Why a master-key argument could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MasterKeyError {
    /// The PEM64 text didn't decode to 32 or 33 bytes.
    #[error("master key decoded to {0} bytes, expected 32 (or 33 with a check digit)")]
    WrongLength(usize),
    /// A 33-byte decode's trailing byte didn't match the CRC-8 of the first 32.
    #[error("master key check digit is incorrect")]
    BadCheckDigit,
}

/// Decodes `text` as a master key, verifying the check digit if present.
pub fn extract(text: &str) -> Result<[u8; 32], MasterKeyError> {
    let decoded = ekeyd_proto::pem64::decode(text.trim());
    match decoded.len() {
        32 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&decoded);
            Ok(key)
        },
        33 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(&decoded[..32]);
            if crc8(&key) != decoded[32] {
                return Err(MasterKeyError::BadCheckDigit);
            }
            Ok(key)
        },
        other => Err(MasterKeyError::WrongLength(other)),
    }
}

/// CCITT CRC-8 (polynomial 0x31, initial value 0xFF), matching the check
/// digit a provisioning slip prints alongside a master key.
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_bare_32_byte_key() {
        let key = [7u8; 32];
        let text = ekeyd_proto::pem64::encode(&key);
        assert_eq!(extract(&text), Ok(key));
    }

    #[test]
    fn decodes_a_33_byte_key_with_correct_check_digit() {
        let key = [9u8; 32];
        let mut with_digit = key.to_vec();
        with_digit.push(crc8(&key));
        let text = ekeyd_proto::pem64::encode(&with_digit);
        assert_eq!(extract(&text), Ok(key));
    }

    #[test]
    fn rejects_a_wrong_check_digit() {
        let key = [9u8; 32];
        let mut with_digit = key.to_vec();
        with_digit.push(crc8(&key) ^ 0xFF);
        let text = ekeyd_proto::pem64::encode(&with_digit);
        assert_eq!(extract(&text), Err(MasterKeyError::BadCheckDigit));
    }

    #[test]
    fn rejects_the_wrong_length() {
        let text = ekeyd_proto::pem64::encode(&[1u8; 10]);
        assert_eq!(extract(&text), Err(MasterKeyError::WrongLength(10)));
    }
}
