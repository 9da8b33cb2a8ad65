//! Key derivation: session keys from a long-term key, long-term keys from a
//! master secret. Both use the same primitive construction with a
//! different personalization, fed the device's nonce reply then the host's
//! nonce, in that order.

use crate::{personalization, primitive::Primitive};

/// Derives a 32-byte session key from the long-term key and both handshake
/// nonces.
#[must_use]
pub fn derive_session_key(
    serial: &[u8; 12],
    long_term_key: &[u8; 32],
    device_nonce_reply: &[u8; 32],
    host_nonce: &[u8; 12],
) -> [u8; 32] {
    let primitive = Primitive::prepare(serial, long_term_key, &personalization::RE_KEYING_STATE);
    primitive.finalize(&[device_nonce_reply, host_nonce])
}

/// Derives a new 32-byte long-term key from the master secret and both
/// rekey-handshake nonces.
#[must_use]
pub fn derive_long_term_key(
    serial: &[u8; 12],
    master_secret: &[u8; 32],
    device_nonce_reply: &[u8; 32],
    host_nonce: &[u8; 12],
) -> [u8; 32] {
    let primitive =
        Primitive::prepare(serial, master_secret, &personalization::LONG_TERM_REKEYING_STATE);
    primitive.finalize(&[device_nonce_reply, host_nonce])
}
