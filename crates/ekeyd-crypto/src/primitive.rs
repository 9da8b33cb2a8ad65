//! The keyed hash primitive wrapper shared by the MAC and the stream
//! cipher: one construction, armed differently per role by its
//! personalization string, then cloned cheaply before each single use.

use blake2::{
    Blake2bMac,
    digest::{Mac, Update, consts::U32},
};

/// `serial ‖ secret`, the key fed to the underlying keyed hash.
const KEY_LEN: usize = 44;

/// An "armed" primitive: keyed and domain-separated, ready to be cloned and
/// finalized once per message.
///
/// Cloning is cheap (a plain struct copy of the underlying hash state) and
/// is the only supported way to reuse an armed primitive — finalizing the
/// same state twice would leak the relationship between two messages.
#[derive(Clone)]
pub struct Primitive {
    armed: Blake2bMac<U32>,
}

impl Primitive {
    /// Arms a primitive for one personalization, keyed by `serial ‖
    /// secret`.
    ///
    /// # Panics
    ///
    /// Never, in practice: a 44-byte key is always within the keyed hash's
    /// accepted key length range. The `expect` below documents that
    /// invariant rather than guarding against a real failure mode.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn prepare(serial: &[u8; 12], secret: &[u8; 32], personalization: &[u8; 96]) -> Self {
        let mut key = [0u8; KEY_LEN];
        key[..12].copy_from_slice(serial);
        key[12..].copy_from_slice(secret);

        let mut armed = Blake2bMac::<U32>::new_from_slice(&key)
            .expect("invariant: 44-byte key is within the keyed hash's accepted range");
        Update::update(&mut armed, personalization);

        Self { armed }
    }

    /// Clones the armed state, feeds it every part in order, and finalizes
    /// to 32 bytes. This is the only way message bytes ever reach the
    /// primitive — the long-lived `armed` state itself is never finalized.
    #[must_use]
    pub fn finalize(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut copy = self.armed.clone();
        for part in parts {
            Update::update(&mut copy, part);
        }
        copy.finalize().into_bytes().into()
    }

    /// Computes the 32-byte digest over a single message.
    #[must_use]
    pub fn mac_digest(&self, message: &[u8]) -> [u8; 32] {
        self.finalize(&[message])
    }

    /// Computes the 32-byte keystream block for one sequence number, fed
    /// the packet's two raw subcode bytes.
    #[must_use]
    pub fn keystream(&self, subcode_bytes: [u8; 2]) -> [u8; 32] {
        self.finalize(&[&subcode_bytes])
    }
}

/// Truncates a 32-byte digest to the 6-byte transmitted MAC:
/// `digest[0..3] ‖ digest[29..32]`.
#[must_use]
pub fn truncate_mac(digest: &[u8; 32]) -> [u8; 6] {
    let mut out = [0u8; 6];
    out[0..3].copy_from_slice(&digest[0..3]);
    out[3..6].copy_from_slice(&digest[29..32]);
    out
}

/// Computes the 6-byte transmitted MAC over `message` directly.
#[must_use]
pub fn compute_mac(primitive: &Primitive, message: &[u8]) -> [u8; 6] {
    truncate_mac(&primitive.mac_digest(message))
}

/// XORs a 32-byte keystream block into `payload` in place.
pub fn xor_keystream(payload: &mut [u8; 32], keystream: &[u8; 32]) {
    for (byte, key_byte) in payload.iter_mut().zip(keystream.iter()) {
        *byte ^= key_byte;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::personalization;

    fn sample_primitive() -> Primitive {
        Primitive::prepare(&[0x11; 12], &[0x22; 32], &personalization::ENTROPY_ENCRYPTION_STATE)
    }

    #[test]
    fn mac_is_deterministic() {
        let primitive = sample_primitive();
        assert_eq!(primitive.mac_digest(b"hello"), primitive.mac_digest(b"hello"));
    }

    #[test]
    fn different_personalizations_diverge() {
        let a = Primitive::prepare(&[0x11; 12], &[0x22; 32], &personalization::ENTROPY_ENCRYPTION_STATE);
        let b = Primitive::prepare(
            &[0x11; 12],
            &[0x22; 32],
            &personalization::MESSAGE_AUTHENTICATION_CODE_STATE,
        );
        assert_ne!(a.mac_digest(b"hello"), b.mac_digest(b"hello"));
    }

    #[test]
    fn keystream_determinism_for_fixed_subcode() {
        let primitive = sample_primitive();
        let a = primitive.keystream([0, 0]);
        let b = primitive.keystream([0, 0]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_subcodes_diverge() {
        let primitive = sample_primitive();
        assert_ne!(primitive.keystream([0, 0]), primitive.keystream([1, 0]));
    }

    #[test]
    fn xor_involution() {
        let keystream = [0x42u8; 32];
        let mut payload = [0x99u8; 32];
        let original = payload;
        xor_keystream(&mut payload, &keystream);
        assert_ne!(payload, original);
        xor_keystream(&mut payload, &keystream);
        assert_eq!(payload, original);
    }

    proptest! {
        #[test]
        fn xor_is_always_involutive(payload in prop::array::uniform32(any::<u8>()), key in prop::array::uniform32(any::<u8>())) {
            let mut buf = payload;
            xor_keystream(&mut buf, &key);
            xor_keystream(&mut buf, &key);
            prop_assert_eq!(buf, payload);
        }
    }
}
