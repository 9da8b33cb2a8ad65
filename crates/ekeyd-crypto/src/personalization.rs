//! The fixed 96-byte, space-padded domain-separation strings fed to the
//! primitive's PERS block before any message bytes are processed.
//!
//! Each named constant pins one role the primitive is ever armed for; using
//! the wrong one for a given role would let two unrelated operations (say,
//! the session MAC and the session cipher) collide on the same keystream.

const fn pad96(label: &str) -> [u8; 96] {
    let bytes = label.as_bytes();
    let mut out = [b' '; 96];
    let mut i = 0;
    while i < bytes.len() {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

/// Derives the per-device long-term key during the rekey handshake.
pub const LONG_TERM_REKEYING_STATE: [u8; 96] = pad96("LongTermReKeyingState");

/// Derives the per-session key from the LTK and both handshake nonces.
pub const RE_KEYING_STATE: [u8; 96] = pad96("ReKeyingState");

/// MACs every frame once a session key is armed.
pub const MESSAGE_AUTHENTICATION_CODE_STATE: [u8; 96] = pad96("MessageAuthenticationCodeState");

/// Generates the per-frame entropy keystream once a session key is armed.
pub const ENTROPY_ENCRYPTION_STATE: [u8; 96] = pad96("EntropyEncryptionState");

/// MACs the long-term-rekey handshake's own control frames.
pub const MESSAGE_AUTHENTICATION_CODE_STATE_FOR_LONG_TERM_REKEYING: [u8; 96] =
    pad96("MessageAuthenticationCodeStateForLongTermReKeying");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_personalizations_are_96_bytes() {
        for label in [
            &LONG_TERM_REKEYING_STATE,
            &RE_KEYING_STATE,
            &MESSAGE_AUTHENTICATION_CODE_STATE,
            &ENTROPY_ENCRYPTION_STATE,
            &MESSAGE_AUTHENTICATION_CODE_STATE_FOR_LONG_TERM_REKEYING,
        ] {
            assert_eq!(label.len(), 96);
            assert_eq!(label[95], b' ', "label shorter than 96 bytes must be space-padded");
        }
    }

    #[test]
    fn personalizations_are_pairwise_distinct() {
        let all = [
            LONG_TERM_REKEYING_STATE,
            RE_KEYING_STATE,
            MESSAGE_AUTHENTICATION_CODE_STATE,
            ENTROPY_ENCRYPTION_STATE,
            MESSAGE_AUTHENTICATION_CODE_STATE_FOR_LONG_TERM_REKEYING,
        ];
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }
}
