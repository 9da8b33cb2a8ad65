//! Property tests for two invariants that aren't natural to pin down with a
//! single literal example: that any single-bit corruption of a frame's
//! MAC-covered bytes is always caught, and that repeated key-request
//! packets while one is already outstanding never produce a second `K`
//! line.

use ekeyd_core::{Connection, ConnectionAction, KeyLookup, Platform};
use ekeyd_crypto::{Primitive, compute_mac, personalization};
use ekeyd_proto::packet;
use proptest::prelude::*;
use std::time::Instant;

struct FixedPlatform;
impl Platform for FixedPlatform {
    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct OneDeviceKeyring {
    serial: [u8; 12],
    long_term_key: [u8; 32],
}
impl KeyLookup for OneDeviceKeyring {
    fn find(&self, serial: &[u8; 12]) -> Option<[u8; 32]> {
        (*serial == self.serial).then_some(self.long_term_key)
    }
}

fn mac_covered_for(type_byte: u8, class_byte: u8, field: [u8; 50]) -> [u8; 52] {
    let mut covered = [0u8; 52];
    covered[0] = type_byte;
    covered[1] = class_byte;
    covered[2..].copy_from_slice(&field);
    covered
}

fn frame_from(mac_covered: [u8; 52], mac: [u8; 6]) -> [u8; 64] {
    let mut frame = [b' '; 64];
    frame[0] = b'*';
    frame[1] = b' ';
    frame[2..54].copy_from_slice(&mac_covered);
    let mac_text = ekeyd_proto::pem64::encode(&mac);
    frame[54..54 + mac_text.len()].copy_from_slice(mac_text.as_bytes());
    frame[62] = 0x0D;
    frame[63] = 0x0A;
    frame
}

proptest! {
    /// Flipping any single bit among the 52 MAC-covered bytes (type, class,
    /// and the 50-byte payload field) of an otherwise validly signed frame
    /// always invalidates the transmitted MAC.
    #[test]
    fn any_bit_flip_in_the_covered_bytes_breaks_the_mac(
        flip_index in 0usize..52,
        flip_bit in 0u8..8,
        key in prop::array::uniform32(any::<u8>()),
    ) {
        let serial = [0x07u8; 12];
        let primitive = Primitive::prepare(&serial, &key, &personalization::MESSAGE_AUTHENTICATION_CODE_STATE);

        let mut field = [b' '; 50];
        field[..4].copy_from_slice(b"TEST");
        let mac_covered = mac_covered_for(b'I', b'>', field);
        let mac = compute_mac(&primitive, &mac_covered);
        let frame = frame_from(mac_covered, mac);

        let mut corrupted = frame;
        corrupted[2 + flip_index] ^= 1 << flip_bit;

        let decoded = packet::decode(&corrupted).expect("an ASCII frame always decodes");
        let expected = compute_mac(&primitive, &decoded.mac_covered);
        prop_assert_ne!(expected, decoded.mac);
    }

    /// However many times a device retransmits its key request while one
    /// `K` line is already outstanding, at most one `SendLine` action
    /// carrying a `K` line is ever produced before either a reply arrives
    /// or the repeat budget resets the connection.
    #[test]
    fn at_most_one_outstanding_key_request_per_key(repeat_count in 0u32..8) {
        let serial = [0x09u8; 12];
        let long_term_key = [0x0Au8; 32];
        let keyring = OneDeviceKeyring { serial, long_term_key };
        let platform = FixedPlatform;

        let mut connection = Connection::new();
        let mac_covered = mac_covered_for(b'S', b'!', {
            let mut f = [b' '; 50];
            let encoded = ekeyd_proto::pem64::encode(&serial);
            f[2..2 + encoded.len()].copy_from_slice(encoded.as_bytes());
            f
        });
        let snum_frame = frame_from(mac_covered, [0u8; 6]);
        let decoded = packet::decode(&snum_frame).unwrap();
        connection.step(decoded, &platform, &keyring);

        let default_mac = Primitive::prepare(&serial, &[0u8; 32], &personalization::MESSAGE_AUTHENTICATION_CODE_STATE);
        let keyreq_covered = mac_covered_for(b'k', b'>', [b' '; 50]);
        let keyreq_mac = compute_mac(&default_mac, &keyreq_covered);
        let keyreq_frame = frame_from(keyreq_covered, keyreq_mac);

        let mut key_lines = 0usize;
        for _ in 0..=repeat_count {
            let decoded = packet::decode(&keyreq_frame).unwrap();
            let actions = connection.step(decoded, &platform, &keyring);
            key_lines += actions
                .iter()
                .filter(|action| matches!(action, ConnectionAction::SendLine(line) if line.first() == Some(&b'K')))
                .count();
            if matches!(connection.state(), ekeyd_core::ConnectionState::Init) {
                break;
            }
        }

        prop_assert!(key_lines <= 1);
    }
}
