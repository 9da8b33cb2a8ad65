//! Property tests spanning the framer and packet decoder together.

use ekeyd_proto::{Class, Framer, Payload, decode_packet, pem64};
use proptest::prelude::*;

fn wrap_ascii(kind: u8, payload: &str) -> [u8; 64] {
    let mut frame = [b' '; 64];
    frame[0] = b'*';
    frame[1] = b' ';
    frame[2] = kind;
    frame[3] = b'>';
    let bytes = payload.as_bytes();
    frame[4..4 + bytes.len()].copy_from_slice(bytes);
    frame[62] = 0x0D;
    frame[63] = 0x0A;
    frame
}

proptest! {
    #[test]
    fn framer_then_decoder_round_trips_ascii_payload(
        noise in prop::collection::vec(any::<u8>().prop_filter("no CR", |b| *b != 0x0D), 0..40),
        payload in "[A-Za-z0-9]{0,20}",
    ) {
        let frame = wrap_ascii(b'I', &payload);
        let mut stream = noise;
        stream.extend_from_slice(&frame);

        let mut framer = Framer::new();
        let frames = framer.feed(&stream);
        prop_assert_eq!(frames.len(), 1);

        let packet = decode_packet(&frames[0]).unwrap();
        prop_assert_eq!(packet.class, Class::Ascii);
        match packet.payload {
            Payload::Ascii(text) => prop_assert_eq!(text, payload),
            Payload::Binary(_) => prop_assert!(false, "expected ascii payload"),
        }
    }
}

#[test]
fn entropy_frame_end_to_end() {
    let mut frame = [b' '; 64];
    frame[0] = b'*';
    frame[1] = b' ';
    frame[2] = b'E';
    frame[3] = b'!';
    frame[4] = b'A';
    frame[5] = b'A';
    let body = pem64::encode(&[0x5Au8; 32]);
    frame[6..6 + 44].copy_from_slice(body.as_bytes());
    frame[62] = 0x0D;
    frame[63] = 0x0A;

    let mut framer = Framer::new();
    let frames = framer.feed(&frame);
    assert_eq!(frames.len(), 1);

    let packet = decode_packet(&frames[0]).unwrap();
    match packet.payload {
        Payload::Binary(bytes) => assert_eq!(bytes, vec![0x5Au8; 32]),
        Payload::Ascii(_) => panic!("expected binary payload"),
    }
    assert_eq!(packet.subcode, 0);
}
