#![no_main]

use ekeyd_proto::frame::Framer;
use libfuzzer_sys::fuzz_target;

// However the byte stream is chopped into arbitrary chunks, feeding it
// through a `Framer` must never panic, and every extracted frame must be
// exactly `FRAME_SIZE` bytes starting at `* `.
fuzz_target!(|chunks: Vec<Vec<u8>>| {
    let mut framer = Framer::new();
    for chunk in chunks {
        for frame in framer.feed(&chunk) {
            assert_eq!(frame.len(), ekeyd_proto::FRAME_SIZE);
            assert_eq!(&frame[0..2], b"* ");
        }
    }
});
