#![no_main]

use ekeyd_proto::{RawFrame, packet};
use libfuzzer_sys::fuzz_target;

// Any well-sized frame, valid or not, must decode to either `Ok` or `Err`
// without panicking.
fuzz_target!(|frame: RawFrame| {
    let _ = packet::decode(&frame);
});
