#![no_main]

use ekeyd_proto::pem64;
use libfuzzer_sys::fuzz_target;

// The wire codec is specified to stop decoding at the first invalid byte
// rather than error, so any string at all must decode without panicking.
fuzz_target!(|text: String| {
    let _ = pem64::decode(&text);
});
