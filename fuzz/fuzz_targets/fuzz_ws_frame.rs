#![no_main]

use libfuzzer_sys::fuzz_target;
use loopserve_parser::ws::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
