#![no_main]

use libfuzzer_sys::fuzz_target;
use loopserve_parser::h1::request::H1Request;

fuzz_target!(|data: &[u8]| {
    let _ = H1Request::parse(data);
});
