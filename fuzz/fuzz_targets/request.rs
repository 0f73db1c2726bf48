//! Fuzz target for protocol request parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

use onceupon::server::protocol::Request;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = Request::parse(line);
    }
});
