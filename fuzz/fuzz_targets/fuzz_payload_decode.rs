//! Fuzz target for replay payload decoding.
//!
//! Whatever decodes must re-encode to the log form the fuzzer writes.

#![no_main]

use brokerfuzz::transport::{decode_payload, encode_payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = brokerfuzz::replay::decode_all(&[s]);
    }

    let encoded = encode_payload(data);
    let decoded = decode_payload(&encoded).expect("own encoding decodes");
    assert_eq!(decoded, data);
});
