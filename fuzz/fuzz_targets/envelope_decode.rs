//! Fuzz target: envelope decoding
//!
//! Arbitrary bytes must never panic the decoder. Anything that decodes must
//! re-encode to exactly the input, so there is one wire form per envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        let encoded = envelope.encode().expect("decoded envelope re-encodes");
        assert_eq!(&encoded[..], data, "non-canonical envelope encoding");
    }
});
