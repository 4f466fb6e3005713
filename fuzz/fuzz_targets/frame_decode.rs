//! Fuzz target for Frame::decode_stream
//!
//! This fuzzer feeds arbitrary WebSocket payloads to the STOMP decoder to find:
//! - Parser crashes or panics
//! - Overflows in content-length handling
//! - Header escapes that decode to something that no longer re-encodes
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.
//! Any frame that decodes must re-encode to the same command and body.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);

    let Ok(frames) = Frame::decode_stream(data) else {
        return;
    };
    for frame in frames {
        let Ok(encoded) = frame.encode() else {
            continue;
        };
        let decoded = Frame::decode(&encoded).expect("re-encoded frame must decode");
        assert_eq!(decoded.command, frame.command);
        assert_eq!(decoded.body, frame.body);
    }
});
