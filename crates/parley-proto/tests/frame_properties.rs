//! Property-based tests for STOMP frame encoding/decoding
//!
//! Frames are generated with arbitrary headers (including reserved octets that
//! need escaping) and arbitrary binary bodies, then pushed through the codec.

use parley_proto::{Command, Frame, ProtocolError};
use proptest::prelude::*;

/// Commands whose headers are escaped on the wire
fn escaped_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Send),
        Just(Command::Subscribe),
        Just(Command::Unsubscribe),
        Just(Command::Disconnect),
        Just(Command::Message),
        Just(Command::Receipt),
        Just(Command::Error),
    ]
}

/// Header pairs. Names avoid `content-length`, which the strategy sets itself.
fn arbitrary_headers() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z][a-z0-9_]{0,10}", "[ -~\n\r]{0,24}"), 0..6)
}

/// Frames with a `content-length` header so bodies may hold NUL octets
fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (escaped_command(), arbitrary_headers(), prop::collection::vec(any::<u8>(), 0..512)).prop_map(
        |(command, headers, body)| {
            let mut frame = Frame::new(command);
            for (name, value) in headers {
                frame = frame.with_header(name, value);
            }
            frame.with_header("content-length", body.len().to_string()).with_body(body)
        },
    )
}

#[test]
fn prop_frame_encode_decode_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let bytes = frame.encode().expect("encode should succeed");
        let decoded = Frame::decode(&bytes).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity, header order included
        prop_assert_eq!(decoded, frame);
    });
}

#[test]
fn prop_stream_ignores_heartbeats() {
    proptest!(|(
        frames in prop::collection::vec(arbitrary_frame(), 1..5),
        beats in prop::collection::vec(0usize..4, 6),
    )| {
        let mut wire = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            wire.extend(std::iter::repeat_n(b'\n', beats[i]));
            wire.extend(frame.encode().expect("encode should succeed"));
        }
        wire.extend(std::iter::repeat_n(b'\n', beats[5]));

        let decoded = Frame::decode_stream(&wire).expect("decode should succeed");

        // PROPERTY: heart-beat EOLs never produce or corrupt frames
        prop_assert_eq!(decoded, frames);
    });
}

#[test]
fn prop_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        // PROPERTY: arbitrary input yields Ok or a typed error
        let _ = Frame::decode_stream(&bytes);
    });
}

#[test]
fn prop_truncated_frame_rejected() {
    proptest!(|(frame in arbitrary_frame(), cut in any::<prop::sample::Index>())| {
        let bytes = frame.encode().expect("encode should succeed");
        let cut = cut.index(bytes.len());

        // PROPERTY: any strict prefix of a frame fails to decode as that frame
        match Frame::decode(&bytes[..cut]) {
            Ok(decoded) => prop_assert_ne!(decoded, frame),
            Err(err) => prop_assert!(!matches!(err, ProtocolError::TrailingData)),
        }
    });
}
