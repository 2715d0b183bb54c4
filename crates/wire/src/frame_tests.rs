// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::error::ErrorCode;
use crate::message::ResultBody;

fn envelope(kind: &str, id: u32, body: &impl serde::Serialize) -> Envelope {
    Envelope::new(kind, id, body).unwrap()
}

#[test]
fn round_trip() {
    let env = envelope("result", 7, &ResultBody { ok: true });
    let bytes = encode(&env).unwrap();
    let back = decode(&bytes).unwrap();

    assert_eq!(back.kind, "result");
    assert_eq!(back.id, 7);
    assert_eq!(back.decode_body::<ResultBody>().unwrap().ok, true);
}

#[test]
fn oversize_encode_rejected() {
    let big = "x".repeat(MAX_FRAME);
    let env = envelope("logs:entry", 0, &serde_json::json!({ "message": big }));
    match encode(&env) {
        Err(WireError::Oversize(len)) => assert!(len > MAX_FRAME),
        other => panic!("expected oversize, got {other:?}"),
    }
}

#[test]
fn empty_frame_rejected() {
    match decode(&[]) {
        Err(WireError::Oversize(0)) => {}
        other => panic!("expected oversize(0), got {other:?}"),
    }
}

#[test]
fn garbage_frame_rejected() {
    let err = decode(b"hello").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn codec_round_trip_through_length_prefix() {
    let env = envelope("subscribe:metrics", 3, &serde_json::json!({}));
    let payload = encode(&env).unwrap();

    let mut codec = codec();
    let mut buf = BytesMut::new();
    codec.encode(payload.clone(), &mut buf).unwrap();

    // 4-byte big-endian prefix carries the payload length.
    assert_eq!(&buf[..4], &(payload.len() as u32).to_be_bytes()[..]);

    let frame = codec.decode(&mut buf).unwrap().unwrap();
    let back = decode(&frame).unwrap();
    assert_eq!(back.kind, "subscribe:metrics");
    assert_eq!(back.id, 3);
}

#[test]
fn codec_holds_partial_frame() {
    let env = envelope("result", 1, &ResultBody { ok: true });
    let payload = encode(&env).unwrap();

    let mut codec = codec();
    let mut buf = BytesMut::new();
    codec.encode(payload, &mut buf).unwrap();

    // Withhold the last byte: decode must wait, not error.
    let mut partial = buf.split_to(buf.len() - 1);
    assert!(codec.decode(&mut partial).unwrap().is_none());
}

#[test]
fn codec_rejects_oversize_length_prefix() {
    let mut buf = BytesMut::from(&(MAX_FRAME as u32 + 1).to_be_bytes()[..]);
    buf.extend_from_slice(&[0u8; 16]);
    assert!(codec().decode(&mut buf).is_err());
}

proptest! {
    #[test]
    fn any_envelope_survives_round_trip(kind in "[a-z:_]{1,24}", id in any::<u32>(), msg in ".{0,256}") {
        let env = envelope(&kind, id, &serde_json::json!({ "message": msg }));
        let back = decode(&encode(&env).unwrap()).unwrap();
        prop_assert_eq!(back.kind, kind);
        prop_assert_eq!(back.id, id);
        prop_assert_eq!(back.body.get(), env.body.get());
    }
}
