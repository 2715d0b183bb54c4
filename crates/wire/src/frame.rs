// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed framing: `u32` big-endian length, then the payload.

use bytes::Bytes;
use tokio_util::codec::LengthDelimitedCodec;

use crate::envelope::Envelope;
use crate::error::WireError;

/// Hard cap on a single frame payload.
pub const MAX_FRAME: usize = 4 * 1024 * 1024;

/// Build the framing codec both sides use.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .big_endian()
        .max_frame_length(MAX_FRAME)
        .new_codec()
}

/// Serialize an envelope into a frame payload.
///
/// Fails with [`WireError::Oversize`] when the encoded payload would
/// exceed [`MAX_FRAME`]; the frame is never partially written.
pub fn encode(envelope: &Envelope) -> Result<Bytes, WireError> {
    let payload = serde_json::to_vec(envelope)?;
    if payload.is_empty() || payload.len() > MAX_FRAME {
        return Err(WireError::Oversize(payload.len()));
    }
    Ok(Bytes::from(payload))
}

/// Parse a frame payload into an envelope. The body stays raw.
pub fn decode(frame: &[u8]) -> Result<Envelope, WireError> {
    if frame.is_empty() || frame.len() > MAX_FRAME {
        return Err(WireError::Oversize(frame.len()));
    }
    Ok(serde_json::from_slice(frame)?)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
