// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level wire record: `type` tag, correlation `id`, raw body.
//!
//! Bodies are kept as raw JSON on the envelope and decoded only after
//! the receiver dispatches on `type`. Unknown types are rejected at
//! the dispatch layer, not here, so a newer peer's messages still
//! frame-decode cleanly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{ErrorCode, WireError};
use crate::message::{self, ErrorBody};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag, e.g. `subscribe:metrics` or `result`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id echoed on replies; 0 on server-initiated pushes.
    pub id: u32,
    /// Raw body, decoded per `kind` by [`Envelope::decode_body`].
    pub body: Box<RawValue>,
}

impl Envelope {
    /// Build an envelope from a typed body.
    pub fn new<T: Serialize>(kind: &str, id: u32, body: &T) -> Result<Self, WireError> {
        Ok(Self {
            kind: kind.to_owned(),
            id,
            body: serde_json::value::to_raw_value(body)?,
        })
    }

    /// Build an `error` envelope carrying `code` and a message.
    pub fn error(id: u32, code: ErrorCode, error: &str) -> Result<Self, WireError> {
        Self::new(message::ERROR, id, &ErrorBody { code, error: error.to_owned() })
    }

    /// Decode the body as the given type.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_str(self.body.get())?)
    }

    /// True when this envelope is a server push (no originating request).
    pub fn is_push(&self) -> bool {
        self.id == 0
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
