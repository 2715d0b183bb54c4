// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error codes carried in `error` envelopes.
///
/// The string forms are part of the wire contract; installed clients
/// match on them, so variants are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProtocolError,
    Unauthorized,
    NotFound,
    InvalidArgument,
    StorageIo,
    StorageFull,
    RuntimeUnavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::StorageIo => "STORAGE_IO",
            Self::StorageFull => "STORAGE_FULL",
            Self::RuntimeUnavailable => "RUNTIME_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures at the framing and envelope layer.
#[derive(Debug)]
pub enum WireError {
    /// Frame empty or longer than [`crate::MAX_FRAME`].
    Oversize(usize),
    /// Payload was not a valid envelope or body.
    Decode(serde_json::Error),
    /// Underlying transport failure, including truncated reads.
    Io(std::io::Error),
}

impl WireError {
    /// The wire error code a peer should see for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Oversize(_) | Self::Decode(_) => ErrorCode::ProtocolError,
            Self::Io(_) => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversize(len) => write!(f, "frame of {len} bytes exceeds limit"),
            Self::Decode(e) => write!(f, "invalid envelope: {e}"),
            Self::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Oversize(_) => None,
            Self::Decode(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e)
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
