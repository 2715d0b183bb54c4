// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol shared by the vigil agent and its clients.
//!
//! Every message on the socket is a `u32` big-endian length prefix
//! followed by a JSON [`Envelope`] payload. The envelope body stays
//! opaque until the receiver dispatches on the `type` tag and decodes
//! it with the matching body struct from [`message`].

pub mod envelope;
pub mod error;
pub mod frame;
pub mod message;
pub mod types;

pub use envelope::Envelope;
pub use error::{ErrorCode, WireError};
pub use frame::{codec, decode, encode, MAX_FRAME};
