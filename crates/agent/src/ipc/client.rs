// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal protocol client.
//!
//! The terminal UI builds on this; the end-to-end tests drive the
//! agent with it. Request/response correlation is by envelope id;
//! pushes that arrive while waiting for a reply are buffered and
//! surfaced through [`Client::next_push`].

use std::collections::VecDeque;
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use vigil_wire::{codec, decode, encode, Envelope};

pub struct Client {
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    pending_pushes: VecDeque<Envelope>,
    next_id: u32,
}

impl Client {
    pub async fn connect(path: &Path) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connecting to {}", path.display()))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, codec()),
            writer: FramedWrite::new(write_half, codec()),
            pending_pushes: VecDeque::new(),
            next_id: 1,
        })
    }

    /// Send a request and wait for the envelope carrying its id.
    pub async fn request<T: Serialize>(
        &mut self,
        kind: &str,
        body: &T,
    ) -> anyhow::Result<Envelope> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let envelope = Envelope::new(kind, id, body)?;
        self.writer.send(encode(&envelope)?).await?;

        loop {
            let envelope = self.next_envelope().await?;
            if envelope.id == id {
                return Ok(envelope);
            }
            if envelope.is_push() {
                self.pending_pushes.push_back(envelope);
            }
            // Replies to other ids are stale (this client is serial); drop.
        }
    }

    /// Next server push, consuming the buffer first.
    pub async fn next_push(&mut self) -> anyhow::Result<Envelope> {
        if let Some(envelope) = self.pending_pushes.pop_front() {
            return Ok(envelope);
        }
        loop {
            let envelope = self.next_envelope().await?;
            if envelope.is_push() {
                return Ok(envelope);
            }
        }
    }

    /// Next envelope of any kind.
    pub async fn next_envelope(&mut self) -> anyhow::Result<Envelope> {
        let frame = self
            .reader
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        Ok(decode(&frame)?)
    }

    /// Write a raw frame payload, bypassing envelope encoding. Test
    /// hook for protocol-error scenarios.
    pub async fn send_raw(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.writer.send(Bytes::copy_from_slice(payload)).await?;
        Ok(())
    }
}
