// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One accepted connection: a reader, a writer, and one pump per
//! subscription.
//!
//! The socket is single-writer: everything outbound (replies, pushes)
//! funnels through the session send queue and is written serially.
//! Pumps move events from subscription queues onto the send queue with
//! `try_send`, so a stalled client sheds pushes instead of wedging the
//! reader.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vigil_wire::message::{self, MetricsUpdate};
use vigil_wire::types::Topic;
use vigil_wire::{codec, decode, encode, Envelope, WireError};

use crate::hub::{Event, Subscription, SubscriptionFilter};

use super::dispatch::{self, Outcome};
use super::AgentState;

/// Depth of the per-session send queue.
const SEND_QUEUE_DEPTH: usize = 256;

struct ActiveSubscription {
    id: u64,
    pump: CancellationToken,
}

/// Drive one session to completion. Returns when the peer hangs up,
/// the connection faults, or the agent shuts down.
pub async fn run(
    stream: UnixStream,
    state: Arc<AgentState>,
    session_id: u64,
    shutdown: CancellationToken,
) {
    debug!(session = session_id, "session opened");
    let cancel = shutdown.child_token();

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, codec());
    let writer = FramedWrite::new(write_half, codec());

    let (send_tx, send_rx) = mpsc::channel::<Envelope>(SEND_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_loop(writer, send_rx, cancel.clone()));

    let mut subscriptions: HashMap<Topic, ActiveSubscription> = HashMap::new();

    loop {
        let frame = tokio::select! {
            frame = reader.next() => frame,
            _ = cancel.cancelled() => break,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                // Length violations and transport faults are fatal.
                warn!(session = session_id, error = %e, "framing error, closing session");
                if let Ok(env) =
                    Envelope::error(0, vigil_wire::ErrorCode::ProtocolError, &e.to_string())
                {
                    let _ = send_tx.send(env).await;
                }
                break;
            }
            None => break,
        };

        let envelope = match decode(&frame) {
            Ok(envelope) => envelope,
            Err(e @ WireError::Oversize(_)) => {
                warn!(session = session_id, error = %e, "oversize frame, closing session");
                break;
            }
            Err(e) => {
                // A well-framed but undecodable payload: report and
                // keep the connection.
                trace!(session = session_id, error = %e, "undecodable envelope");
                if let Ok(env) = Envelope::error(0, e.code(), &e.to_string()) {
                    if send_tx.send(env).await.is_err() {
                        break;
                    }
                }
                continue;
            }
        };

        let outcome = match dispatch::dispatch(&state, &envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = session_id, error = %e, "reply encoding failed");
                continue;
            }
        };

        match outcome {
            Outcome::Reply(reply) => {
                if send_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Outcome::Subscribe { topic, filter, reply } => {
                replace_subscription(
                    &mut subscriptions,
                    &state,
                    topic,
                    filter,
                    session_id,
                    &send_tx,
                    &cancel,
                );
                if send_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Outcome::Unsubscribe { topic, reply } => {
                if let Some(active) = subscriptions.remove(&topic) {
                    active.pump.cancel();
                    state.hub.unsubscribe(topic, active.id);
                }
                if send_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }
    }

    // Teardown: removing hub registrations closes each subscription
    // queue, which ends its pump; dropping the last sender lets the
    // writer drain whatever is queued (a final error envelope
    // included) before exiting.
    state.hub.remove_owner(session_id);
    for active in subscriptions.values() {
        active.pump.cancel();
    }
    drop(send_tx);
    let _ = writer_task.await;
    debug!(session = session_id, "session closed");
}

fn replace_subscription(
    subscriptions: &mut HashMap<Topic, ActiveSubscription>,
    state: &AgentState,
    topic: Topic,
    filter: SubscriptionFilter,
    session_id: u64,
    send_tx: &mpsc::Sender<Envelope>,
    cancel: &CancellationToken,
) {
    // Re-subscribing replaces the old filter.
    if let Some(previous) = subscriptions.remove(&topic) {
        previous.pump.cancel();
        state.hub.unsubscribe(topic, previous.id);
    }

    let subscription = state.hub.subscribe(topic, session_id, filter);
    let pump = cancel.child_token();
    subscriptions.insert(topic, ActiveSubscription { id: subscription.id, pump: pump.clone() });
    tokio::spawn(pump_loop(subscription, send_tx.clone(), pump));
}

/// Move events from one subscription queue to the session send queue.
/// A full send queue drops the push; the subscription stays live.
async fn pump_loop(
    mut subscription: Subscription,
    send_tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) {
    let mut dropped: u64 = 0;

    loop {
        let event = tokio::select! {
            event = subscription.rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let envelope = match push_envelope(&event) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "push encoding failed, dropping event");
                continue;
            }
        };

        match send_tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }

    if dropped > 0 || subscription.dropped() > 0 {
        debug!(
            topic = %subscription.topic,
            send_queue_dropped = dropped,
            hub_dropped = subscription.dropped(),
            "subscription pump finished with drops"
        );
    }
}

/// Wire form of a hub event, as an id-0 push.
fn push_envelope(event: &Event) -> Result<Envelope, WireError> {
    match event {
        Event::Metrics { host, containers } => Envelope::new(
            message::METRICS_UPDATE,
            0,
            &MetricsUpdate { host: host.clone(), containers: containers.clone() },
        ),
        Event::Alert(alert) => Envelope::new(message::ALERT_EVENT, 0, alert),
        Event::Container(event) => Envelope::new(
            message::CONTAINERS_UPDATE,
            0,
            &message::ContainersUpdate { event: event.clone() },
        ),
        Event::Log(record) => Envelope::new(message::LOGS_ENTRY, 0, &record.entry),
    }
}

async fn write_loop(
    mut writer: FramedWrite<tokio::net::unix::OwnedWriteHalf, tokio_util::codec::LengthDelimitedCodec>,
    mut send_rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            envelope = send_rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let bytes = match encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(kind = envelope.kind.as_str(), error = %e, "dropping unencodable envelope");
                continue;
            }
        };

        if let Err(e) = writer.send(bytes).await {
            trace!(error = %e, "write failed, closing writer");
            cancel.cancel();
            break;
        }
    }
    let _ = writer.flush().await;
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
