// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic fan-out with bounded per-subscriber queues.
//!
//! `publish` never blocks and never waits on a subscriber: a full
//! queue drops the event for that subscriber only, counted on the
//! subscription. Sessions hand the hub nothing but a queue endpoint,
//! so the hub cannot reach back into a session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use vigil_wire::types::{AlertEvent, ContainerEvent, ContainerSample, HostSample, Topic};

use crate::store::LogRecord;

/// Queue depth for metrics, alerts, and containers subscriptions.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Logs are burstier; their queues run deeper.
pub const LOGS_QUEUE_DEPTH: usize = 1024;

/// One published event. Shared via `Arc` so fan-out to N subscribers
/// clones a pointer, not the payload.
#[derive(Debug, Clone)]
pub enum Event {
    Metrics { host: HostSample, containers: Vec<ContainerSample> },
    Alert(AlertEvent),
    Container(ContainerEvent),
    Log(LogRecord),
}

/// Filter evaluated in the hub before enqueue. Only the logs topic
/// filters here; other topics deliver everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilterSpec {
    pub container_id: Option<String>,
    pub project: Option<String>,
    pub stream: Option<String>,
    pub search: Option<String>,
}

impl LogFilterSpec {
    fn matches(&self, record: &LogRecord) -> bool {
        if let Some(ref id) = self.container_id {
            if record.entry.container_id != *id {
                return false;
            }
        }
        if let Some(ref project) = self.project {
            if record.project != *project {
                return false;
            }
        }
        if let Some(ref stream) = self.stream {
            if record.entry.stream != *stream {
                return false;
            }
        }
        if let Some(ref search) = self.search {
            if !record.entry.message.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub enum SubscriptionFilter {
    #[default]
    None,
    Logs(LogFilterSpec),
}

impl SubscriptionFilter {
    fn admits(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::Logs(spec), Event::Log(record)) => spec.matches(record),
            _ => true,
        }
    }
}

/// A client's interest in one topic. Owned by the session; dropping
/// the receiver ends delivery and the hub prunes the entry lazily.
pub struct Subscription {
    pub id: u64,
    pub topic: Topic,
    pub rx: mpsc::Receiver<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Events dropped because this subscriber's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SubEntry {
    id: u64,
    owner: u64,
    tx: mpsc::Sender<Arc<Event>>,
    filter: SubscriptionFilter,
    dropped: Arc<AtomicU64>,
}

/// Process-wide topic router. One per agent, owned by the runtime.
pub struct Hub {
    topics: Mutex<HashMap<Topic, Vec<SubEntry>>>,
    next_id: AtomicU64,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a subscription with the topic's default queue depth.
    pub fn subscribe(&self, topic: Topic, owner: u64, filter: SubscriptionFilter) -> Subscription {
        let depth = match topic {
            Topic::Logs => LOGS_QUEUE_DEPTH,
            _ => DEFAULT_QUEUE_DEPTH,
        };
        self.subscribe_with_depth(topic, owner, filter, depth)
    }

    pub fn subscribe_with_depth(
        &self,
        topic: Topic,
        owner: u64,
        filter: SubscriptionFilter,
        depth: usize,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(depth);
        let dropped = Arc::new(AtomicU64::new(0));

        self.topics.lock().entry(topic).or_default().push(SubEntry {
            id,
            owner,
            tx,
            filter,
            dropped: Arc::clone(&dropped),
        });

        debug!(topic = %topic, sub = id, owner, "subscription added");
        Subscription { id, topic, rx, dropped }
    }

    /// Remove one subscription. Unknown ids are ignored, so double
    /// unsubscribe is harmless.
    pub fn unsubscribe(&self, topic: Topic, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(&topic) {
            subs.retain(|entry| entry.id != id);
        }
    }

    /// Remove every subscription owned by a session.
    pub fn remove_owner(&self, owner: u64) {
        let mut topics = self.topics.lock();
        for subs in topics.values_mut() {
            subs.retain(|entry| {
                if entry.owner == owner {
                    let dropped = entry.dropped.load(Ordering::Relaxed);
                    if dropped > 0 {
                        debug!(sub = entry.id, dropped, "removing subscription with drops");
                    }
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Deliver an event to every live subscriber of the topic.
    /// Non-blocking regardless of subscriber state.
    pub fn publish(&self, topic: Topic, event: Event) {
        let event = Arc::new(event);
        let mut topics = self.topics.lock();
        let Some(subs) = topics.get_mut(&topic) else {
            return;
        };

        subs.retain(|entry| {
            if !entry.filter.admits(&event) {
                return true;
            }
            match entry.tx.try_send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Live subscription count, across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.topics.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
