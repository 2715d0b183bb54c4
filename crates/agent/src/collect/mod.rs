// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The collect loop: host + container sampling on a fixed cadence.
//!
//! Per tick, samples are written to the store first, then published to
//! the hub, then handed to the alert engine; a client that queries
//! right after seeing a streamed sample always finds it in the store.

pub mod disk;
pub mod docker;
pub mod events;
pub mod host;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_wire::types::{ContainerSample, Topic};

use crate::alert::engine::Batch;
use crate::hub::{Event, Hub};
use crate::store::{now_unix, Store};
use crate::tail::TailTarget;

use self::docker::{DockerCollector, NameFilter};
use self::host::HostCollector;

/// Consecutive runtime failures before `query:containers` starts
/// reporting the runtime as unavailable.
const RUNTIME_FAILURE_THRESHOLD: u32 = 3;

/// Reloadable knobs the collect loop reads each tick.
#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub interval: Duration,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Live view shared with the IPC dispatch layer: the latest container
/// samples and the sticky runtime failure annotation.
#[derive(Default)]
pub struct LiveState {
    containers: RwLock<Vec<ContainerSample>>,
    runtime_error: Mutex<Option<String>>,
    failures: AtomicU32,
}

impl LiveState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latest tick's samples, in the runtime's listing order.
    pub fn containers(&self) -> Vec<ContainerSample> {
        self.containers.read().clone()
    }

    /// The sticky error, when the runtime has been failing.
    pub fn runtime_error(&self) -> Option<String> {
        self.runtime_error.lock().clone()
    }

    pub(crate) fn note_success(&self, containers: Vec<ContainerSample>) {
        *self.containers.write() = containers;
        self.failures.store(0, Ordering::Relaxed);
        *self.runtime_error.lock() = None;
    }

    pub(crate) fn note_failure(&self, error: String) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= RUNTIME_FAILURE_THRESHOLD {
            *self.runtime_error.lock() = Some(error);
        }
    }
}

/// Run the collect loop until shutdown. An in-flight tick finishes
/// before the loop returns.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut host: HostCollector,
    mut docker: DockerCollector,
    store: Arc<Store>,
    hub: Arc<Hub>,
    live: Arc<LiveState>,
    engine_tx: mpsc::Sender<Batch>,
    tail_tx: watch::Sender<Vec<TailTarget>>,
    mut settings_rx: watch::Receiver<CollectSettings>,
    shutdown: CancellationToken,
) {
    info!(interval = ?settings_rx.borrow().interval, "collect loop started");

    loop {
        let interval = settings_rx.borrow().interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                debug!("collect loop shutting down");
                return;
            }
        }

        if settings_rx.has_changed().unwrap_or(false) {
            let settings = settings_rx.borrow_and_update().clone();
            match NameFilter::new(&settings.include, &settings.exclude) {
                Ok(filter) => docker.set_filter(filter),
                Err(e) => warn!(error = %e, "bad container filters in reload, keeping previous"),
            }
        }

        tick(&mut host, &mut docker, &store, &hub, &live, &engine_tx, &tail_tx, &shutdown).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn tick(
    host: &mut HostCollector,
    docker: &mut DockerCollector,
    store: &Store,
    hub: &Hub,
    live: &LiveState,
    engine_tx: &mpsc::Sender<Batch>,
    tail_tx: &watch::Sender<Vec<TailTarget>>,
    shutdown: &CancellationToken,
) {
    let now = now_unix();
    let tracking = store.tracking();

    let host_sample = match host.sample(now) {
        Ok(sample) => sample,
        Err(e) => {
            warn!(error = %e, "host sampling failed, skipping tick");
            return;
        }
    };

    let (containers, runtime_ok) = match docker.sample(now, &tracking).await {
        Ok(containers) => {
            live.note_success(containers.clone());
            (containers, true)
        }
        Err(e) => {
            warn!(error = %e, "container sampling failed");
            live.note_failure(e.to_string());
            (Vec::new(), false)
        }
    };

    // Store first: host, then containers, then everything else.
    store.put_host_sample(host_sample.clone());
    store.put_container_samples(containers.clone());

    let targets: Vec<TailTarget> = containers
        .iter()
        .filter(|c| c.state == "running")
        .map(|c| TailTarget {
            id: c.id.clone(),
            name: c.name.clone(),
            project: c.project.clone(),
            service: c.service.clone(),
        })
        .collect();
    let _ = tail_tx.send(targets);

    hub.publish(
        Topic::Metrics,
        Event::Metrics { host: host_sample.clone(), containers: containers.clone() },
    );

    // Blocking send: the engine must see every tick, in order. Only a
    // shutdown may abandon the hand-off.
    tokio::select! {
        result = engine_tx.send(Batch { host: host_sample, containers, runtime_ok }) => {
            if result.is_err() {
                debug!("alert engine channel closed");
            }
        }
        _ = shutdown.cancelled() => {}
    }
}
