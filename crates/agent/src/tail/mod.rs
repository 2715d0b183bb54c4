// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container log tailing.
//!
//! The supervisor watches the collector's per-tick container list and
//! keeps exactly one streaming task per tracked running container. A
//! container that stops stays covered by its task's backoff loop until
//! the runtime stops listing it, so restarts reattach seamlessly;
//! removal tears the task down on the next tick.

pub mod container;

use std::collections::HashMap;
use std::sync::Arc;

use bollard::Docker;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::Hub;
use crate::store::Store;

/// One container the tailer should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailTarget {
    pub id: String,
    pub name: String,
    pub project: String,
    pub service: String,
}

struct TailTask {
    cancel: CancellationToken,
    name: String,
}

/// Run the tailer supervisor until shutdown.
pub async fn run(
    docker: Docker,
    store: Arc<Store>,
    hub: Arc<Hub>,
    mut targets_rx: watch::Receiver<Vec<TailTarget>>,
    shutdown: CancellationToken,
) {
    info!("log tailer supervisor started");
    let mut tasks: HashMap<String, TailTask> = HashMap::new();

    loop {
        tokio::select! {
            changed = targets_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }

        let targets = targets_rx.borrow_and_update().clone();

        for target in &targets {
            if tasks.contains_key(&target.id) {
                continue;
            }
            let cancel = shutdown.child_token();
            tasks.insert(
                target.id.clone(),
                TailTask { cancel: cancel.clone(), name: target.name.clone() },
            );
            tokio::spawn(container::run(
                docker.clone(),
                Arc::clone(&store),
                Arc::clone(&hub),
                target.clone(),
                cancel,
            ));
        }

        tasks.retain(|id, task| {
            if targets.iter().any(|t| t.id == *id) {
                true
            } else {
                debug!(container = task.name.as_str(), "container gone, stopping tailer");
                task.cancel.cancel();
                false
            }
        });
    }

    for task in tasks.values() {
        task.cancel.cancel();
    }
    debug!("log tailer supervisor stopped");
}
