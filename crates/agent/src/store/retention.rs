// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Age-based eviction on a fixed timer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{now_unix, Store};

/// How often the sweep runs. Retention is measured in days, so an
/// hourly cadence keeps the overshoot negligible.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the retention sweep until shutdown. `retention_days` is read
/// from the store each cycle so config reloads take effect without a
/// restart; 0 disables eviction.
pub async fn run(store: Arc<Store>, shutdown: CancellationToken) {
    info!(retention_days = store.retention_days(), "retention sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            _ = shutdown.cancelled() => {
                debug!("retention sweeper shutting down");
                return;
            }
        }

        let days = store.retention_days();
        if days == 0 {
            continue;
        }
        let cutoff = now_unix() - i64::from(days) * 86_400;
        store.sweep(cutoff);
    }
}
