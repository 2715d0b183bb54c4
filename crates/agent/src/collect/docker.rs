// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container metrics over the runtime's UNIX socket.
//!
//! One `sample` call lists containers, applies the name filters and
//! tracking policy, then fetches stats + inspect per survivor. CPU
//! percent follows the runtime's own convention:
//! `(cpu_delta / system_cpu_delta) * online_cpus * 100`, computed
//! against the previous tick's counters.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context;
use bollard::container::{InspectContainerOptions, ListContainersOptions, StatsOptions};
use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use futures_util::StreamExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use vigil_wire::types::ContainerSample;

use crate::store::TrackingSet;

/// Compose labels carrying project/service identity.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Include/exclude globs over container names.
pub struct NameFilter {
    include: GlobSet,
    include_all: bool,
    exclude: GlobSet,
}

impl NameFilter {
    pub fn new(include: &[String], exclude: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            include_all: include.is_empty(),
            exclude: build_globset(exclude)?,
        })
    }

    pub fn admits(&self, name: &str) -> bool {
        (self.include_all || self.include.is_match(name)) && !self.exclude.is_match(name)
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("glob '{pattern}'"))?);
    }
    Ok(builder.build()?)
}

#[derive(Debug, Clone, Copy)]
struct CpuCounters {
    total: u64,
    system: u64,
}

/// Stateful container collector.
pub struct DockerCollector {
    docker: Docker,
    filter: NameFilter,
    prev_cpu: HashMap<String, CpuCounters>,
}

impl DockerCollector {
    /// Connection is lazy; a missing runtime socket surfaces on the
    /// first sample, not here.
    pub fn connect(socket: &Path, filter: NameFilter) -> anyhow::Result<Self> {
        let path = socket
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("runtime socket path is not valid UTF-8"))?;
        let docker =
            Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker, filter, prev_cpu: HashMap::new() })
    }

    pub fn client(&self) -> Docker {
        self.docker.clone()
    }

    /// Swap the name filters (config reload).
    pub fn set_filter(&mut self, filter: NameFilter) {
        self.filter = filter;
    }

    /// One tick's container samples.
    pub async fn sample(
        &mut self,
        now: i64,
        tracking: &TrackingSet,
    ) -> anyhow::Result<Vec<ContainerSample>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                size: true,
                ..Default::default()
            }))
            .await?;

        let mut samples = Vec::new();
        let mut live_ids = HashSet::new();

        for summary in summaries {
            let Some(id) = summary.id else {
                continue;
            };
            let name = primary_name(summary.names.as_deref());
            if !self.filter.admits(&name) {
                continue;
            }
            let labels = summary.labels.unwrap_or_default();
            let (project, service) = compose_identity(&labels);
            if !tracking.tracks(&id, &project) {
                continue;
            }

            let state = summary.state.unwrap_or_default();
            live_ids.insert(id.clone());

            let mut sample = ContainerSample {
                timestamp: now,
                id: id.clone(),
                name,
                image: summary.image.unwrap_or_default(),
                project,
                service,
                state: state.clone(),
                health: String::new(),
                cpu_percent: 0.0,
                cpu_limit: 0.0,
                mem_usage: 0,
                mem_limit: 0,
                mem_percent: 0.0,
                net_rx: 0,
                net_tx: 0,
                block_read: 0,
                block_write: 0,
                pids: 0,
                disk_usage: summary.size_rw.unwrap_or(0).max(0) as u64,
                started_at: None,
                restart_count: 0,
                exit_code: None,
            };

            if state == "running" {
                self.apply_stats(&id, &mut sample).await;
            } else {
                self.prev_cpu.remove(&id);
            }

            match self
                .docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
            {
                Ok(inspect) => apply_inspect(&inspect, &mut sample),
                Err(e) => debug!(container = id.as_str(), error = %e, "inspect failed"),
            }

            samples.push(sample);
        }

        // Forget counters for containers that disappeared.
        self.prev_cpu.retain(|id, _| live_ids.contains(id));

        Ok(samples)
    }

    async fn apply_stats(&mut self, id: &str, sample: &mut ContainerSample) {
        let options = Some(StatsOptions { stream: false, one_shot: true });
        let stats = match self.docker.stats(id, options).next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => {
                debug!(container = id, error = %e, "stats fetch failed");
                return;
            }
            None => return,
        };

        let total = stats.cpu_stats.cpu_usage.total_usage;
        let system = stats.cpu_stats.system_cpu_usage.unwrap_or(0);
        let online = stats.cpu_stats.online_cpus.unwrap_or(0).max(1);
        sample.cpu_percent = cpu_percent(
            self.prev_cpu.get(id).map(|c| (c.total, c.system)),
            total,
            system,
            online,
        );
        self.prev_cpu.insert(id.to_owned(), CpuCounters { total, system });

        sample.mem_usage = stats.memory_stats.usage.unwrap_or(0);
        sample.mem_limit = stats.memory_stats.limit.unwrap_or(0);
        sample.mem_percent = percent_of(sample.mem_usage, sample.mem_limit);

        if let Some(networks) = stats.networks {
            for net in networks.values() {
                sample.net_rx += net.rx_bytes;
                sample.net_tx += net.tx_bytes;
            }
        }

        if let Some(entries) = stats.blkio_stats.io_service_bytes_recursive {
            for entry in entries {
                match entry.op.to_ascii_lowercase().as_str() {
                    "read" => sample.block_read += entry.value,
                    "write" => sample.block_write += entry.value,
                    _ => {}
                }
            }
        }

        sample.pids = stats.pids_stats.current.unwrap_or(0);
    }
}

/// First name reported by the runtime, without the leading slash.
pub fn primary_name(names: Option<&[String]>) -> String {
    names
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_owned())
        .unwrap_or_default()
}

/// Compose project/service from the well-known labels.
pub fn compose_identity(labels: &HashMap<String, String>) -> (String, String) {
    (
        labels.get(COMPOSE_PROJECT_LABEL).cloned().unwrap_or_default(),
        labels.get(COMPOSE_SERVICE_LABEL).cloned().unwrap_or_default(),
    )
}

/// Runtime CPU convention; 0 on the first observation of a container.
pub fn cpu_percent(prev: Option<(u64, u64)>, total: u64, system: u64, online_cpus: u64) -> f64 {
    let Some((prev_total, prev_system)) = prev else {
        return 0.0;
    };
    let cpu_delta = total.saturating_sub(prev_total);
    let system_delta = system.saturating_sub(prev_system);
    if system_delta == 0 {
        return 0.0;
    }
    cpu_delta as f64 / system_delta as f64 * online_cpus as f64 * 100.0
}

fn percent_of(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

fn apply_inspect(inspect: &ContainerInspectResponse, sample: &mut ContainerSample) {
    sample.restart_count = inspect.restart_count.unwrap_or(0).max(0) as u32;

    if let Some(host_config) = &inspect.host_config {
        if let Some(nano_cpus) = host_config.nano_cpus {
            sample.cpu_limit = nano_cpus as f64 / 1_000_000_000.0;
        }
    }

    let Some(state) = &inspect.state else {
        return;
    };
    if let Some(health) = &state.health {
        if let Some(status) = &health.status {
            sample.health = status.to_string();
        }
    }
    if let Some(started) = &state.started_at {
        sample.started_at = parse_rfc3339(started);
    }
    if sample.state != "running" {
        sample.exit_code = state.exit_code;
    }
}

/// RFC3339 → unix seconds; the runtime's zero value ("0001-01-01…")
/// and anything else pre-epoch map to `None`.
pub fn parse_rfc3339(s: &str) -> Option<i64> {
    let time = humantime::parse_rfc3339(s).ok()?;
    let secs = time.duration_since(std::time::UNIX_EPOCH).ok()?.as_secs() as i64;
    (secs > 0).then_some(secs)
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
