// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host metrics from procfs, with sysfs classifying interfaces.
//!
//! All paths hang off configurable proc and sys roots so tests (and
//! the occasional chrooted deployment) can point the collector at a
//! fake tree. Parsing is forgiving: a missing or malformed file zeroes
//! the affected fields instead of failing the tick.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use vigil_wire::types::{HostSample, NetSample};

use super::disk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Stateful host collector; keeps the previous tick's CPU counters so
/// `cpu_percent` is a real delta, not a since-boot average.
pub struct HostCollector {
    proc_root: PathBuf,
    sys_root: PathBuf,
    prev_cpu: Option<CpuTimes>,
}

impl HostCollector {
    pub fn new(proc_root: &Path, sys_root: &Path) -> Self {
        Self { proc_root: proc_root.to_owned(), sys_root: sys_root.to_owned(), prev_cpu: None }
    }

    /// Take one host sample. The first tick reports `cpu_percent = 0`
    /// because there is no previous counter to delta against.
    pub fn sample(&mut self, now: i64) -> anyhow::Result<HostSample> {
        let stat = self.read("stat")?;
        let (cpu, cpu_count) = parse_stat(&stat);

        let cpu_percent = match (self.prev_cpu, cpu) {
            (Some(prev), Some(cur)) => cpu_percent(prev, cur),
            _ => 0.0,
        };
        if let Some(cur) = cpu {
            self.prev_cpu = Some(cur);
        }

        let mem = parse_meminfo(&self.read("meminfo").unwrap_or_default());
        let (load1, load5, load15) = parse_loadavg(&self.read("loadavg").unwrap_or_default());
        let uptime = parse_uptime(&self.read("uptime").unwrap_or_default());
        let nets = parse_net_dev(&self.read("net/dev").unwrap_or_default())
            .into_iter()
            .filter(|net| self.is_physical(&net.interface))
            .collect();
        let disks = disk::disk_samples(&self.proc_root);

        Ok(HostSample {
            timestamp: now,
            cpu_percent,
            cpu_count,
            mem_total: mem.total,
            mem_used: mem.used,
            mem_cached: mem.cached,
            mem_free: mem.free,
            swap_total: mem.swap_total,
            swap_used: mem.swap_used,
            load1,
            load5,
            load15,
            uptime,
            disks,
            nets,
        })
    }

    fn read(&self, rel: &str) -> anyhow::Result<String> {
        let path = self.proc_root.join(rel);
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
    }

    /// Whether an interface is backed by a real device, per sysfs.
    /// Virtual interfaces (veth pairs, bridges) re-count traffic that
    /// already shows on the physical NIC, so they are dropped. Without
    /// a readable `class/net` tree every interface is kept.
    fn is_physical(&self, interface: &str) -> bool {
        let class = self.sys_root.join("class/net");
        if !class.is_dir() {
            return true;
        }
        class.join(interface).join("device").exists()
    }
}

fn cpu_percent(prev: CpuTimes, cur: CpuTimes) -> f64 {
    let total = cur.total.saturating_sub(prev.total);
    let idle = cur.idle.saturating_sub(prev.idle);
    if total == 0 {
        return 0.0;
    }
    (1.0 - idle as f64 / total as f64) * 100.0
}

/// Parse `/proc/stat`: the aggregate cpu line and the per-cpu count.
fn parse_stat(contents: &str) -> (Option<CpuTimes>, u32) {
    let mut cpu = None;
    let mut count = 0u32;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu") {
            if rest.starts_with(' ') {
                // Aggregate line: user nice system idle iowait irq softirq steal
                let fields: Vec<u64> =
                    rest.split_whitespace().filter_map(|f| f.parse().ok()).collect();
                if fields.len() >= 4 {
                    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
                    let total: u64 = fields.iter().take(8).sum();
                    cpu = Some(CpuTimes { idle, total });
                }
            } else if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                count += 1;
            }
        }
    }

    (cpu, count.max(1))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct MemInfo {
    total: u64,
    used: u64,
    cached: u64,
    free: u64,
    swap_total: u64,
    swap_used: u64,
}

/// Parse `/proc/meminfo` (values are kB on every kernel we care about).
fn parse_meminfo(contents: &str) -> MemInfo {
    let mut total = 0u64;
    let mut free = 0u64;
    let mut available = None;
    let mut cached = 0u64;
    let mut buffers = 0u64;
    let mut swap_total = 0u64;
    let mut swap_free = 0u64;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value =
            rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) * 1024;
        match key {
            "MemTotal" => total = value,
            "MemFree" => free = value,
            "MemAvailable" => available = Some(value),
            "Cached" => cached = value,
            "Buffers" => buffers = value,
            "SwapTotal" => swap_total = value,
            "SwapFree" => swap_free = value,
            _ => {}
        }
    }

    // Prefer MemAvailable (kernel ≥ 3.14); older trees approximate.
    let used = match available {
        Some(avail) => total.saturating_sub(avail),
        None => total.saturating_sub(free + cached + buffers),
    };

    MemInfo {
        total,
        used,
        cached,
        free,
        swap_total,
        swap_used: swap_total.saturating_sub(swap_free),
    }
}

fn parse_loadavg(contents: &str) -> (f64, f64, f64) {
    let mut fields = contents.split_whitespace();
    let mut next = || fields.next().and_then(|f| f.parse().ok()).unwrap_or(0.0);
    (next(), next(), next())
}

fn parse_uptime(contents: &str) -> u64 {
    contents
        .split_whitespace()
        .next()
        .and_then(|f| f.parse::<f64>().ok())
        .map(|secs| secs as u64)
        .unwrap_or(0)
}

/// Parse `/proc/net/dev`. The loopback interface is skipped; its
/// counters only ever measure the host talking to itself.
fn parse_net_dev(contents: &str) -> Vec<NetSample> {
    let mut nets = Vec::new();

    for line in contents.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name == "lo" {
            continue;
        }
        let fields: Vec<u64> =
            counters.split_whitespace().filter_map(|f| f.parse().ok()).collect();
        if fields.len() < 11 {
            debug!(interface = name, "short net/dev line, skipping");
            continue;
        }
        nets.push(NetSample {
            interface: name.to_owned(),
            rx_bytes: fields[0],
            rx_packets: fields[1],
            rx_errors: fields[2],
            tx_bytes: fields[8],
            tx_packets: fields[9],
            tx_errors: fields[10],
        });
    }

    nets
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
