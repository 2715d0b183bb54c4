// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model: samples, log entries, alerts, container events.
//!
//! Field names here are the wire contract; the agent persists the same
//! shapes, so renames would break both installed clients and stored
//! history.

use serde::{Deserialize, Serialize};

/// One host-level measurement, taken once per collect tick.
///
/// Per-mountpoint and per-interface readings ride along so a single
/// timestamp covers the whole host view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSample {
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub cpu_count: u32,
    pub mem_total: u64,
    pub mem_used: u64,
    pub mem_cached: u64,
    pub mem_free: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub uptime: u64,
    #[serde(default)]
    pub disks: Vec<DiskSample>,
    #[serde(default)]
    pub nets: Vec<NetSample>,
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    pub mountpoint: String,
    pub device: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

/// Counters for one network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetSample {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
}

/// One container's measurement for a collect tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub timestamp: i64,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health: String,
    pub cpu_percent: f64,
    pub cpu_limit: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
    pub disk_usage: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

/// One container log line, or a synthesized lifecycle marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub container_id: String,
    pub container_name: String,
    /// `stdout`, `stderr`, or `event` for synthesized entries.
    pub stream: String,
    pub message: String,
}

/// A container lifecycle change reported by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub timestamp: i64,
    pub id: String,
    pub name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
}

/// One firing of a rule against a specific instance key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: i64,
    pub rule_name: String,
    pub severity: String,
    pub condition: String,
    pub instance_key: String,
    pub fired_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    pub message: String,
    pub acknowledged: bool,
}

/// Streamed alert state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// `firing` or `resolved`.
    pub state: String,
    pub alert: AlertInstance,
}

/// Rule description returned by `query:alert_rules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleInfo {
    pub name: String,
    pub condition: String,
    pub severity: String,
    pub for_secs: u64,
    pub cooldown_secs: u64,
    pub notify_cooldown_secs: u64,
    #[serde(default)]
    pub actions: Vec<String>,
    pub firing_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silenced_until: Option<i64>,
}

/// Subscription topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Metrics,
    Alerts,
    Containers,
    Logs,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Alerts => "alerts",
            Self::Containers => "containers",
            Self::Logs => "logs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metrics" => Some(Self::Metrics),
            "alerts" => Some(Self::Alerts),
            "containers" => Some(Self::Containers),
            "logs" => Some(Self::Logs),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
