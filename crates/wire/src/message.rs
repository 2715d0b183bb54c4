// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message type tags and the typed bodies behind them.
//!
//! Requests flow client→agent; `result`/`error` answer them with the
//! request's id; the `*:update` / `*:event` / `*:entry` kinds are
//! server pushes with id 0.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::types::{
    AlertEvent, AlertInstance, AlertRuleInfo, ContainerEvent, ContainerSample, HostSample,
    LogEntry, Topic,
};

// Client → agent.
pub const SUBSCRIBE_METRICS: &str = "subscribe:metrics";
pub const SUBSCRIBE_ALERTS: &str = "subscribe:alerts";
pub const SUBSCRIBE_CONTAINERS: &str = "subscribe:containers";
pub const SUBSCRIBE_LOGS: &str = "subscribe:logs";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const QUERY_METRICS: &str = "query:metrics";
pub const QUERY_LOGS: &str = "query:logs";
pub const QUERY_ALERTS: &str = "query:alerts";
pub const QUERY_CONTAINERS: &str = "query:containers";
pub const QUERY_TRACKING: &str = "query:tracking";
pub const QUERY_ALERT_RULES: &str = "query:alert_rules";
pub const ACTION_ACK_ALERT: &str = "action:ack_alert";
pub const ACTION_SILENCE_ALERT: &str = "action:silence_alert";
pub const ACTION_SET_TRACKING: &str = "action:set_tracking";

// Agent → client.
pub const RESULT: &str = "result";
pub const ERROR: &str = "error";
pub const METRICS_UPDATE: &str = "metrics:update";
pub const ALERT_EVENT: &str = "alert:event";
pub const CONTAINERS_UPDATE: &str = "containers:update";
pub const LOGS_ENTRY: &str = "logs:entry";

/// Generic success acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBody {
    pub ok: bool,
}

/// Body of every `error` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub error: String,
}

/// Empty request body; also what `subscribe:metrics` and friends carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub topic: Topic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetricsResp {
    pub host: Vec<HostSample>,
    pub containers: Vec<ContainerSample>,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryLogs {
    pub start: i64,
    pub end: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogsResp {
    /// Newest first, capped at the request limit.
    pub entries: Vec<LogEntry>,
    /// Matches before the cap was applied.
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAlerts {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAlertsResp {
    pub alerts: Vec<AlertInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContainersResp {
    pub containers: Vec<ContainerInfo>,
    /// Sticky runtime failure, surfaced with an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Live container row with its tracked flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(flatten)]
    pub sample: ContainerSample,
    pub tracked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryTrackingResp {
    pub containers: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRulesResp {
    pub rules: Vec<AlertRuleInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckAlert {
    pub alert_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceAlert {
    pub rule_name: String,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetTracking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub tracked: bool,
}

/// Body of a `metrics:update` push: the full fresh tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub host: HostSample,
    #[serde(default)]
    pub containers: Vec<ContainerSample>,
}

/// Body of a `containers:update` push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersUpdate {
    pub event: ContainerEvent,
}

/// Body of an `alert:event` push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPush {
    #[serde(flatten)]
    pub event: AlertEvent,
}

/// Body of a `logs:entry` push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPush {
    #[serde(flatten)]
    pub entry: LogEntry,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
