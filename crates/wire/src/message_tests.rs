// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::types::{ContainerSample, Topic};

fn sample(id: &str) -> ContainerSample {
    ContainerSample {
        timestamp: 100,
        id: id.to_owned(),
        name: "web".to_owned(),
        image: "nginx:latest".to_owned(),
        project: "shop".to_owned(),
        service: "web".to_owned(),
        state: "running".to_owned(),
        health: "healthy".to_owned(),
        cpu_percent: 1.5,
        cpu_limit: 2.0,
        mem_usage: 1024,
        mem_limit: 4096,
        mem_percent: 25.0,
        net_rx: 10,
        net_tx: 20,
        block_read: 30,
        block_write: 40,
        pids: 3,
        disk_usage: 500,
        started_at: Some(90),
        restart_count: 1,
        exit_code: None,
    }
}

#[test]
fn error_codes_use_screaming_snake_wire_form() {
    let json = serde_json::to_string(&ErrorCode::ProtocolError).unwrap();
    assert_eq!(json, "\"PROTOCOL_ERROR\"");
    let json = serde_json::to_string(&ErrorCode::StorageIo).unwrap();
    assert_eq!(json, "\"STORAGE_IO\"");
    let back: ErrorCode = serde_json::from_str("\"RUNTIME_UNAVAILABLE\"").unwrap();
    assert_eq!(back, ErrorCode::RuntimeUnavailable);
}

#[test]
fn topics_serialize_lowercase() {
    assert_eq!(serde_json::to_string(&Topic::Logs).unwrap(), "\"logs\"");
    let back: Topic = serde_json::from_str("\"containers\"").unwrap();
    assert_eq!(back, Topic::Containers);
    assert_eq!(Topic::parse("metrics"), Some(Topic::Metrics));
    assert_eq!(Topic::parse("bogus"), None);
}

#[test]
fn metrics_resp_piggybacks_retention() {
    let resp = QueryMetricsResp { host: vec![], containers: vec![], retention_days: 7 };
    let json = serde_json::to_string(&resp).unwrap();
    assert!(json.contains("\"retention_days\":7"));
}

#[test]
fn container_info_flattens_sample_fields() {
    let info = ContainerInfo { sample: sample("abc123"), tracked: true };
    let value = serde_json::to_value(&info).unwrap();
    assert_eq!(value["id"], "abc123");
    assert_eq!(value["tracked"], true);
    assert_eq!(value["mem_percent"], 25.0);
}

#[test]
fn set_tracking_omits_absent_selector() {
    let req = SetTracking { container: None, project: Some("shop".into()), tracked: true };
    let json = serde_json::to_string(&req).unwrap();
    assert!(!json.contains("container"));
    assert!(json.contains("\"project\":\"shop\""));
}

#[test]
fn query_logs_defaults_fill_missing_fields() {
    let req: QueryLogs = serde_json::from_str(r#"{"start":0,"end":50}"#).unwrap();
    assert_eq!(req.start, 0);
    assert_eq!(req.end, 50);
    assert!(req.container_id.is_none());
    assert!(req.limit.is_none());
}

#[test]
fn log_push_flattens_entry() {
    let push = LogPush {
        entry: LogEntry {
            timestamp: 5,
            container_id: "abc".into(),
            container_name: "web".into(),
            stream: "stdout".into(),
            message: "ready".into(),
        },
    };
    let value = serde_json::to_value(&push).unwrap();
    assert_eq!(value["stream"], "stdout");
    assert_eq!(value["message"], "ready");
}
