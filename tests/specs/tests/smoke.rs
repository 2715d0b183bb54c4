// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: spawn the real `vigil` binary and drive it
//! over the UNIX socket with the protocol client.

use std::time::Duration;

use vigil::ipc::client::Client;
use vigil::store::now_unix;
use vigil_specs::AgentProcess;
use vigil_wire::message::{
    AlertRulesResp, ErrorBody, MetricsUpdate, QueryMetricsResp, QueryTrackingResp, ResultBody,
};
use vigil_wire::ErrorCode;

const READY: Duration = Duration::from_secs(10);

#[tokio::test]
async fn framing_error_reports_and_keeps_connection() {
    let agent = AgentProcess::start("").unwrap();
    agent.wait_ready(READY).await.unwrap();

    let mut client = Client::connect(agent.socket()).await.unwrap();
    client.send_raw(b"hello").await.unwrap();

    let envelope = client.next_envelope().await.unwrap();
    assert_eq!(envelope.kind, "error");
    let body: ErrorBody = envelope.decode_body().unwrap();
    assert_eq!(body.code, ErrorCode::ProtocolError);

    let reply = client.request("query:tracking", &serde_json::json!({})).await.unwrap();
    assert_eq!(reply.kind, "result");
}

#[tokio::test]
async fn subscribe_metrics_streams_fresh_host_samples() {
    let agent = AgentProcess::start("").unwrap();
    agent.wait_ready(READY).await.unwrap();

    let mut client = Client::connect(agent.socket()).await.unwrap();
    let reply = client.request("subscribe:metrics", &serde_json::json!({})).await.unwrap();
    assert!(reply.decode_body::<ResultBody>().unwrap().ok);

    // interval is 1s; the first update must arrive within interval + 1s.
    let push = tokio::time::timeout(Duration::from_secs(2), client.next_push())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(push.kind, "metrics:update");
    let body: MetricsUpdate = push.decode_body().unwrap();
    assert!(body.host.mem_total > 0);
    assert!((now_unix() - body.host.timestamp).abs() <= 2);
}

#[tokio::test]
async fn streamed_sample_is_immediately_queryable() {
    let agent = AgentProcess::start("").unwrap();
    agent.wait_ready(READY).await.unwrap();

    let mut client = Client::connect(agent.socket()).await.unwrap();
    client.request("subscribe:metrics", &serde_json::json!({})).await.unwrap();
    let push = tokio::time::timeout(Duration::from_secs(2), client.next_push())
        .await
        .unwrap()
        .unwrap();
    let update: MetricsUpdate = push.decode_body().unwrap();

    let reply = client
        .request(
            "query:metrics",
            &serde_json::json!({ "start": 0, "end": update.host.timestamp + 1 }),
        )
        .await
        .unwrap();
    let body: QueryMetricsResp = reply.decode_body().unwrap();
    assert_eq!(body.retention_days, 7);
    assert!(body.host.iter().any(|h| h.timestamp == update.host.timestamp));
}

#[tokio::test]
async fn tracking_set_round_trips() {
    let agent = AgentProcess::start("").unwrap();
    agent.wait_ready(READY).await.unwrap();

    let mut client = Client::connect(agent.socket()).await.unwrap();
    let reply = client
        .request(
            "action:set_tracking",
            &serde_json::json!({ "project": "shop", "tracked": true }),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, "result");

    let reply = client.request("query:tracking", &serde_json::json!({})).await.unwrap();
    let body: QueryTrackingResp = reply.decode_body().unwrap();
    assert_eq!(body.projects, vec!["shop"]);

    let reply = client
        .request(
            "action:set_tracking",
            &serde_json::json!({ "project": "shop", "container": "abc", "tracked": true }),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, "error");
    let body: ErrorBody = reply.decode_body().unwrap();
    assert_eq!(body.code, ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn alert_rules_silence_flow() {
    let agent = AgentProcess::start(
        r#"
[alerts.hot]
condition = "host.cpu_percent > 99"
severity = "warning"
"#,
    )
    .unwrap();
    agent.wait_ready(READY).await.unwrap();

    let mut client = Client::connect(agent.socket()).await.unwrap();

    let reply = client.request("query:alert_rules", &serde_json::json!({})).await.unwrap();
    let body: AlertRulesResp = reply.decode_body().unwrap();
    assert_eq!(body.rules.len(), 1);
    assert_eq!(body.rules[0].name, "hot");
    assert!(body.rules[0].silenced_until.is_none());

    let reply = client
        .request(
            "action:silence_alert",
            &serde_json::json!({ "rule_name": "hot", "duration_seconds": 300 }),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, "result");

    let reply = client.request("query:alert_rules", &serde_json::json!({})).await.unwrap();
    let body: AlertRulesResp = reply.decode_body().unwrap();
    assert!(body.rules[0].silenced_until.unwrap() > now_unix());

    let reply = client
        .request(
            "action:silence_alert",
            &serde_json::json!({ "rule_name": "absent", "duration_seconds": 300 }),
        )
        .await
        .unwrap();
    let body: ErrorBody = reply.decode_body().unwrap();
    assert_eq!(body.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn malformed_rule_fails_startup() {
    let agent = AgentProcess::start(
        r#"
[alerts.broken]
condition = "host.cpu_percent >"
severity = "warning"
"#,
    )
    .unwrap();

    // The process must exit non-zero instead of serving.
    assert!(agent.wait_ready(Duration::from_secs(3)).await.is_err());
}

#[tokio::test]
async fn sigterm_shuts_down_cleanly_and_unlinks_socket() {
    let agent = AgentProcess::start("").unwrap();
    agent.wait_ready(READY).await.unwrap();
    let socket = agent.socket().to_owned();

    let status = agent.terminate(Duration::from_secs(10)).await.unwrap();
    assert!(status.success());
    assert!(!socket.exists());
}
