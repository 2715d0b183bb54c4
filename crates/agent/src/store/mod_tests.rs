// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use vigil_wire::types::LogEntry;

pub(crate) fn host_sample(ts: i64, cpu: f64) -> HostSample {
    HostSample {
        timestamp: ts,
        cpu_percent: cpu,
        cpu_count: 4,
        mem_total: 8192,
        mem_used: 4096,
        mem_cached: 1024,
        mem_free: 3072,
        swap_total: 0,
        swap_used: 0,
        load1: 0.5,
        load5: 0.4,
        load15: 0.3,
        uptime: 1000,
        disks: vec![],
        nets: vec![],
    }
}

pub(crate) fn container_sample(ts: i64, id: &str, project: &str) -> ContainerSample {
    ContainerSample {
        timestamp: ts,
        id: id.to_owned(),
        name: format!("{id}-name"),
        image: "img:1".to_owned(),
        project: project.to_owned(),
        service: "web".to_owned(),
        state: "running".to_owned(),
        health: String::new(),
        cpu_percent: 1.0,
        cpu_limit: 0.0,
        mem_usage: 100,
        mem_limit: 1000,
        mem_percent: 10.0,
        net_rx: 0,
        net_tx: 0,
        block_read: 0,
        block_write: 0,
        pids: 1,
        disk_usage: 0,
        started_at: Some(ts - 60),
        restart_count: 0,
        exit_code: None,
    }
}

pub(crate) fn log_record(ts: i64, cid: &str, message: &str) -> LogRecord {
    LogRecord {
        entry: LogEntry {
            timestamp: ts,
            container_id: cid.to_owned(),
            container_name: format!("{cid}-name"),
            stream: "stdout".to_owned(),
            message: message.to_owned(),
        },
        project: "shop".to_owned(),
        service: "web".to_owned(),
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<Store> {
    Store::open(&dir.path().join("test.db"), 7).unwrap()
}

#[tokio::test]
async fn host_samples_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.put_host_sample(host_sample(100, 25.0));
    store.put_host_sample(host_sample(110, 75.0));
    store.flush().await;

    let samples = store.query_host(0, 200, 0).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].timestamp, 100);
    assert_eq!(samples[1].cpu_percent, 75.0);
}

#[tokio::test]
async fn timestamps_never_go_backward_per_series() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.put_host_sample(host_sample(100, 1.0));
    store.put_host_sample(host_sample(50, 2.0)); // clock jumped back
    store.flush().await;

    let samples = store.query_host(0, 200, 0).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].timestamp, 100);
    assert_eq!(samples[1].timestamp, 100);
}

#[tokio::test]
async fn tracking_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let store = Store::open(&path, 7).unwrap();
        let mut set = TrackingSet::default();
        set.set_container("abc", true);
        set.set_project("shop", true);
        store.put_tracking(set.clone()).await.unwrap();
        assert_eq!(store.tracking(), set);
        store.close();
    }

    let store = Store::open(&path, 7).unwrap();
    let set = store.tracking();
    assert!(set.containers.contains("abc"));
    assert!(set.projects.contains("shop"));
}

#[test]
fn tracking_empty_set_tracks_everything() {
    let set = TrackingSet::default();
    assert!(set.tracks("anything", "any-project"));

    let mut set = TrackingSet::default();
    set.set_container("abc", true);
    assert!(set.tracks("abc", ""));
    assert!(!set.tracks("def", ""));

    let mut set = TrackingSet::default();
    set.set_project("shop", true);
    assert!(set.tracks("whatever", "shop"));
    assert!(!set.tracks("whatever", "other"));
}

#[tokio::test]
async fn alert_insert_ack_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let id = store
        .insert_alert(NewAlert {
            rule_name: "hot".to_owned(),
            severity: "warning".to_owned(),
            condition: "host.cpu_percent > 50".to_owned(),
            instance_key: "hot:host".to_owned(),
            fired_at: 100,
            message: "cpu high".to_owned(),
        })
        .await
        .unwrap();
    assert!(id > 0);

    assert!(store.ack_alert(id).await.unwrap());
    assert!(!store.ack_alert(id + 999).await.unwrap());

    store.resolve_alert(id, 160);
    store.flush().await;

    let alerts = store.query_alerts(0, 200).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].id, id);
    assert!(alerts[0].acknowledged);
    assert_eq!(alerts[0].resolved_at, Some(160));
    assert!(alerts[0].resolved_at.unwrap() >= alerts[0].fired_at);
}

#[tokio::test]
async fn silence_deadline_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.set_silence("hot", 100).await.unwrap();
    store.set_silence("hot", 50).await.unwrap(); // must not rewind
    store.set_silence("hot", 200).await.unwrap();

    let silences = store.get_silences().unwrap();
    assert_eq!(silences.get("hot"), Some(&200));
}

#[tokio::test]
async fn sweep_deletes_only_expired_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let now = now_unix();

    store.put_host_sample(host_sample(now - 2 * 86_400, 1.0));
    store.put_host_sample(host_sample(now - 86_400 / 2, 2.0));
    store.put_host_sample(host_sample(now, 3.0));
    store.put_log(log_record(now - 2 * 86_400, "abc", "old"));
    store.put_log(log_record(now, "abc", "new"));
    store.flush().await;

    store.sweep(now - 86_400);
    store.flush().await;

    let samples = store.query_host(0, now + 1, 0).unwrap();
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.timestamp >= now - 86_400));

    let (entries, total) = store
        .query_logs(&query::LogFilter { start: 0, end: now + 1, ..Default::default() })
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(entries[0].message, "new");
}

#[tokio::test]
async fn container_samples_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.put_container_samples(vec![
        container_sample(100, "abc", "shop"),
        container_sample(100, "def", "blog"),
    ]);
    store.flush().await;

    let all = store.query_containers(0, 200, 0, None, None).unwrap();
    assert_eq!(all.len(), 2);

    let shop = store.query_containers(0, 200, 0, Some("shop"), None).unwrap();
    assert_eq!(shop.len(), 1);
    assert_eq!(shop[0].id, "abc");
}
