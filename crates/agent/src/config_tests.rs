// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn load_str(toml: &str) -> anyhow::Result<Config> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, toml).unwrap();
    Config::load(&path)
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::load(std::path::Path::new("/nonexistent/vigil.toml")).unwrap();
    assert_eq!(config.storage.retention_days, 7);
    assert_eq!(config.storage.path, PathBuf::from("/var/lib/vigil/vigil.db"));
    assert_eq!(config.socket.path, PathBuf::from("/run/vigil/vigil.sock"));
    assert_eq!(config.host.proc, PathBuf::from("/proc"));
    assert_eq!(config.collect.interval, Duration::from_secs(10));
    assert!(config.alerts.is_empty());
}

#[test]
fn full_config_parses() {
    let config = load_str(
        r#"
[storage]
path = "/tmp/v.db"
retention_days = 3

[socket]
path = "/tmp/v.sock"

[host]
proc = "/tmp/fakeproc"

[docker]
socket = "/tmp/docker.sock"
include = ["web-*"]
exclude = ["*-canary"]

[collect]
interval = "30s"

[alerts.hot]
condition = "host.cpu_percent > 90"
severity = "critical"
for = "2m"
cooldown = "1m"
notify_cooldown = "10m"
actions = ["ops-mail"]

[alerts.container-down]
condition = "container.state != \"running\""
severity = "warning"

[notify.email]
enabled = true
smtp_host = "localhost"
smtp_port = 2525
from = "vigil@example.com"
to = ["ops@example.com"]

[[notify.webhooks]]
url = "https://hooks.example.com/vigil"
"#,
    )
    .unwrap();

    assert_eq!(config.storage.retention_days, 3);
    assert_eq!(config.collect.interval, Duration::from_secs(30));

    let hot = &config.alerts["hot"];
    assert_eq!(hot.severity, Severity::Critical);
    assert_eq!(hot.r#for, Duration::from_secs(120));
    assert_eq!(hot.cooldown, Duration::from_secs(60));
    assert_eq!(hot.notify_cooldown, Duration::from_secs(600));
    assert_eq!(hot.actions, vec!["ops-mail"]);

    let down = &config.alerts["container-down"];
    assert_eq!(down.severity, Severity::Warning);
    assert_eq!(down.r#for, Duration::ZERO);
    assert_eq!(down.cooldown, Duration::from_secs(30));
    assert_eq!(down.notify_cooldown, Duration::from_secs(300));

    let email = config.notify.email.unwrap();
    assert_eq!(email.smtp_port, 2525);
    assert_eq!(config.notify.webhooks.len(), 1);
    assert!(config.notify.webhooks[0].enabled);
}

#[test]
fn rule_order_is_preserved() {
    let config = load_str(
        r#"
[alerts.zeta]
condition = "host.cpu_percent > 1"
severity = "warning"

[alerts.alpha]
condition = "host.cpu_percent > 2"
severity = "warning"
"#,
    )
    .unwrap();
    let names: Vec<&String> = config.alerts.keys().collect();
    assert_eq!(names, ["zeta", "alpha"]);
}

#[test]
fn sub_second_interval_clamps() {
    let config = load_str("[collect]\ninterval = \"100ms\"\n").unwrap();
    assert_eq!(config.collect.interval, MIN_COLLECT_INTERVAL);
}

#[test]
fn malformed_condition_rejected_at_load() {
    let err = load_str(
        r#"
[alerts.bad]
condition = "host.cpu_percent >"
severity = "warning"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("bad"));
}

#[test]
fn mixed_scope_condition_rejected_at_load() {
    let err = load_str(
        r#"
[alerts.mixed]
condition = "container.cpu_percent > 1 and disk.percent > 90"
severity = "warning"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("mixed"));
}

#[test]
fn invalid_severity_rejected() {
    assert!(load_str(
        r#"
[alerts.x]
condition = "host.cpu_percent > 1"
severity = "fatal"
"#,
    )
    .is_err());
}

#[test]
fn unknown_sections_do_not_abort() {
    let config = load_str("[shiny_new_section]\nkey = 1\n").unwrap();
    assert!(config.alerts.is_empty());
}

#[test]
fn enabled_email_requires_recipients() {
    assert!(load_str(
        r#"
[notify.email]
enabled = true
smtp_host = "localhost"
from = "vigil@example.com"
to = []
"#,
    )
    .is_err());
}

#[test]
fn bad_glob_rejected() {
    assert!(load_str("[docker]\ninclude = [\"[\"]\n").is_err());
}

#[test]
fn changed_rules_flags_expression_and_for_changes() {
    let old = load_str(
        r#"
[alerts.same]
condition = "host.cpu_percent > 1"
severity = "warning"

[alerts.expr-changes]
condition = "host.cpu_percent > 2"
severity = "warning"

[alerts.for-changes]
condition = "host.cpu_percent > 3"
severity = "warning"
for = "10s"

[alerts.severity-changes]
condition = "host.cpu_percent > 4"
severity = "warning"
"#,
    )
    .unwrap();
    let new = load_str(
        r#"
[alerts.same]
condition = "host.cpu_percent > 1"
severity = "warning"

[alerts.expr-changes]
condition = "host.cpu_percent > 20"
severity = "warning"

[alerts.for-changes]
condition = "host.cpu_percent > 3"
severity = "warning"
for = "30s"

[alerts.severity-changes]
condition = "host.cpu_percent > 4"
severity = "critical"

[alerts.brand-new]
condition = "host.cpu_percent > 5"
severity = "warning"
"#,
    )
    .unwrap();

    let mut changed = old.changed_rules(&new);
    changed.sort();
    assert_eq!(changed, ["brand-new", "expr-changes", "for-changes"]);
}
