// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-container log streaming with reconnect backoff.

use std::sync::Arc;
use std::time::Duration;

use bollard::container::{LogOutput, LogsOptions};
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vigil_wire::types::{LogEntry, Topic};

use crate::collect::docker::parse_rfc3339;
use crate::hub::{Event, Hub};
use crate::store::{now_unix, LogRecord, Store};

use super::TailTarget;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Stream one container's logs until cancelled.
///
/// The first-ever attach reads from the container's start; reattach
/// resumes just past the newest stored entry, so agent restarts and
/// stream drops never duplicate or lose whole seconds of history.
pub async fn run(
    docker: Docker,
    store: Arc<Store>,
    hub: Arc<Hub>,
    target: TailTarget,
    shutdown: CancellationToken,
) {
    let mut since = match store.last_log_timestamp(&target.id) {
        Ok(Some(ts)) => ts + 1,
        _ => 0,
    };
    let mut backoff = BACKOFF_BASE;
    info!(container = target.name.as_str(), since, "log tailer attached");

    loop {
        let mut stream = docker.logs(
            &target.id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                timestamps: true,
                since,
                ..Default::default()
            }),
        );

        loop {
            let output = tokio::select! {
                o = stream.next() => o,
                _ = shutdown.cancelled() => {
                    debug!(container = target.name.as_str(), "log tailer cancelled");
                    return;
                }
            };

            match output {
                Some(Ok(output)) => {
                    backoff = BACKOFF_BASE;
                    let Some(record) = convert_line(output, &target) else {
                        continue;
                    };
                    since = since.max(record.entry.timestamp);
                    store.put_log(record.clone());
                    hub.publish(Topic::Logs, Event::Log(record));
                }
                Some(Err(e)) => {
                    debug!(container = target.name.as_str(), error = %e, "log stream error");
                    break;
                }
                None => {
                    debug!(container = target.name.as_str(), "log stream ended");
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(jittered(backoff)) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Demultiplexed runtime output → log record. Stdin echoes are noise
/// and dropped.
fn convert_line(output: LogOutput, target: &TailTarget) -> Option<LogRecord> {
    let (stream, bytes) = match output {
        LogOutput::StdOut { message } => ("stdout", message),
        LogOutput::StdErr { message } => ("stderr", message),
        LogOutput::Console { message } => ("stdout", message),
        LogOutput::StdIn { .. } => return None,
    };

    let text = String::from_utf8_lossy(&bytes);
    let line = text.trim_end_matches(['\n', '\r']);
    let (timestamp, message) = split_timestamp(line);
    if message.is_empty() {
        return None;
    }

    Some(LogRecord {
        entry: LogEntry {
            timestamp,
            container_id: target.id.clone(),
            container_name: target.name.clone(),
            stream: stream.to_owned(),
            message: message.to_owned(),
        },
        project: target.project.clone(),
        service: target.service.clone(),
    })
}

/// Strip the RFC3339 prefix `timestamps: true` adds. Lines without a
/// parseable prefix are stamped with the current time instead.
fn split_timestamp(line: &str) -> (i64, &str) {
    if let Some((prefix, rest)) = line.split_once(' ') {
        if let Some(ts) = parse_rfc3339(prefix) {
            return (ts, rest);
        }
    }
    (now_unix(), line)
}

/// ±20% jitter so a mass reconnect doesn't thundering-herd the runtime.
fn jittered(d: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|t| t.subsec_nanos())
        .unwrap_or(0);
    let factor = 0.8 + (nanos % 400) as f64 / 1000.0;
    d.mul_f64(factor)
}

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;
