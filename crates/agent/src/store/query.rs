// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read side of the store: range queries and bucketed downsampling.
//!
//! Aggregation rule: rates and percents average within a bucket,
//! counters and gauges take the bucket's last value. Empty buckets are
//! dropped rather than interpolated.

use std::collections::{BTreeMap, HashMap};

use rusqlite::types::ToSql;
use tracing::warn;

use vigil_wire::types::{AlertInstance, ContainerSample, HostSample, LogEntry};

use super::{classify, schema, Store, StoreError};

/// Applied when `query:logs` omits `limit`.
pub const DEFAULT_LOG_LIMIT: u32 = 500;

/// Hard cap on a single log query.
pub const MAX_LOG_LIMIT: u32 = 5000;

/// Filter for [`Store::query_logs`]. `container_ids` already merges the
/// wire's single-id and multi-id forms.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub start: i64,
    pub end: i64,
    pub container_ids: Vec<String>,
    pub project: Option<String>,
    pub service: Option<String>,
    pub stream: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
}

impl Store {
    /// Host samples in `[start, end]`, oldest first, optionally
    /// downsampled to `points` buckets.
    pub fn query_host(
        &self,
        start: i64,
        end: i64,
        points: u32,
    ) -> Result<Vec<HostSample>, StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;
        let mut stmt = conn
            .prepare(
                "SELECT data FROM host_samples
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp ASC",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map([start, end], |row| row.get::<_, String>(0))
            .map_err(classify)?;

        let mut samples = Vec::new();
        for row in rows {
            let data = row.map_err(classify)?;
            match serde_json::from_str::<HostSample>(&data) {
                Ok(sample) => samples.push(sample),
                Err(e) => warn!(error = %e, "skipping undecodable host sample row"),
            }
        }

        if points == 0 {
            return Ok(samples);
        }
        Ok(downsample_host(samples, start, end, points))
    }

    /// Container samples in `[start, end]`, oldest first, optionally
    /// filtered by compose identity and downsampled per container.
    pub fn query_containers(
        &self,
        start: i64,
        end: i64,
        points: u32,
        project: Option<&str>,
        service: Option<&str>,
    ) -> Result<Vec<ContainerSample>, StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;

        let mut sql = String::from(
            "SELECT data FROM container_samples
             WHERE timestamp >= ? AND timestamp <= ?",
        );
        let mut params: Vec<&dyn ToSql> = vec![&start, &end];
        if let Some(ref p) = project {
            sql.push_str(" AND project = ?");
            params.push(p);
        }
        if let Some(ref s) = service {
            sql.push_str(" AND service = ?");
            params.push(s);
        }
        sql.push_str(" ORDER BY timestamp ASC");

        let mut stmt = conn.prepare(&sql).map_err(classify)?;
        let rows = stmt
            .query_map(params.as_slice(), |row| row.get::<_, String>(0))
            .map_err(classify)?;

        let mut by_container: BTreeMap<String, Vec<ContainerSample>> = BTreeMap::new();
        for row in rows {
            let data = row.map_err(classify)?;
            match serde_json::from_str::<ContainerSample>(&data) {
                Ok(sample) => by_container.entry(sample.id.clone()).or_default().push(sample),
                Err(e) => warn!(error = %e, "skipping undecodable container sample row"),
            }
        }

        let mut out = Vec::new();
        for (_, series) in by_container {
            if points == 0 {
                out.extend(series);
            } else {
                out.extend(downsample_containers(series, start, end, points));
            }
        }
        out.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
        Ok(out)
    }

    /// Log entries matching the filter: newest first, capped at the
    /// limit, plus the total match count before capping. Synthetic
    /// `event` separators mark where a service's container id changed.
    pub fn query_logs(&self, filter: &LogFilter) -> Result<(Vec<LogEntry>, u64), StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;
        let limit = filter.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT) as i64;

        let mut clauses = vec!["timestamp >= ?".to_owned(), "timestamp <= ?".to_owned()];
        let mut text_params: Vec<String> = Vec::new();
        if !filter.container_ids.is_empty() {
            let marks = vec!["?"; filter.container_ids.len()].join(", ");
            clauses.push(format!("container_id IN ({marks})"));
            text_params.extend(filter.container_ids.iter().cloned());
        }
        if let Some(ref p) = filter.project {
            clauses.push("project = ?".to_owned());
            text_params.push(p.clone());
        }
        if let Some(ref s) = filter.service {
            clauses.push("service = ?".to_owned());
            text_params.push(s.clone());
        }
        if let Some(ref s) = filter.stream {
            clauses.push("stream = ?".to_owned());
            text_params.push(s.clone());
        }
        if let Some(ref s) = filter.search {
            clauses.push("instr(lower(message), ?) > 0".to_owned());
            text_params.push(s.to_lowercase());
        }
        let where_sql = clauses.join(" AND ");

        let mut params: Vec<&dyn ToSql> = vec![&filter.start, &filter.end];
        for p in &text_params {
            params.push(p);
        }

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM log_entries WHERE {where_sql}"),
                params.as_slice(),
                |row| row.get(0),
            )
            .map_err(classify)?;

        let sql = format!(
            "SELECT timestamp, container_id, container_name, project, service, stream, message
             FROM log_entries WHERE {where_sql}
             ORDER BY timestamp DESC, rowid DESC LIMIT ?"
        );
        params.push(&limit);
        let mut stmt = conn.prepare(&sql).map_err(classify)?;
        let rows = stmt
            .query_map(params.as_slice(), |row| {
                Ok(LogRow {
                    entry: LogEntry {
                        timestamp: row.get(0)?,
                        container_id: row.get(1)?,
                        container_name: row.get(2)?,
                        stream: row.get(5)?,
                        message: row.get(6)?,
                    },
                    project: row.get(3)?,
                    service: row.get(4)?,
                })
            })
            .map_err(classify)?;

        let mut fetched = Vec::new();
        for row in rows {
            fetched.push(row.map_err(classify)?);
        }
        fetched.reverse(); // oldest first for separator detection

        let mut entries = insert_redeploy_separators(fetched);
        entries.reverse(); // newest first on the wire
        entries.truncate(limit as usize);
        Ok((entries, total as u64))
    }

    /// Alert history overlapping `[start, end]`, newest firing first.
    pub fn query_alerts(&self, start: i64, end: i64) -> Result<Vec<AlertInstance>, StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, rule_name, severity, condition, instance_key,
                        fired_at, resolved_at, message, acknowledged
                 FROM alert_history
                 WHERE fired_at >= ?1 AND fired_at <= ?2
                 ORDER BY fired_at DESC, id DESC",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map([start, end], |row| {
                Ok(AlertInstance {
                    id: row.get(0)?,
                    rule_name: row.get(1)?,
                    severity: row.get(2)?,
                    condition: row.get(3)?,
                    instance_key: row.get(4)?,
                    fired_at: row.get(5)?,
                    resolved_at: row.get(6)?,
                    message: row.get(7)?,
                    acknowledged: row.get::<_, i64>(8)? != 0,
                })
            })
            .map_err(classify)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row.map_err(classify)?);
        }
        Ok(alerts)
    }

    /// Newest stored log timestamp for one container; the tailer
    /// resumes streaming just past it.
    pub fn last_log_timestamp(&self, container_id: &str) -> Result<Option<i64>, StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;
        conn.query_row(
            "SELECT MAX(timestamp) FROM log_entries WHERE container_id = ?1",
            [container_id],
            |row| row.get(0),
        )
        .map_err(classify)
    }

    /// Persisted silences, including expired ones; callers filter by now.
    pub fn get_silences(&self) -> Result<HashMap<String, i64>, StoreError> {
        let conn = schema::open_reader(self.path()).map_err(classify)?;
        let mut stmt =
            conn.prepare("SELECT rule_name, until_unix FROM silences").map_err(classify)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(classify)?;

        let mut silences = HashMap::new();
        for row in rows {
            let (rule, until) = row.map_err(classify)?;
            silences.insert(rule, until);
        }
        Ok(silences)
    }
}

struct LogRow {
    entry: LogEntry,
    project: String,
    service: String,
}

/// Bucket index for a timestamp, clamped into `0..points`.
fn bucket_index(ts: i64, start: i64, end: i64, points: u32) -> usize {
    let span = (end - start).max(1) as i128;
    let offset = (ts - start).clamp(0, end - start) as i128;
    let idx = offset * points as i128 / span;
    (idx as usize).min(points as usize - 1)
}

fn bucket_start(idx: usize, start: i64, end: i64, points: u32) -> i64 {
    let span = (end - start).max(1) as i128;
    start + (span * idx as i128 / points as i128) as i64
}

fn downsample_host(samples: Vec<HostSample>, start: i64, end: i64, points: u32) -> Vec<HostSample> {
    let mut buckets: Vec<Vec<HostSample>> = vec![Vec::new(); points as usize];
    for sample in samples {
        buckets[bucket_index(sample.timestamp, start, end, points)].push(sample);
    }

    let mut out = Vec::new();
    for (idx, bucket) in buckets.into_iter().enumerate() {
        let n = bucket.len() as f64;
        let Some(last) = bucket.last().cloned() else {
            continue;
        };
        out.push(HostSample {
            timestamp: bucket_start(idx, start, end, points),
            cpu_percent: bucket.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            load1: bucket.iter().map(|s| s.load1).sum::<f64>() / n,
            load5: bucket.iter().map(|s| s.load5).sum::<f64>() / n,
            load15: bucket.iter().map(|s| s.load15).sum::<f64>() / n,
            ..last
        });
    }
    out
}

fn downsample_containers(
    series: Vec<ContainerSample>,
    start: i64,
    end: i64,
    points: u32,
) -> Vec<ContainerSample> {
    let mut buckets: Vec<Vec<ContainerSample>> = vec![Vec::new(); points as usize];
    for sample in series {
        buckets[bucket_index(sample.timestamp, start, end, points)].push(sample);
    }

    let mut out = Vec::new();
    for (idx, bucket) in buckets.into_iter().enumerate() {
        let n = bucket.len() as f64;
        let Some(last) = bucket.last().cloned() else {
            continue;
        };
        out.push(ContainerSample {
            timestamp: bucket_start(idx, start, end, points),
            cpu_percent: bucket.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            mem_percent: bucket.iter().map(|s| s.mem_percent).sum::<f64>() / n,
            ..last
        });
    }
    out
}

/// Insert a synthetic `event` entry wherever a (project, service) pair
/// changes container id between adjacent entries. Input and output are
/// oldest-first.
fn insert_redeploy_separators(rows: Vec<LogRow>) -> Vec<LogEntry> {
    let mut last_id: HashMap<(String, String), String> = HashMap::new();
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        if !row.service.is_empty() {
            let key = (row.project.clone(), row.service.clone());
            match last_id.get(&key) {
                Some(prev) if *prev != row.entry.container_id => {
                    out.push(LogEntry {
                        timestamp: row.entry.timestamp,
                        container_id: row.entry.container_id.clone(),
                        container_name: row.entry.container_name.clone(),
                        stream: "event".to_owned(),
                        message: format!("── {} redeployed ──", row.service),
                    });
                }
                _ => {}
            }
            last_id.insert(key, row.entry.container_id.clone());
        }
        out.push(row.entry);
    }
    out
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
