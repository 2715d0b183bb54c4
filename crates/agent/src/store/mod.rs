// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded time-series store.
//!
//! All writes funnel through one dedicated thread that owns the SQLite
//! connection; the async side hands it commands over a bounded channel
//! and never blocks on disk. Reads open their own read-only
//! connections, so queries run concurrently under WAL. A full queue
//! drops the write; collectors keep ticking regardless of disk state.

mod schema;

pub mod query;
pub mod retention;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use vigil_wire::types::{ContainerSample, HostSample, LogEntry};

/// Bounded depth of the writer command queue.
const QUEUE_DEPTH: usize = 4096;

/// Unix seconds right now.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Write-path failures, classified for the wire error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database or disk is out of space.
    Full,
    /// Any other storage failure, including a saturated writer queue.
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("storage full"),
            Self::Io(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persisted set of tracked container ids and project names.
/// Empty means "collect everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingSet {
    pub containers: BTreeSet<String>,
    pub projects: BTreeSet<String>,
}

impl TrackingSet {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.projects.is_empty()
    }

    /// Whether a container identified by id and compose project falls
    /// inside the tracking policy.
    pub fn tracks(&self, container_id: &str, project: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        self.containers.contains(container_id)
            || (!project.is_empty() && self.projects.contains(project))
    }

    pub fn set_container(&mut self, id: &str, tracked: bool) {
        if tracked {
            self.containers.insert(id.to_owned());
        } else {
            self.containers.remove(id);
        }
    }

    pub fn set_project(&mut self, name: &str, tracked: bool) {
        if tracked {
            self.projects.insert(name.to_owned());
        } else {
            self.projects.remove(name);
        }
    }
}

/// A log line plus the compose identity the wire shape doesn't carry.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub entry: LogEntry,
    pub project: String,
    pub service: String,
}

/// Alert row about to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub rule_name: String,
    pub severity: String,
    pub condition: String,
    pub instance_key: String,
    pub fired_at: i64,
    pub message: String,
}

enum Command {
    Host(HostSample),
    Containers(Vec<ContainerSample>),
    Log(LogRecord),
    InsertAlert(NewAlert, oneshot::Sender<Result<i64, StoreError>>),
    ResolveAlert { id: i64, resolved_at: i64 },
    AckAlert { id: i64, reply: oneshot::Sender<Result<bool, StoreError>> },
    SetSilence { rule_name: String, until_unix: i64, reply: oneshot::Sender<Result<(), StoreError>> },
    PutTracking { set: TrackingSet, reply: oneshot::Sender<Result<(), StoreError>> },
    Sweep { cutoff: i64 },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the store. Cheap to share; all mutation goes through the
/// writer thread.
pub struct Store {
    path: PathBuf,
    retention_days: AtomicU32,
    tx: SyncSender<Command>,
    tracking: RwLock<TrackingSet>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Open the database, start the writer thread, load cached state.
    pub fn open(path: &Path, retention_days: u32) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = schema::open_writer(path)?;
        let tracking = load_tracking(&conn)?;

        let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
        let writer = std::thread::Builder::new()
            .name("vigil-store".to_owned())
            .spawn(move || writer_loop(conn, rx))?;

        Ok(Arc::new(Self {
            path: path.to_owned(),
            retention_days: AtomicU32::new(retention_days),
            tx,
            tracking: RwLock::new(tracking),
            writer: Mutex::new(Some(writer)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days.load(Ordering::Relaxed)
    }

    pub fn set_retention_days(&self, days: u32) {
        self.retention_days.store(days, Ordering::Relaxed);
    }

    /// Current tracking policy (cached; reads don't hit the database).
    pub fn tracking(&self) -> TrackingSet {
        self.tracking.read().clone()
    }

    pub fn put_host_sample(&self, sample: HostSample) {
        self.send(Command::Host(sample), "host sample");
    }

    pub fn put_container_samples(&self, samples: Vec<ContainerSample>) {
        if !samples.is_empty() {
            self.send(Command::Containers(samples), "container samples");
        }
    }

    pub fn put_log(&self, record: LogRecord) {
        self.send(Command::Log(record), "log entry");
    }

    pub async fn insert_alert(&self, alert: NewAlert) -> Result<i64, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_or_err(Command::InsertAlert(alert, reply))?;
        rx.await.map_err(|_| StoreError::Io("store writer stopped".to_owned()))?
    }

    pub fn resolve_alert(&self, id: i64, resolved_at: i64) {
        self.send(Command::ResolveAlert { id, resolved_at }, "alert resolution");
    }

    pub async fn ack_alert(&self, id: i64) -> Result<bool, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_or_err(Command::AckAlert { id, reply })?;
        rx.await.map_err(|_| StoreError::Io("store writer stopped".to_owned()))?
    }

    /// Persist a silence. The stored deadline only ever moves forward.
    pub async fn set_silence(&self, rule_name: &str, until_unix: i64) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_or_err(Command::SetSilence {
            rule_name: rule_name.to_owned(),
            until_unix,
            reply,
        })?;
        rx.await.map_err(|_| StoreError::Io("store writer stopped".to_owned()))?
    }

    /// Replace the tracking set atomically, updating the cache on success.
    pub async fn put_tracking(&self, set: TrackingSet) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_or_err(Command::PutTracking { set: set.clone(), reply })?;
        rx.await.map_err(|_| StoreError::Io("store writer stopped".to_owned()))??;
        *self.tracking.write() = set;
        Ok(())
    }

    pub fn sweep(&self, cutoff: i64) {
        self.send(Command::Sweep { cutoff }, "retention sweep");
    }

    /// Wait until every write queued before this call has hit disk.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.try_send(Command::Flush(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Flush and stop the writer thread. Further writes are dropped.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("store writer thread panicked during shutdown");
            }
        }
    }

    fn send(&self, cmd: Command, what: &str) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(what, "store queue full, dropping write");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(what, "store writer stopped, dropping write");
            }
        }
    }

    fn send_or_err(&self, cmd: Command) -> Result<(), StoreError> {
        self.tx
            .try_send(cmd)
            .map_err(|_| StoreError::Io("store queue unavailable".to_owned()))
    }
}

fn load_tracking(conn: &Connection) -> rusqlite::Result<TrackingSet> {
    let mut set = TrackingSet::default();
    let mut stmt = conn.prepare("SELECT kind, name FROM tracking")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (kind, name) = row?;
        match kind.as_str() {
            "container" => {
                set.containers.insert(name);
            }
            "project" => {
                set.projects.insert(name);
            }
            other => warn!(kind = other, "ignoring unknown tracking row"),
        }
    }
    Ok(set)
}

/// Per-series high-water marks; row timestamps never go backward even
/// when the wall clock does.
#[derive(Default)]
struct Clamps {
    host: i64,
    containers: HashMap<String, i64>,
    logs: HashMap<String, i64>,
}

fn writer_loop(mut conn: Connection, rx: Receiver<Command>) {
    debug!("store writer started");
    let mut clamps = Clamps::default();
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Shutdown => break,
            other => apply(&mut conn, &mut clamps, other),
        }
    }
    debug!("store writer stopped");
}

fn apply(conn: &mut Connection, clamps: &mut Clamps, cmd: Command) {
    match cmd {
        Command::Host(mut sample) => {
            sample.timestamp = sample.timestamp.max(clamps.host);
            clamps.host = sample.timestamp;
            if let Err(e) = insert_host(conn, &sample) {
                log_write_error("host sample", &e);
            }
        }
        Command::Containers(mut samples) => {
            for sample in &mut samples {
                let last = clamps.containers.entry(sample.id.clone()).or_insert(0);
                sample.timestamp = sample.timestamp.max(*last);
                *last = sample.timestamp;
            }
            if let Err(e) = insert_containers(conn, &samples) {
                log_write_error("container samples", &e);
            }
        }
        Command::Log(mut record) => {
            let last = clamps.logs.entry(record.entry.container_id.clone()).or_insert(0);
            record.entry.timestamp = record.entry.timestamp.max(*last);
            *last = record.entry.timestamp;
            if let Err(e) = insert_log(conn, &record) {
                log_write_error("log entry", &e);
            }
        }
        Command::InsertAlert(alert, reply) => {
            let result = insert_alert(conn, &alert).map_err(classify);
            if let Err(ref e) = result {
                error!(rule = alert.rule_name.as_str(), error = %e, "alert insert failed");
            }
            let _ = reply.send(result);
        }
        Command::ResolveAlert { id, resolved_at } => {
            let result = conn.execute(
                "UPDATE alert_history SET resolved_at = ?1 WHERE id = ?2",
                params![resolved_at, id],
            );
            if let Err(e) = result {
                log_write_error("alert resolution", &e);
            }
        }
        Command::AckAlert { id, reply } => {
            let result = conn
                .execute("UPDATE alert_history SET acknowledged = 1 WHERE id = ?1", params![id])
                .map(|rows| rows > 0)
                .map_err(classify);
            let _ = reply.send(result);
        }
        Command::SetSilence { rule_name, until_unix, reply } => {
            let result = conn
                .execute(
                    "INSERT INTO silences (rule_name, until_unix) VALUES (?1, ?2)
                     ON CONFLICT(rule_name)
                     DO UPDATE SET until_unix = max(until_unix, excluded.until_unix)",
                    params![rule_name, until_unix],
                )
                .map(|_| ())
                .map_err(classify);
            let _ = reply.send(result);
        }
        Command::PutTracking { set, reply } => {
            let _ = reply.send(put_tracking(conn, &set).map_err(classify));
        }
        Command::Sweep { cutoff } => match sweep(conn, cutoff) {
            Ok(deleted) if deleted > 0 => {
                debug!(deleted, cutoff, "retention sweep removed rows");
            }
            Ok(_) => {}
            Err(e) => log_write_error("retention sweep", &e),
        },
        Command::Flush(reply) => {
            let _ = reply.send(());
        }
        Command::Shutdown => {}
    }
}

fn insert_host(conn: &Connection, sample: &HostSample) -> rusqlite::Result<()> {
    let data = serde_json::to_string(sample)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO host_samples (timestamp, data) VALUES (?1, ?2)",
        params![sample.timestamp, data],
    )?;
    Ok(())
}

fn insert_containers(conn: &mut Connection, samples: &[ContainerSample]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO container_samples (timestamp, container_id, project, service, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for sample in samples {
            let data = serde_json::to_string(sample)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            stmt.execute(params![
                sample.timestamp,
                sample.id,
                sample.project,
                sample.service,
                data
            ])?;
        }
    }
    tx.commit()
}

fn insert_log(conn: &Connection, record: &LogRecord) -> rusqlite::Result<()> {
    let entry = &record.entry;
    conn.execute(
        "INSERT INTO log_entries
             (timestamp, container_id, container_name, project, service, stream, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.timestamp,
            entry.container_id,
            entry.container_name,
            record.project,
            record.service,
            entry.stream,
            entry.message
        ],
    )?;
    Ok(())
}

fn insert_alert(conn: &Connection, alert: &NewAlert) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO alert_history
             (rule_name, severity, condition, instance_key, fired_at, message, acknowledged)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            alert.rule_name,
            alert.severity,
            alert.condition,
            alert.instance_key,
            alert.fired_at,
            alert.message
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn put_tracking(conn: &mut Connection, set: &TrackingSet) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM tracking", [])?;
    {
        let mut stmt = tx.prepare_cached("INSERT INTO tracking (kind, name) VALUES (?1, ?2)")?;
        for id in &set.containers {
            stmt.execute(params!["container", id])?;
        }
        for name in &set.projects {
            stmt.execute(params!["project", name])?;
        }
    }
    tx.commit()
}

fn sweep(conn: &Connection, cutoff: i64) -> rusqlite::Result<usize> {
    let mut deleted = 0;
    deleted += conn.execute("DELETE FROM host_samples WHERE timestamp < ?1", params![cutoff])?;
    deleted +=
        conn.execute("DELETE FROM container_samples WHERE timestamp < ?1", params![cutoff])?;
    deleted += conn.execute("DELETE FROM log_entries WHERE timestamp < ?1", params![cutoff])?;
    deleted += conn.execute("DELETE FROM alert_history WHERE fired_at < ?1", params![cutoff])?;
    Ok(deleted)
}

fn classify(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if inner.code == rusqlite::ErrorCode::DiskFull {
            return StoreError::Full;
        }
    }
    StoreError::Io(e.to_string())
}

fn log_write_error(what: &str, e: &rusqlite::Error) {
    if let rusqlite::Error::SqliteFailure(inner, _) = e {
        if inner.code == rusqlite::ErrorCode::DiskFull {
            error!(what, "storage full, skipping write");
            return;
        }
    }
    error!(what, error = %e, "store write failed, skipping");
}

#[cfg(test)]
#[path = "mod_tests.rs"]
pub(crate) mod tests;
