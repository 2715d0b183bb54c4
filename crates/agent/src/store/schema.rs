// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

/// Schema is additive-only; columns are never repurposed because rows
/// outlive agent upgrades for up to `retention_days`.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS host_samples (
    timestamp   INTEGER NOT NULL,
    data        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_host_samples_ts ON host_samples(timestamp);

CREATE TABLE IF NOT EXISTS container_samples (
    timestamp    INTEGER NOT NULL,
    container_id TEXT NOT NULL,
    project      TEXT NOT NULL DEFAULT '',
    service      TEXT NOT NULL DEFAULT '',
    data         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_container_samples_ts
    ON container_samples(container_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_container_samples_time
    ON container_samples(timestamp);

CREATE TABLE IF NOT EXISTS log_entries (
    timestamp      INTEGER NOT NULL,
    container_id   TEXT NOT NULL,
    container_name TEXT NOT NULL,
    project        TEXT NOT NULL DEFAULT '',
    service        TEXT NOT NULL DEFAULT '',
    stream         TEXT NOT NULL,
    message        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_log_entries_ts ON log_entries(timestamp);
CREATE INDEX IF NOT EXISTS idx_log_entries_container
    ON log_entries(container_id, timestamp);

CREATE TABLE IF NOT EXISTS alert_history (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_name    TEXT NOT NULL,
    severity     TEXT NOT NULL,
    condition    TEXT NOT NULL,
    instance_key TEXT NOT NULL,
    fired_at     INTEGER NOT NULL,
    resolved_at  INTEGER,
    message      TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_alert_history_fired ON alert_history(fired_at);

CREATE TABLE IF NOT EXISTS tracking (
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (kind, name)
);

CREATE TABLE IF NOT EXISTS silences (
    rule_name  TEXT PRIMARY KEY,
    until_unix INTEGER NOT NULL
);
";

/// Open (creating if needed) the store database for the writer thread.
pub(crate) fn open_writer(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a read-only connection. Readers are concurrent under WAL; each
/// query gets its own connection so none serializes behind another.
pub(crate) fn open_reader(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}
