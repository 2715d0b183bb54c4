// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket lifecycle and the accept loop.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{session, AgentState};

/// Socket mode: owner and group only. Access control is filesystem
/// permissions; there is no in-band authentication.
const SOCKET_MODE: u32 = 0o660;

/// Bind the agent socket, replacing a stale file from a previous run.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if path.exists() {
        debug!(path = %path.display(), "removing stale socket");
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding socket {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("setting mode on {}", path.display()))?;

    info!(path = %path.display(), "listening");
    Ok(listener)
}

/// Accept connections until shutdown, then unlink the socket. New
/// connections stop being accepted the moment shutdown fires; live
/// sessions wind down through their own cancellation tokens.
pub async fn run(
    path: PathBuf,
    listener: UnixListener,
    state: Arc<AgentState>,
    shutdown: CancellationToken,
) {
    let next_session = AtomicU64::new(1);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => break,
        };

        match accepted {
            Ok((stream, _addr)) => {
                let session_id = next_session.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(session::run(
                    stream,
                    Arc::clone(&state),
                    session_id,
                    shutdown.child_token(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(&path) {
        debug!(path = %path.display(), error = %e, "socket already removed");
    }
    debug!("ipc server stopped");
}
