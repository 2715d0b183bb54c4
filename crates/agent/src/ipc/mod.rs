// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The UNIX-socket IPC surface: accept loop, per-connection sessions,
//! request dispatch, and the client half shared with tooling.

pub mod client;
pub mod dispatch;
pub mod server;
pub mod session;

use std::sync::Arc;

use crate::alert::engine::Engine;
use crate::collect::LiveState;
use crate::hub::Hub;
use crate::store::Store;

/// Everything a session needs to answer requests. One per agent,
/// assembled by the runtime and shared read-only.
pub struct AgentState {
    pub store: Arc<Store>,
    pub hub: Arc<Hub>,
    pub engine: Arc<Engine>,
    pub live: Arc<LiveState>,
}
