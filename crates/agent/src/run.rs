// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent lifecycle: wire the components together, run until a
//! shutdown signal, then unwind in reverse.
//!
//! Init order is store → hub → collectors → tailer → alert engine →
//! IPC server. SIGHUP reloads the config (rule set atomically, collect
//! settings and retention in place); SIGINT/SIGTERM drain and exit.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alert::engine::{Batch, Engine, RuleSet};
use crate::alert::notify;
use crate::collect::docker::{DockerCollector, NameFilter};
use crate::collect::host::HostCollector;
use crate::collect::{self, CollectSettings, LiveState};
use crate::config::{AgentArgs, Config};
use crate::ipc::{server, AgentState};
use crate::store::{retention, Store};
use crate::tail;
use crate::hub::Hub;

/// Depth of the collector → engine channel. Ticks are seconds apart;
/// anything beyond a couple means the engine is badly wedged.
const ENGINE_CHANNEL_DEPTH: usize = 4;

/// Run the agent to completion. Returns an error only for startup
/// failures (bad config, socket bind, store open); after startup the
/// agent degrades rather than exits.
pub async fn run(args: AgentArgs) -> anyhow::Result<()> {
    let mut config = Config::load(&args.config)?;
    info!(config = %args.config.display(), "agent starting");

    let shutdown = CancellationToken::new();

    // Store first: everything else hangs off it.
    let store = Store::open(&config.storage.path, config.storage.retention_days)?;
    let silences = store
        .get_silences()
        .map_err(|e| anyhow::anyhow!("loading silences: {e}"))?;

    let hub = Arc::new(Hub::new());
    let live = LiveState::new();

    // Collectors.
    let host = HostCollector::new(&config.host.proc, &config.host.sys);
    let filter = NameFilter::new(&config.docker.include, &config.docker.exclude)?;
    let docker = DockerCollector::connect(&config.docker.socket, filter)?;
    let runtime = docker.client();

    let (engine_tx, engine_rx) = mpsc::channel::<Batch>(ENGINE_CHANNEL_DEPTH);
    let (tail_tx, tail_rx) = watch::channel(Vec::new());
    let (settings_tx, settings_rx) = watch::channel(CollectSettings {
        interval: config.collect.interval,
        include: config.docker.include.clone(),
        exclude: config.docker.exclude.clone(),
    });

    // Alert engine + notifiers.
    let rules = RuleSet::compile(&config.alerts)?;
    let (notify_tx, notify_rx) = notify::channel();
    let engine = Engine::new(Arc::clone(&store), Arc::clone(&hub), notify_tx, rules, silences);

    // Bind the socket before spawning anything: a bind failure must
    // exit non-zero, not leave half an agent running.
    let socket_path = config.socket.path.clone();
    let listener = server::bind(&socket_path)?;

    tokio::spawn(retention::run(Arc::clone(&store), shutdown.child_token()));
    tokio::spawn(collect::run(
        host,
        docker,
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&live),
        engine_tx,
        tail_tx,
        settings_rx,
        shutdown.child_token(),
    ));
    tokio::spawn(tail::run(
        runtime.clone(),
        Arc::clone(&store),
        Arc::clone(&hub),
        tail_rx,
        shutdown.child_token(),
    ));
    tokio::spawn(collect::events::run(
        runtime,
        Arc::clone(&store),
        Arc::clone(&hub),
        shutdown.child_token(),
    ));
    tokio::spawn(Arc::clone(&engine).run(engine_rx, shutdown.child_token()));
    tokio::spawn(notify::run(config.notify.clone(), notify_rx, shutdown.child_token()));

    let state = Arc::new(AgentState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
        engine: Arc::clone(&engine),
        live,
    });
    let server_task = tokio::spawn(server::run(
        socket_path,
        listener,
        state,
        shutdown.child_token(),
    ));

    // Signal loop.
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                reload(&args, &mut config, &engine, &store, &settings_tx);
            }
            _ = sigint.recv() => {
                info!("SIGINT received");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
        }
    }

    info!("shutting down");
    shutdown.cancel();
    let _ = server_task.await;
    store.flush().await;
    let closing = Arc::clone(&store);
    let _ = tokio::task::spawn_blocking(move || closing.close()).await;
    info!("shutdown complete");
    Ok(())
}

/// Apply a SIGHUP reload. The rule set swaps atomically; collect
/// settings and retention apply on the next tick; unreloadable fields
/// warn and keep their old values.
fn reload(
    args: &AgentArgs,
    current: &mut Config,
    engine: &Engine,
    store: &Store,
    settings_tx: &watch::Sender<CollectSettings>,
) {
    let next = match Config::load(&args.config) {
        Ok(next) => next,
        Err(e) => {
            error!("reload failed, keeping previous config: {e:#}");
            return;
        }
    };

    if next.storage.path != current.storage.path {
        warn!("storage.path cannot be reloaded, ignoring change");
    }
    if next.socket.path != current.socket.path {
        warn!("socket.path cannot be reloaded, ignoring change");
    }
    if next.host != current.host {
        warn!("host proc/sys roots cannot be reloaded, ignoring change");
    }
    if next.docker.socket != current.docker.socket {
        warn!("docker.socket cannot be reloaded, ignoring change");
    }
    if next.notify != current.notify {
        warn!("notify configuration changes require a restart, ignoring");
    }

    let rules = match RuleSet::compile(&next.alerts) {
        Ok(rules) => rules,
        Err(e) => {
            error!("reload failed, keeping previous rules: {e:#}");
            return;
        }
    };
    let changed = current.changed_rules(&next);
    engine.replace_rules(rules, &changed);

    store.set_retention_days(next.storage.retention_days);
    let _ = settings_tx.send(CollectSettings {
        interval: next.collect.interval,
        include: next.docker.include.clone(),
        exclude: next.docker.exclude.clone(),
    });

    info!(
        rules = next.alerts.len(),
        changed = changed.len(),
        interval = ?next.collect.interval,
        "config reloaded"
    );
    *current = next;
}
