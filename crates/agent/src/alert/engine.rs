// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert evaluation against each fresh sample batch.
//!
//! Every (rule, instance_key) pair runs its own little state machine:
//! Inactive → Pending (condition true, `for` not yet served) → Firing
//! → back to Inactive on resolve, with a cooldown gate against
//! flapping. Silences suppress emission but not transitions, so the
//! history a silenced rule writes is identical to an unsilenced one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_wire::types::{
    AlertEvent, AlertInstance, AlertRuleInfo, ContainerSample, DiskSample, HostSample, Topic,
};

use crate::config::RuleConfig;
use crate::hub::{Event, Hub};
use crate::store::{now_unix, NewAlert, Store};

use super::expr::{Expr, FieldSource, Scope, Value};
use super::notify::Notification;

/// One collect tick's worth of samples, handed to the engine over a
/// direct channel (not through the hub).
#[derive(Debug, Clone)]
pub struct Batch {
    pub host: HostSample,
    pub containers: Vec<ContainerSample>,
    /// False when the runtime could not be sampled this tick; an
    /// absent container then proves nothing about its existence.
    pub runtime_ok: bool,
}

/// A rule compiled at config load: parse once, evaluate every tick.
pub struct CompiledRule {
    pub name: String,
    pub config: RuleConfig,
    expr: Expr,
    scope: Scope,
}

/// Immutable rule set; reload swaps the whole thing atomically.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn compile(alerts: &IndexMap<String, RuleConfig>) -> anyhow::Result<Self> {
        let mut rules = Vec::with_capacity(alerts.len());
        for (name, config) in alerts {
            let expr = Expr::parse(&config.condition)
                .map_err(|e| anyhow::anyhow!("alert rule '{name}': {e}"))?;
            let scope = expr.scope().map_err(|e| anyhow::anyhow!("alert rule '{name}': {e}"))?;
            rules.push(CompiledRule { name: name.clone(), config: config.clone(), expr, scope });
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn get(&self, name: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Pending { since: i64 },
    Firing { fired_at: i64, alert_id: i64 },
}

#[derive(Debug, Default)]
struct InstanceState {
    phase: Option<Phase>,
    /// Re-entry to Pending is blocked until this time after a resolve.
    cooldown_until: i64,
    /// Last `firing` notification, for the notify throttle.
    last_notified: i64,
}

struct Transition {
    key: String,
    rule_name: String,
    severity: String,
    condition: String,
    actions: Vec<String>,
    message: String,
    silenced: bool,
    kind: TransitionKind,
}

enum TransitionKind {
    Fire { fired_at: i64 },
    Resolve { alert_id: i64, fired_at: i64, resolved_at: i64 },
    Renotify,
}

/// The evaluator. One per agent; `run` consumes the collector channel.
pub struct Engine {
    store: Arc<Store>,
    hub: Arc<Hub>,
    notify_tx: mpsc::Sender<Notification>,
    rules: RwLock<Arc<RuleSet>>,
    states: Mutex<HashMap<String, InstanceState>>,
    silences: Mutex<HashMap<String, i64>>,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<Hub>,
        notify_tx: mpsc::Sender<Notification>,
        rules: RuleSet,
        silences: HashMap<String, i64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            notify_tx,
            rules: RwLock::new(Arc::new(rules)),
            states: Mutex::new(HashMap::new()),
            silences: Mutex::new(silences),
        })
    }

    /// Consume sample batches until the channel closes or shutdown.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Batch>, shutdown: CancellationToken) {
        info!(rules = self.rules.read().len(), "alert engine started");
        loop {
            let batch = tokio::select! {
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };
            self.evaluate(batch).await;
        }
        debug!("alert engine stopped");
    }

    /// Evaluate one batch: advance every matching state machine, then
    /// persist and publish whatever transitioned.
    pub async fn evaluate(&self, batch: Batch) {
        let rules = Arc::clone(&self.rules.read());
        let now = batch.host.timestamp;
        let mut transitions = Vec::new();

        {
            let mut states = self.states.lock();
            for rule in &rules.rules {
                let silenced = self.is_silenced(&rule.name, now);
                match rule.scope {
                    Scope::Host => {
                        let active = rule.expr.eval(&HostSource(&batch.host));
                        let key = format!("{}:host", rule.name);
                        if let Some(t) =
                            advance(&mut states, rule, &key, "host", active, now, silenced)
                        {
                            transitions.push(t);
                        }
                    }
                    Scope::Container => {
                        for container in &batch.containers {
                            let source = ContainerSource { host: &batch.host, container };
                            let active = rule.expr.eval(&source);
                            let key = format!("{}:{}", rule.name, container.id);
                            if let Some(t) = advance(
                                &mut states,
                                rule,
                                &key,
                                &container.name,
                                active,
                                now,
                                silenced,
                            ) {
                                transitions.push(t);
                            }
                        }
                    }
                    Scope::Disk => {
                        for disk in &batch.host.disks {
                            let source = DiskSource { host: &batch.host, disk };
                            let active = rule.expr.eval(&source);
                            let key = format!("{}:{}", rule.name, disk.mountpoint);
                            if let Some(t) = advance(
                                &mut states,
                                rule,
                                &key,
                                &disk.mountpoint,
                                active,
                                now,
                                silenced,
                            ) {
                                transitions.push(t);
                            }
                        }
                    }
                }
            }

            // Entities disappear between ticks: compose redeploys swap
            // container ids, filesystems unmount. Reconcile against the
            // live id sets so their instances resolve instead of
            // staying Firing forever.
            let container_ids: HashSet<&str> =
                batch.containers.iter().map(|c| c.id.as_str()).collect();
            let mountpoints: HashSet<&str> =
                batch.host.disks.iter().map(|d| d.mountpoint.as_str()).collect();

            states.retain(|key, state| {
                let Some((rule_name, instance)) = key.split_once(':') else {
                    return false;
                };
                let Some(rule) = rules.get(rule_name) else {
                    return true;
                };
                let gone = match rule.scope {
                    Scope::Host => false,
                    Scope::Container => batch.runtime_ok && !container_ids.contains(instance),
                    Scope::Disk => {
                        !batch.host.disks.is_empty() && !mountpoints.contains(instance)
                    }
                };
                if !gone {
                    return true;
                }
                // A pending instance just evaporates; a firing one
                // resolves so subscribers and history see the end.
                if let Some(Phase::Firing { fired_at, alert_id }) = state.phase {
                    transitions.push(Transition {
                        key: key.clone(),
                        rule_name: rule.name.clone(),
                        severity: rule.config.severity.as_str().to_owned(),
                        condition: rule.config.condition.clone(),
                        actions: rule.config.actions.clone(),
                        message: format!("{} ({}): {}", rule.name, instance, rule.config.condition),
                        silenced: self.is_silenced(rule_name, now),
                        kind: TransitionKind::Resolve { alert_id, fired_at, resolved_at: now },
                    });
                }
                false
            });
        }

        for transition in transitions {
            self.apply(transition).await;
        }
    }

    async fn apply(&self, t: Transition) {
        match t.kind {
            TransitionKind::Fire { fired_at } => {
                let alert_id = match self
                    .store
                    .insert_alert(NewAlert {
                        rule_name: t.rule_name.clone(),
                        severity: t.severity.clone(),
                        condition: t.condition.clone(),
                        instance_key: t.key.clone(),
                        fired_at,
                        message: t.message.clone(),
                    })
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(rule = t.rule_name.as_str(), error = %e, "alert not persisted");
                        0
                    }
                };

                if let Some(state) = self.states.lock().get_mut(&t.key) {
                    if let Some(Phase::Firing { alert_id: id, .. }) = &mut state.phase {
                        *id = alert_id;
                    }
                }

                info!(
                    rule = t.rule_name.as_str(),
                    instance = t.key.as_str(),
                    silenced = t.silenced,
                    "alert firing"
                );
                if !t.silenced {
                    let alert = AlertInstance {
                        id: alert_id,
                        rule_name: t.rule_name.clone(),
                        severity: t.severity.clone(),
                        condition: t.condition.clone(),
                        instance_key: t.key.clone(),
                        fired_at,
                        resolved_at: None,
                        message: t.message.clone(),
                        acknowledged: false,
                    };
                    self.hub.publish(
                        Topic::Alerts,
                        Event::Alert(AlertEvent { state: "firing".to_owned(), alert }),
                    );
                    self.notify(&t, "firing");
                }
            }
            TransitionKind::Resolve { alert_id, fired_at, resolved_at } => {
                if alert_id > 0 {
                    self.store.resolve_alert(alert_id, resolved_at);
                }
                info!(
                    rule = t.rule_name.as_str(),
                    instance = t.key.as_str(),
                    silenced = t.silenced,
                    "alert resolved"
                );
                if !t.silenced {
                    let alert = AlertInstance {
                        id: alert_id,
                        rule_name: t.rule_name.clone(),
                        severity: t.severity.clone(),
                        condition: t.condition.clone(),
                        instance_key: t.key.clone(),
                        fired_at,
                        resolved_at: Some(resolved_at),
                        message: t.message.clone(),
                        acknowledged: false,
                    };
                    self.hub.publish(
                        Topic::Alerts,
                        Event::Alert(AlertEvent { state: "resolved".to_owned(), alert }),
                    );
                    self.notify(&t, "resolved");
                }
            }
            TransitionKind::Renotify => {
                if !t.silenced {
                    self.notify(&t, "firing");
                }
            }
        }
    }

    fn notify(&self, t: &Transition, state: &str) {
        let notification = Notification {
            rule_name: t.rule_name.clone(),
            severity: t.severity.clone(),
            state: state.to_owned(),
            message: t.message.clone(),
            actions: t.actions.clone(),
        };
        if self.notify_tx.try_send(notification).is_err() {
            warn!(rule = t.rule_name.as_str(), "notification queue full, dropping");
        }
    }

    fn is_silenced(&self, rule_name: &str, now: i64) -> bool {
        self.silences.lock().get(rule_name).copied().unwrap_or(0) > now
    }

    /// Silence a rule for `duration_seconds` from now. Returns false
    /// when the rule does not exist.
    pub async fn silence(&self, rule_name: &str, duration_seconds: u64) -> anyhow::Result<bool> {
        if !self.rules.read().contains(rule_name) {
            return Ok(false);
        }
        let until = now_unix() + duration_seconds as i64;
        {
            let mut silences = self.silences.lock();
            let entry = silences.entry(rule_name.to_owned()).or_insert(0);
            *entry = (*entry).max(until);
        }
        self.store.set_silence(rule_name, until).await?;
        info!(rule = rule_name, until, "rule silenced");
        Ok(true)
    }

    /// Swap in a new rule set. Pending timers reset for `changed`
    /// rules; state for removed rules is dropped; everything else is
    /// preserved. Runs in one critical section so readers never see a
    /// half-applied reload.
    pub fn replace_rules(&self, next: RuleSet, changed: &[String]) {
        let mut states = self.states.lock();
        let next = Arc::new(next);

        states.retain(|key, state| {
            let Some((rule_name, _)) = key.split_once(':') else {
                return false;
            };
            if !next.contains(rule_name) {
                return false;
            }
            if changed.iter().any(|c| c == rule_name) {
                // Reset the hysteresis timer; keep active firings so a
                // reload does not spuriously re-fire or lose resolves.
                if matches!(state.phase, Some(Phase::Pending { .. })) {
                    return false;
                }
            }
            true
        });

        *self.rules.write() = next;
        info!(rules = self.rules.read().len(), changed = changed.len(), "alert rules reloaded");
    }

    /// Rules with live firing counts and silence deadlines, in config
    /// order, for `query:alert_rules`.
    pub fn rules_snapshot(&self) -> Vec<AlertRuleInfo> {
        let rules = Arc::clone(&self.rules.read());
        let states = self.states.lock();
        let silences = self.silences.lock();
        let now = now_unix();

        let mut firing: HashMap<String, u64> = HashMap::new();
        for (key, state) in states.iter() {
            if matches!(state.phase, Some(Phase::Firing { .. })) {
                if let Some((rule_name, _)) = key.split_once(':') {
                    *firing.entry(rule_name.to_owned()).or_insert(0) += 1;
                }
            }
        }

        rules
            .rules
            .iter()
            .map(|rule| AlertRuleInfo {
                name: rule.name.clone(),
                condition: rule.config.condition.clone(),
                severity: rule.config.severity.as_str().to_owned(),
                for_secs: rule.config.r#for.as_secs(),
                cooldown_secs: rule.config.cooldown.as_secs(),
                notify_cooldown_secs: rule.config.notify_cooldown.as_secs(),
                actions: rule.config.actions.clone(),
                firing_count: firing.get(rule.name.as_str()).copied().unwrap_or(0),
                silenced_until: silences
                    .get(&rule.name)
                    .copied()
                    .filter(|until| *until > now),
            })
            .collect()
    }
}

/// Advance one instance's state machine. Returns the transition to
/// apply outside the lock, if any.
fn advance(
    states: &mut HashMap<String, InstanceState>,
    rule: &CompiledRule,
    key: &str,
    label: &str,
    active: bool,
    now: i64,
    silenced: bool,
) -> Option<Transition> {
    let state = states.entry(key.to_owned()).or_default();
    let for_secs = rule.config.r#for.as_secs() as i64;

    let transition = |kind| Transition {
        key: key.to_owned(),
        rule_name: rule.name.clone(),
        severity: rule.config.severity.as_str().to_owned(),
        condition: rule.config.condition.clone(),
        actions: rule.config.actions.clone(),
        message: format!("{} ({}): {}", rule.name, label, rule.config.condition),
        silenced,
        kind,
    };

    match state.phase {
        None => {
            if active && now >= state.cooldown_until {
                if for_secs == 0 {
                    state.phase = Some(Phase::Firing { fired_at: now, alert_id: 0 });
                    state.last_notified = now;
                    return Some(transition(TransitionKind::Fire { fired_at: now }));
                }
                state.phase = Some(Phase::Pending { since: now });
            }
            None
        }
        Some(Phase::Pending { since }) => {
            if !active {
                state.phase = None;
                return None;
            }
            if now - since >= for_secs {
                state.phase = Some(Phase::Firing { fired_at: now, alert_id: 0 });
                state.last_notified = now;
                return Some(transition(TransitionKind::Fire { fired_at: now }));
            }
            None
        }
        Some(Phase::Firing { fired_at, alert_id }) => {
            if !active {
                state.phase = None;
                state.cooldown_until = now + rule.config.cooldown.as_secs() as i64;
                return Some(transition(TransitionKind::Resolve {
                    alert_id,
                    fired_at,
                    resolved_at: now,
                }));
            }
            let throttle = rule.config.notify_cooldown.as_secs() as i64;
            if throttle > 0 && now - state.last_notified >= throttle {
                state.last_notified = now;
                return Some(transition(TransitionKind::Renotify));
            }
            None
        }
    }
}

struct HostSource<'a>(&'a HostSample);

impl FieldSource for HostSource<'_> {
    fn field(&self, scope: Scope, name: &str) -> Option<Value> {
        match scope {
            Scope::Host => host_field(self.0, name),
            _ => None,
        }
    }
}

struct ContainerSource<'a> {
    host: &'a HostSample,
    container: &'a ContainerSample,
}

impl FieldSource for ContainerSource<'_> {
    fn field(&self, scope: Scope, name: &str) -> Option<Value> {
        match scope {
            Scope::Host => host_field(self.host, name),
            Scope::Container => container_field(self.container, name),
            Scope::Disk => None,
        }
    }
}

struct DiskSource<'a> {
    host: &'a HostSample,
    disk: &'a DiskSample,
}

impl FieldSource for DiskSource<'_> {
    fn field(&self, scope: Scope, name: &str) -> Option<Value> {
        match scope {
            Scope::Host => host_field(self.host, name),
            Scope::Disk => disk_field(self.disk, name),
            Scope::Container => None,
        }
    }
}

fn host_field(h: &HostSample, name: &str) -> Option<Value> {
    let num = |n: f64| Some(Value::Num(n));
    match name {
        "cpu_percent" => num(h.cpu_percent),
        "cpu_count" => num(h.cpu_count as f64),
        "mem_total" => num(h.mem_total as f64),
        "mem_used" => num(h.mem_used as f64),
        "mem_cached" => num(h.mem_cached as f64),
        "mem_free" => num(h.mem_free as f64),
        "mem_percent" => {
            if h.mem_total == 0 {
                num(0.0)
            } else {
                num(h.mem_used as f64 / h.mem_total as f64 * 100.0)
            }
        }
        "swap_total" => num(h.swap_total as f64),
        "swap_used" => num(h.swap_used as f64),
        "load1" => num(h.load1),
        "load5" => num(h.load5),
        "load15" => num(h.load15),
        "uptime" => num(h.uptime as f64),
        _ => None,
    }
}

fn container_field(c: &ContainerSample, name: &str) -> Option<Value> {
    let num = |n: f64| Some(Value::Num(n));
    let text = |s: &str| Some(Value::Str(s.to_owned()));
    match name {
        "cpu_percent" => num(c.cpu_percent),
        "cpu_limit" => num(c.cpu_limit),
        "mem_usage" => num(c.mem_usage as f64),
        "mem_limit" => num(c.mem_limit as f64),
        "mem_percent" => num(c.mem_percent),
        "net_rx" => num(c.net_rx as f64),
        "net_tx" => num(c.net_tx as f64),
        "block_read" => num(c.block_read as f64),
        "block_write" => num(c.block_write as f64),
        "pids" => num(c.pids as f64),
        "disk_usage" => num(c.disk_usage as f64),
        "restart_count" => num(c.restart_count as f64),
        "exit_code" => c.exit_code.map(|code| Value::Num(code as f64)),
        "id" => text(&c.id),
        "name" => text(&c.name),
        "image" => text(&c.image),
        "project" => text(&c.project),
        "service" => text(&c.service),
        "state" => text(&c.state),
        "health" => text(&c.health),
        _ => None,
    }
}

fn disk_field(d: &DiskSample, name: &str) -> Option<Value> {
    let num = |n: f64| Some(Value::Num(n));
    match name {
        "total" => num(d.total as f64),
        "used" => num(d.used as f64),
        "free" => num(d.free as f64),
        "percent" => num(d.percent),
        "mountpoint" => Some(Value::Str(d.mountpoint.clone())),
        "device" => Some(Value::Str(d.device.clone())),
        _ => None,
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
