// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration: CLI flags plus the TOML file.
//!
//! Unknown keys warn but never abort; bad values do. Alert conditions
//! are parsed at load so a malformed rule is rejected before the agent
//! binds its socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use crate::alert::expr::Expr;

/// Floor for `collect.interval`; lower values clamp with a warning.
pub const MIN_COLLECT_INTERVAL: Duration = Duration::from_secs(1);

/// CLI surface of `vigil agent`.
#[derive(Debug, Clone, Parser)]
pub struct AgentArgs {
    /// Path to the agent configuration file.
    #[arg(long, env = "VIGIL_CONFIG", default_value = "/etc/vigil/config.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "VIGIL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, env = "VIGIL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub alerts: IndexMap<String, RuleConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(flatten)]
    unknown: toml::map::Map<String, toml::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Days of history to keep; 0 disables eviction.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_proc_root")]
    pub proc: PathBuf,
    #[serde(default = "default_sys_root")]
    pub sys: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_socket")]
    pub socket: PathBuf,
    /// Container name globs to collect (empty = all).
    #[serde(default)]
    pub include: Vec<String>,
    /// Container name globs to skip.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "default_collect_interval", with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleConfig {
    pub condition: String,
    pub severity: Severity,
    #[serde(default, rename = "for", with = "humantime_serde")]
    pub r#for: Duration,
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(default = "default_notify_cooldown", with = "humantime_serde")]
    pub notify_cooldown: Duration,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/vigil/vigil.db")
}

fn default_retention_days() -> u32 {
    7
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/vigil/vigil.sock")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_collect_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_notify_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_smtp_port() -> u16 {
    25
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path(), retention_days: default_retention_days() }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self { path: default_socket_path() }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { proc: default_proc_root(), sys: default_sys_root() }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self { socket: default_docker_socket(), include: vec![], exclude: vec![] }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self { interval: default_collect_interval() }
    }
}

impl Config {
    /// Load and validate a config file. A missing file yields defaults
    /// so a bare `vigil agent` works on a fresh host.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.warn_unknown_keys();

        if config.collect.interval < MIN_COLLECT_INTERVAL {
            warn!(
                interval = ?config.collect.interval,
                "collect.interval below 1s, clamping"
            );
            config.collect.interval = MIN_COLLECT_INTERVAL;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot run: malformed or mixed-scope alert
    /// conditions, empty notifier targets, bad globs.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, rule) in &self.alerts {
            let expr = Expr::parse(&rule.condition)
                .map_err(|e| anyhow::anyhow!("alert rule '{name}': {e}"))?;
            expr.scope().map_err(|e| anyhow::anyhow!("alert rule '{name}': {e}"))?;
        }

        for pattern in self.docker.include.iter().chain(&self.docker.exclude) {
            globset::Glob::new(pattern)
                .map_err(|e| anyhow::anyhow!("docker glob '{pattern}': {e}"))?;
        }

        if let Some(ref email) = self.notify.email {
            if email.enabled {
                if email.smtp_host.is_empty() {
                    anyhow::bail!("notify.email.smtp_host must be set when enabled");
                }
                if email.to.is_empty() {
                    anyhow::bail!("notify.email.to must list at least one recipient");
                }
            }
        }

        for hook in &self.notify.webhooks {
            if hook.enabled && hook.url.is_empty() {
                anyhow::bail!("notify.webhooks entries require a url");
            }
        }

        Ok(())
    }

    fn warn_unknown_keys(&self) {
        for key in self.unknown.keys() {
            warn!(key = key.as_str(), "ignoring unknown config section");
        }
    }

    /// Rule names whose expression or `for` changed between configs.
    /// The alert engine resets `Pending` timers for exactly these.
    pub fn changed_rules(&self, next: &Config) -> Vec<String> {
        next.alerts
            .iter()
            .filter(|(name, rule)| match self.alerts.get(*name) {
                Some(old) => old.condition != rule.condition || old.r#for != rule.r#for,
                None => true,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
