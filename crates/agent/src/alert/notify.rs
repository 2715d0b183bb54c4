// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notifier dispatch: email and webhooks.
//!
//! The engine enqueues notifications on a bounded channel; the
//! dispatcher fans them out to the configured notifiers with bounded
//! concurrency. Failures retry with exponential backoff and are
//! dropped after [`MAX_RETRIES`] retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EmailConfig, NotifyConfig, WebhookConfig};
use crate::store::now_unix;

/// Depth of the engine → dispatcher queue.
pub const QUEUE_DEPTH: usize = 256;

/// Maximum concurrent in-flight notifier sends.
const MAX_CONCURRENT: usize = 4;

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Per-send timeout for webhook requests.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One alert state change to deliver.
#[derive(Debug, Clone)]
pub struct Notification {
    pub rule_name: String,
    pub severity: String,
    /// `firing` or `resolved`.
    pub state: String,
    pub message: String,
    /// Notifier names from the rule's `actions`; empty means all
    /// enabled notifiers.
    pub actions: Vec<String>,
}

/// Webhook request body.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    rule: &'a str,
    severity: &'a str,
    state: &'a str,
    message: &'a str,
    timestamp: i64,
}

/// Build the bounded queue the engine publishes into.
pub fn channel() -> (mpsc::Sender<Notification>, mpsc::Receiver<Notification>) {
    mpsc::channel(QUEUE_DEPTH)
}

/// Run the dispatcher until shutdown. Notifier config is fixed for the
/// process lifetime; a SIGHUP that changes `[notify]` warns instead.
pub async fn run(
    config: NotifyConfig,
    mut rx: mpsc::Receiver<Notification>,
    shutdown: CancellationToken,
) {
    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
    let client = reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    info!(
        email = config.email.as_ref().map(|e| e.enabled).unwrap_or(false),
        webhooks = config.webhooks.iter().filter(|w| w.enabled).count(),
        "notifier dispatcher started"
    );

    loop {
        let notification = tokio::select! {
            n = rx.recv() => match n {
                Some(n) => n,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        let config = Arc::clone(&config);
        let semaphore = Arc::clone(&semaphore);
        let client = client.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            dispatch(&config, &client, &notification).await;
        });
    }
    debug!("notifier dispatcher stopped");
}

async fn dispatch(config: &NotifyConfig, client: &reqwest::Client, n: &Notification) {
    let all = n.actions.is_empty();
    let wants = |name: &str| all || n.actions.iter().any(|a| a == name);

    if wants("email") {
        if let Some(ref email) = config.email {
            if email.enabled {
                send_email_with_retry(email, n).await;
            }
        }
    }

    if wants("webhook") || wants("webhooks") {
        for hook in config.webhooks.iter().filter(|w| w.enabled) {
            send_webhook_with_retry(client, hook, n).await;
        }
    }

    for action in &n.actions {
        if action != "email" && action != "webhook" && action != "webhooks" {
            warn!(action = action.as_str(), rule = n.rule_name.as_str(), "unknown notifier action");
        }
    }
}

async fn send_email_with_retry(email: &EmailConfig, n: &Notification) {
    for attempt in 0..=MAX_RETRIES {
        let config = email.clone();
        let notification = n.clone();
        let result =
            tokio::task::spawn_blocking(move || send_email(&config, &notification)).await;

        match result {
            Ok(Ok(())) => {
                debug!(rule = n.rule_name.as_str(), "email notification sent");
                return;
            }
            Ok(Err(e)) if attempt == MAX_RETRIES => {
                warn!(rule = n.rule_name.as_str(), error = %e, "email notification dropped");
                return;
            }
            Ok(Err(e)) => {
                debug!(rule = n.rule_name.as_str(), attempt, error = %e, "email send failed, retrying");
            }
            Err(e) => {
                warn!(error = %e, "email send task failed");
                return;
            }
        }
        tokio::time::sleep(backoff(attempt)).await;
    }
}

fn send_email(config: &EmailConfig, n: &Notification) -> anyhow::Result<()> {
    use lettre::{Message, SmtpTransport, Transport};

    let mut builder = Message::builder()
        .from(config.from.parse()?)
        .subject(format!("[{}] {} {}", n.severity, n.rule_name, n.state));
    for to in &config.to {
        builder = builder.to(to.parse()?);
    }
    let message = builder.body(n.message.clone())?;

    let transport =
        SmtpTransport::builder_dangerous(config.smtp_host.as_str()).port(config.smtp_port).build();
    transport.send(&message)?;
    Ok(())
}

async fn send_webhook_with_retry(
    client: &reqwest::Client,
    hook: &WebhookConfig,
    n: &Notification,
) {
    let payload = WebhookPayload {
        rule: &n.rule_name,
        severity: &n.severity,
        state: &n.state,
        message: &n.message,
        timestamp: now_unix(),
    };

    for attempt in 0..=MAX_RETRIES {
        let result = client.post(&hook.url).json(&payload).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(rule = n.rule_name.as_str(), url = hook.url.as_str(), "webhook delivered");
                return;
            }
            Ok(resp) => {
                let status = resp.status();
                if attempt == MAX_RETRIES {
                    warn!(
                        rule = n.rule_name.as_str(),
                        url = hook.url.as_str(),
                        status = status.as_u16(),
                        "webhook notification dropped"
                    );
                    return;
                }
                debug!(url = hook.url.as_str(), attempt, status = status.as_u16(), "webhook failed, retrying");
            }
            Err(e) => {
                if attempt == MAX_RETRIES {
                    warn!(url = hook.url.as_str(), error = %e, "webhook notification dropped");
                    return;
                }
                debug!(url = hook.url.as_str(), attempt, error = %e, "webhook failed, retrying");
            }
        }
        tokio::time::sleep(backoff(attempt)).await;
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt))
}
