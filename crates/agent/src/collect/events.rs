// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime lifecycle event listener.
//!
//! Streams container events from the runtime and forwards them to the
//! `containers` topic. Start/die/restart additionally become `event`
//! stream log entries for tracked containers, so the log timeline
//! shows lifecycle boundaries between real lines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_wire::types::{ContainerEvent, LogEntry, Topic};

use crate::collect::docker::compose_identity;
use crate::hub::{Event, Hub};
use crate::store::{now_unix, LogRecord, Store};

/// Delay before reopening a dropped event stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Run the listener until shutdown, reopening the stream whenever the
/// runtime drops it.
pub async fn run(docker: Docker, store: Arc<Store>, hub: Arc<Hub>, shutdown: CancellationToken) {
    info!("container event listener started");

    loop {
        let mut filters = HashMap::new();
        filters.insert("type".to_owned(), vec!["container".to_owned()]);
        let mut stream = docker.events(Some(EventsOptions::<String> {
            filters,
            ..Default::default()
        }));

        loop {
            let message = tokio::select! {
                m = stream.next() => m,
                _ = shutdown.cancelled() => {
                    debug!("container event listener shutting down");
                    return;
                }
            };

            match message {
                Some(Ok(event)) => handle(&store, &hub, event),
                Some(Err(e)) => {
                    warn!(error = %e, "event stream failed, reconnecting");
                    break;
                }
                None => {
                    debug!("event stream ended, reconnecting");
                    break;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

fn handle(store: &Store, hub: &Hub, message: EventMessage) {
    let Some(event) = convert(message) else {
        return;
    };

    if let Some(log) = lifecycle_log(&event) {
        if store.tracking().tracks(&event.id, &event.project) {
            let record = LogRecord {
                entry: log,
                project: event.project.clone(),
                service: event.service.clone(),
            };
            store.put_log(record.clone());
            hub.publish(Topic::Logs, Event::Log(record));
        }
    }

    hub.publish(Topic::Containers, Event::Container(event));
}

/// Map a runtime event message onto the wire shape. Events without an
/// actor id carry nothing a client can correlate; they are dropped.
fn convert(message: EventMessage) -> Option<ContainerEvent> {
    let actor = message.actor?;
    let id = actor.id?;
    let attributes = actor.attributes.unwrap_or_default();
    let action = message.action.unwrap_or_default();
    let (project, service) = compose_identity(&attributes);

    // Health transitions arrive as "health_status: healthy".
    let (action, health) = match action.split_once(": ") {
        Some(("health_status", status)) => ("health_status".to_owned(), status.to_owned()),
        _ => (action, String::new()),
    };

    Some(ContainerEvent {
        timestamp: message.time.unwrap_or_else(now_unix),
        id,
        name: attributes.get("name").cloned().unwrap_or_default(),
        state: state_after(&action),
        action,
        health,
        project,
        service,
    })
}

/// Container state implied by a lifecycle action, where one is implied.
fn state_after(action: &str) -> String {
    match action {
        "start" | "unpause" | "restart" => "running",
        "die" | "stop" | "kill" => "exited",
        "pause" => "paused",
        "create" => "created",
        "destroy" => "removed",
        _ => "",
    }
    .to_owned()
}

/// Synthesized log line for the actions worth a timeline marker.
fn lifecycle_log(event: &ContainerEvent) -> Option<LogEntry> {
    let message = match event.action.as_str() {
        "start" => format!("── {} started ──", display_name(event)),
        "die" => format!("── {} died ──", display_name(event)),
        "restart" => format!("── {} restarted ──", display_name(event)),
        _ => return None,
    };
    Some(LogEntry {
        timestamp: event.timestamp,
        container_id: event.id.clone(),
        container_name: event.name.clone(),
        stream: "event".to_owned(),
        message,
    })
}

fn display_name(event: &ContainerEvent) -> &str {
    if event.name.is_empty() {
        &event.id
    } else {
        &event.name
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
