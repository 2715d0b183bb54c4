// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request routing: one incoming envelope in, one outcome out.
//!
//! Store reads run on the blocking pool under a per-request deadline;
//! subscription bookkeeping is returned to the session, which owns the
//! hub registration.

use std::time::Duration;

use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::debug;

use vigil_wire::message::{self, ResultBody};
use vigil_wire::types::Topic;
use vigil_wire::{Envelope, ErrorCode, WireError};

use crate::hub::{LogFilterSpec, SubscriptionFilter};
use crate::store::query::LogFilter;
use crate::store::StoreError;

use super::AgentState;

/// Deadline for point-in-time queries.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for bucketed historical queries, which scan more rows.
const HISTORICAL_DEADLINE: Duration = Duration::from_secs(15);

/// What the session should do with a handled request.
pub enum Outcome {
    Reply(Envelope),
    Subscribe { topic: Topic, filter: SubscriptionFilter, reply: Envelope },
    Unsubscribe { topic: Topic, reply: Envelope },
}

/// Handle one request envelope. Never fails: every error becomes an
/// `error` envelope carrying the request id.
pub async fn dispatch(state: &AgentState, request: &Envelope) -> Result<Outcome, WireError> {
    let id = request.id;
    match handle(state, request).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            debug!(kind = request.kind.as_str(), code = %e.code, "request failed: {}", e.message);
            Ok(Outcome::Reply(Envelope::error(id, e.code, &e.message)?))
        }
    }
}

struct RequestError {
    code: ErrorCode,
    message: String,
}

impl RequestError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }
}

impl From<WireError> for RequestError {
    fn from(e: WireError) -> Self {
        Self::new(ErrorCode::ProtocolError, e.to_string())
    }
}

impl From<StoreError> for RequestError {
    fn from(e: StoreError) -> Self {
        let code = match e {
            StoreError::Full => ErrorCode::StorageFull,
            StoreError::Io(_) => ErrorCode::StorageIo,
        };
        Self::new(code, e.to_string())
    }
}

async fn handle(state: &AgentState, request: &Envelope) -> Result<Outcome, RequestError> {
    let id = request.id;
    match request.kind.as_str() {
        message::SUBSCRIBE_METRICS => subscribe(id, Topic::Metrics, SubscriptionFilter::None),
        message::SUBSCRIBE_ALERTS => subscribe(id, Topic::Alerts, SubscriptionFilter::None),
        message::SUBSCRIBE_CONTAINERS => {
            subscribe(id, Topic::Containers, SubscriptionFilter::None)
        }
        message::SUBSCRIBE_LOGS => {
            let body: message::SubscribeLogs = request.decode_body()?;
            let filter = SubscriptionFilter::Logs(LogFilterSpec {
                container_id: body.container_id,
                project: body.project,
                stream: body.stream,
                search: body.search,
            });
            subscribe(id, Topic::Logs, filter)
        }
        message::UNSUBSCRIBE => {
            let body: message::Unsubscribe = request.decode_body()?;
            Ok(Outcome::Unsubscribe { topic: body.topic, reply: ok_reply(id)? })
        }
        message::QUERY_METRICS => query_metrics(state, request).await,
        message::QUERY_LOGS => query_logs(state, request).await,
        message::QUERY_ALERTS => query_alerts(state, request).await,
        message::QUERY_CONTAINERS => query_containers(state, id),
        message::QUERY_TRACKING => {
            let tracking = state.store.tracking();
            reply(
                id,
                &message::QueryTrackingResp {
                    containers: tracking.containers.into_iter().collect(),
                    projects: tracking.projects.into_iter().collect(),
                },
            )
        }
        message::QUERY_ALERT_RULES => {
            reply(id, &message::AlertRulesResp { rules: state.engine.rules_snapshot() })
        }
        message::ACTION_ACK_ALERT => {
            let body: message::AckAlert = request.decode_body()?;
            if state.store.ack_alert(body.alert_id).await? {
                Ok(Outcome::Reply(ok_reply(id)?))
            } else {
                Err(RequestError::new(
                    ErrorCode::NotFound,
                    format!("no alert with id {}", body.alert_id),
                ))
            }
        }
        message::ACTION_SILENCE_ALERT => {
            let body: message::SilenceAlert = request.decode_body()?;
            let known = state
                .engine
                .silence(&body.rule_name, body.duration_seconds)
                .await
                .map_err(|e| RequestError::new(ErrorCode::StorageIo, e.to_string()))?;
            if known {
                Ok(Outcome::Reply(ok_reply(id)?))
            } else {
                Err(RequestError::new(
                    ErrorCode::NotFound,
                    format!("unknown alert rule '{}'", body.rule_name),
                ))
            }
        }
        message::ACTION_SET_TRACKING => set_tracking(state, request).await,
        other => Err(RequestError::new(
            ErrorCode::ProtocolError,
            format!("unknown message type '{other}'"),
        )),
    }
}

fn subscribe(id: u32, topic: Topic, filter: SubscriptionFilter) -> Result<Outcome, RequestError> {
    Ok(Outcome::Subscribe { topic, filter, reply: ok_reply(id)? })
}

fn ok_reply(id: u32) -> Result<Envelope, WireError> {
    Envelope::new(message::RESULT, id, &ResultBody { ok: true })
}

fn reply<T: Serialize>(id: u32, body: &T) -> Result<Outcome, RequestError> {
    Ok(Outcome::Reply(Envelope::new(message::RESULT, id, body)?))
}

async fn query_metrics(state: &AgentState, request: &Envelope) -> Result<Outcome, RequestError> {
    let body: message::QueryMetrics = request.decode_body()?;
    if body.start > body.end {
        return Err(RequestError::invalid("start must not exceed end"));
    }

    let deadline = if body.points > 0 { HISTORICAL_DEADLINE } else { QUERY_DEADLINE };
    let store = std::sync::Arc::clone(&state.store);
    let resp = with_deadline(deadline, move || {
        let host = store.query_host(body.start, body.end, body.points)?;
        let containers = store.query_containers(
            body.start,
            body.end,
            body.points,
            body.project.as_deref(),
            body.service.as_deref(),
        )?;
        Ok(message::QueryMetricsResp { host, containers, retention_days: store.retention_days() })
    })
    .await?;

    reply(request.id, &resp)
}

async fn query_logs(state: &AgentState, request: &Envelope) -> Result<Outcome, RequestError> {
    let body: message::QueryLogs = request.decode_body()?;
    if body.start > body.end {
        return Err(RequestError::invalid("start must not exceed end"));
    }

    let mut container_ids = body.container_ids.unwrap_or_default();
    if let Some(id) = body.container_id {
        container_ids.push(id);
    }
    let filter = LogFilter {
        start: body.start,
        end: body.end,
        container_ids,
        project: body.project,
        service: body.service,
        stream: body.stream,
        search: body.search,
        limit: body.limit,
    };

    let store = std::sync::Arc::clone(&state.store);
    let (entries, total) =
        with_deadline(QUERY_DEADLINE, move || Ok(store.query_logs(&filter)?)).await?;

    reply(request.id, &message::QueryLogsResp { entries, total })
}

async fn query_alerts(state: &AgentState, request: &Envelope) -> Result<Outcome, RequestError> {
    let body: message::QueryAlerts = request.decode_body()?;
    if body.start > body.end {
        return Err(RequestError::invalid("start must not exceed end"));
    }

    let store = std::sync::Arc::clone(&state.store);
    let alerts =
        with_deadline(QUERY_DEADLINE, move || Ok(store.query_alerts(body.start, body.end)?))
            .await?;

    reply(request.id, &message::QueryAlertsResp { alerts })
}

fn query_containers(state: &AgentState, id: u32) -> Result<Outcome, RequestError> {
    // Sticky runtime failure: empty list plus the error annotation.
    if let Some(error) = state.live.runtime_error() {
        return reply(
            id,
            &message::QueryContainersResp { containers: Vec::new(), error: Some(error) },
        );
    }

    let tracking = state.store.tracking();
    let containers = state
        .live
        .containers()
        .into_iter()
        .map(|sample| {
            let tracked = !tracking.is_empty() && tracking.tracks(&sample.id, &sample.project);
            message::ContainerInfo { sample, tracked }
        })
        .collect();
    reply(id, &message::QueryContainersResp { containers, error: None })
}

async fn set_tracking(state: &AgentState, request: &Envelope) -> Result<Outcome, RequestError> {
    let body: message::SetTracking = request.decode_body()?;
    let mut tracking = state.store.tracking();

    match (body.container, body.project) {
        (Some(container), None) => tracking.set_container(&container, body.tracked),
        (None, Some(project)) => tracking.set_project(&project, body.tracked),
        (Some(_), Some(_)) => {
            return Err(RequestError::invalid("set exactly one of container or project, not both"))
        }
        (None, None) => {
            return Err(RequestError::invalid("one of container or project is required"))
        }
    }

    state.store.put_tracking(tracking).await?;
    Ok(Outcome::Reply(ok_reply(request.id)?))
}

/// Run a blocking store read with a deadline.
async fn with_deadline<T, F>(deadline: Duration, work: F) -> Result<T, RequestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RequestError> + Send + 'static,
{
    match tokio::time::timeout(deadline, spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(RequestError::new(
            ErrorCode::Internal,
            format!("query worker failed: {join}"),
        )),
        Err(_) => Err(RequestError::new(ErrorCode::Internal, "query deadline exceeded")),
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
