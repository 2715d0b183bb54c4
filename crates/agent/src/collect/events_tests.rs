// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use bollard::models::EventActor;

use super::*;

fn message(action: &str, id: &str, name: &str) -> EventMessage {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_owned(), name.to_owned());
    attributes.insert(
        crate::collect::docker::COMPOSE_PROJECT_LABEL.to_owned(),
        "shop".to_owned(),
    );
    attributes.insert(
        crate::collect::docker::COMPOSE_SERVICE_LABEL.to_owned(),
        "web".to_owned(),
    );
    EventMessage {
        action: Some(action.to_owned()),
        actor: Some(EventActor {
            id: Some(id.to_owned()),
            attributes: Some(attributes),
        }),
        time: Some(1234),
        ..Default::default()
    }
}

#[test]
fn converts_lifecycle_event() {
    let event = convert(message("start", "abc123", "shop-web-1")).unwrap();
    assert_eq!(event.id, "abc123");
    assert_eq!(event.name, "shop-web-1");
    assert_eq!(event.action, "start");
    assert_eq!(event.state, "running");
    assert_eq!(event.project, "shop");
    assert_eq!(event.service, "web");
    assert_eq!(event.timestamp, 1234);
}

#[test]
fn health_status_action_splits_out_health() {
    let event = convert(message("health_status: unhealthy", "abc", "web")).unwrap();
    assert_eq!(event.action, "health_status");
    assert_eq!(event.health, "unhealthy");
    assert_eq!(event.state, "");
}

#[test]
fn event_without_actor_id_is_dropped() {
    let mut m = message("start", "abc", "web");
    m.actor = None;
    assert!(convert(m).is_none());

    let mut m = message("start", "abc", "web");
    if let Some(actor) = &mut m.actor {
        actor.id = None;
    }
    assert!(convert(m).is_none());
}

#[test]
fn state_mapping_covers_lifecycle() {
    assert_eq!(state_after("start"), "running");
    assert_eq!(state_after("die"), "exited");
    assert_eq!(state_after("pause"), "paused");
    assert_eq!(state_after("destroy"), "removed");
    assert_eq!(state_after("exec_create"), "");
}

#[test]
fn only_start_die_restart_make_log_entries() {
    let start = convert(message("start", "abc", "web")).unwrap();
    let entry = lifecycle_log(&start).unwrap();
    assert_eq!(entry.stream, "event");
    assert!(entry.message.contains("web started"));

    let die = convert(message("die", "abc", "web")).unwrap();
    assert!(lifecycle_log(&die).unwrap().message.contains("died"));

    let pause = convert(message("pause", "abc", "web")).unwrap();
    assert!(lifecycle_log(&pause).is_none());
}

#[test]
fn falls_back_to_id_when_name_missing() {
    let mut m = message("die", "abc123", "");
    if let Some(actor) = &mut m.actor {
        if let Some(attrs) = &mut actor.attributes {
            attrs.remove("name");
        }
    }
    let event = convert(m).unwrap();
    let entry = lifecycle_log(&event).unwrap();
    assert!(entry.message.contains("abc123"));
}
