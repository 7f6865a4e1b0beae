// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::UniversalEvent;
use serde_json::json;
use yare::parameterized;

fn event(topic: &str) -> UniversalEvent {
    UniversalEvent::new(topic, topic, "test", json!({}), 1)
}

#[parameterized(
    exact = { "plan.completed", "plan.completed", true },
    exact_mismatch = { "plan.completed", "plan.failed", false },
    star_matches_one_segment = { "plan.*.completed", "plan.a1.completed", true },
    star_rejects_two_segments = { "plan.*.completed", "plan.a1.b2.completed", false },
    hash_matches_tail = { "plan.#", "plan.a1.completed", true },
    hash_matches_bare_prefix = { "plan.#", "plan", true },
    hash_rejects_other_root = { "plan.#", "trigger.fired", false },
    bare_hash_matches_everything = { "#", "anything.at.all", true },
    slash_normalised_in_pattern = { "plan/*/completed", "plan.a1.completed", true },
    slash_normalised_in_topic = { "plan.*.completed", "plan/a1/completed", true },
)]
fn pattern_matching(pattern: &str, topic: &str, matches: bool) {
    let compiled = TopicPattern::compile(pattern).unwrap();
    assert_eq!(compiled.matches(topic), matches, "{pattern} vs {topic}");
}

#[parameterized(
    empty = { "" },
    hash_in_middle = { "plan.#.completed" },
    glued_wildcard = { "plan.a*b" },
)]
fn invalid_patterns_are_rejected(pattern: &str) {
    assert!(TopicPattern::compile(pattern).is_err());
}

#[test]
fn publish_reaches_matching_subscriber() {
    let bus = InProcessBus::new();
    let mut stream = bus.subscribe("plan.#").unwrap();

    bus.publish(event("plan.a1.completed"));
    bus.publish(event("trigger.fired"));

    let got = stream.try_recv().unwrap();
    assert_eq!(got.topic, "plan.a1.completed");
    assert!(stream.try_recv().is_none());
}

#[test]
fn delivery_order_is_fifo_per_subscriber() {
    let bus = InProcessBus::new();
    let mut stream = bus.subscribe("#").unwrap();

    bus.publish(event("a.one"));
    bus.publish(event("a.two"));
    bus.publish(event("a.three"));

    assert_eq!(stream.try_recv().unwrap().topic, "a.one");
    assert_eq!(stream.try_recv().unwrap().topic, "a.two");
    assert_eq!(stream.try_recv().unwrap().topic, "a.three");
}

#[test]
fn duplicate_publish_delivers_twice() {
    let bus = InProcessBus::new();
    let mut stream = bus.subscribe("#").unwrap();

    let e = event("plan.submitted");
    bus.publish(e.clone());
    bus.publish(e.clone());

    assert_eq!(stream.try_recv().unwrap().id, e.id);
    assert_eq!(stream.try_recv().unwrap().id, e.id);
}

#[test]
fn dropped_subscriber_does_not_block_publish() {
    let bus = InProcessBus::new();
    let stream = bus.subscribe("#").unwrap();
    drop(stream);

    bus.publish(event("plan.submitted"));

    let mut live = bus.subscribe("#").unwrap();
    bus.publish(event("plan.completed"));
    assert_eq!(live.try_recv().unwrap().topic, "plan.completed");
}

#[test]
fn recent_returns_newest_events_oldest_first() {
    let bus = InProcessBus::new();
    for i in 0..5 {
        bus.publish(event(&format!("tick.{i}")));
    }

    let recent = bus.recent(3);
    let topics: Vec<&str> = recent.iter().map(|e| e.topic.as_str()).collect();
    assert_eq!(topics, vec!["tick.2", "tick.3", "tick.4"]);
}

#[tokio::test]
async fn async_recv_sees_published_event() {
    let bus = InProcessBus::new();
    let mut stream = bus.subscribe("plan.*").unwrap();
    bus.publish(event("plan.submitted"));

    let got = stream.recv().await.unwrap();
    assert_eq!(got.topic, "plan.submitted");
}
