// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::watchers::TriggerFire;
use serde_json::json;

fn fire(id: &str) -> TriggerFire {
    TriggerFire {
        trigger_id: TriggerId::from_string(id),
        fired_at_ms: 0,
        payload: json!({}),
    }
}

#[test]
fn critical_pops_before_background() {
    let scheduler = FireScheduler::new();
    scheduler.push(fire("trg-bg"), TriggerPriority::Background);
    scheduler.push(fire("trg-crit"), TriggerPriority::Critical);
    scheduler.push(fire("trg-norm"), TriggerPriority::Normal);

    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-crit");
    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-norm");
    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-bg");
    assert!(scheduler.pop().is_none());
}

#[test]
fn same_priority_is_fifo() {
    let scheduler = FireScheduler::new();
    scheduler.push(fire("trg-1"), TriggerPriority::Normal);
    scheduler.push(fire("trg-2"), TriggerPriority::Normal);
    scheduler.push(fire("trg-3"), TriggerPriority::Normal);

    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-1");
    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-2");
    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-3");
}

#[test]
fn peek_reports_the_most_urgent_priority() {
    let scheduler = FireScheduler::new();
    assert_eq!(scheduler.peek_priority(), None);
    scheduler.push(fire("trg-low"), TriggerPriority::Low);
    scheduler.push(fire("trg-crit"), TriggerPriority::Critical);
    assert_eq!(scheduler.peek_priority(), Some(TriggerPriority::Critical));
    assert_eq!(scheduler.len(), 2);
}

#[test]
fn discard_drops_only_the_named_trigger() {
    let scheduler = FireScheduler::new();
    scheduler.push(fire("trg-a"), TriggerPriority::Normal);
    scheduler.push(fire("trg-b"), TriggerPriority::Normal);
    scheduler.push(fire("trg-a"), TriggerPriority::Critical);

    scheduler.discard(&TriggerId::from_string("trg-a"));
    assert_eq!(scheduler.len(), 1);
    assert_eq!(scheduler.pop().unwrap().fire.trigger_id, "trg-b");
}

#[test]
fn gate_cooldown_blocks_until_interval_elapses() {
    let throttle = Throttle { min_interval_seconds: 10, max_fires_per_hour: 100 };
    let mut gate = FireGate::default();

    assert_eq!(gate.admit(&throttle, 1_000), GateVerdict::Pass);
    assert_eq!(gate.admit(&throttle, 5_000), GateVerdict::Cooldown);
    assert_eq!(gate.admit(&throttle, 11_001), GateVerdict::Pass);
}

#[test]
fn gate_window_exhausts_and_recovers() {
    let throttle = Throttle { min_interval_seconds: 0, max_fires_per_hour: 2 };
    let mut gate = FireGate::default();

    assert_eq!(gate.admit(&throttle, 1_000), GateVerdict::Pass);
    assert_eq!(gate.admit(&throttle, 2_000), GateVerdict::Pass);
    assert_eq!(gate.admit(&throttle, 3_000), GateVerdict::WindowExhausted);

    // An hour later the window has slid past both entries.
    assert_eq!(gate.admit(&throttle, 3_700_000), GateVerdict::Pass);
}

#[test]
fn throttled_attempts_do_not_consume_the_window() {
    let throttle = Throttle { min_interval_seconds: 0, max_fires_per_hour: 1 };
    let mut gate = FireGate::default();
    assert_eq!(gate.admit(&throttle, 1_000), GateVerdict::Pass);
    for t in [2_000, 3_000, 4_000] {
        assert_eq!(gate.admit(&throttle, t), GateVerdict::WindowExhausted);
    }
    assert_eq!(gate.admit(&throttle, 3_601_001), GateVerdict::Pass);
}
