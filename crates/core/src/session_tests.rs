// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::UniversalEvent;
use serde_json::json;

#[test]
fn bind_stamp_unbind() {
    let propagator = SessionContextPropagator::new();
    let plan_id = PlanId::new();
    let session = SessionId::new();

    propagator.bind(
        plan_id,
        SessionContext {
            session_id: Some(session),
            correlation_id: Some("corr-9".to_string()),
            trigger_id: None,
            trigger_chain_depth: 0,
        },
    );

    let mut event = UniversalEvent::new("action.completed", "plan.a1.completed", "executor", json!({}), 1);
    propagator.stamp(&plan_id, &mut event);
    assert_eq!(event.session_id, Some(session));
    assert_eq!(event.correlation_id.as_deref(), Some("corr-9"));

    propagator.unbind(&plan_id);
    assert!(propagator.context(&plan_id).is_none());
}

#[test]
fn stamp_without_binding_is_a_no_op() {
    let propagator = SessionContextPropagator::new();
    let mut event = UniversalEvent::new("x", "x", "test", json!({}), 1);
    propagator.stamp(&PlanId::new(), &mut event);
    assert!(event.session_id.is_none());
}

#[test]
fn chain_depth_travels_with_context() {
    let ctx = SessionContext {
        trigger_id: Some("trg-abc".to_string()),
        trigger_chain_depth: 3,
        ..SessionContext::default()
    };
    let json = serde_json::to_value(&ctx).unwrap();
    assert_eq!(json["trigger_chain_depth"], 3);

    let back: SessionContext = serde_json::from_value(json).unwrap();
    assert_eq!(back, ctx);
}
