// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use iml_core::FakeClock;
use std::time::Duration;

#[test]
fn allows_up_to_the_limit() {
    let limiter = ActionRateLimiter::new(3, 60, FakeClock::new());
    assert!(limiter.check("ssn-1", "submit_plan").is_ok());
    assert!(limiter.check("ssn-1", "submit_plan").is_ok());
    assert!(limiter.check("ssn-1", "submit_plan").is_ok());
    assert_eq!(limiter.current("ssn-1", "submit_plan"), 3);
}

#[test]
fn exceeding_the_limit_is_an_error() {
    let limiter = ActionRateLimiter::new(2, 60, FakeClock::new());
    limiter.check("ssn-1", "submit_plan").unwrap();
    limiter.check("ssn-1", "submit_plan").unwrap();

    let err = limiter.check("ssn-1", "submit_plan").unwrap_err();
    assert_eq!(
        err,
        RateLimited {
            identity: "ssn-1".to_string(),
            action: "submit_plan".to_string(),
            limit: 2,
            window_secs: 60,
        }
    );
}

#[test]
fn keys_are_independent() {
    let limiter = ActionRateLimiter::new(1, 60, FakeClock::new());
    limiter.check("ssn-1", "submit_plan").unwrap();
    assert!(limiter.check("ssn-2", "submit_plan").is_ok());
    assert!(limiter.check("ssn-1", "cancel_plan").is_ok());
}

#[test]
fn window_slides_with_the_clock() {
    let clock = FakeClock::new();
    let limiter = ActionRateLimiter::new(2, 60, clock.clone());
    limiter.check("ssn-1", "submit_plan").unwrap();
    limiter.check("ssn-1", "submit_plan").unwrap();
    assert!(limiter.check("ssn-1", "submit_plan").is_err());

    // Half the window: still blocked
    clock.advance(Duration::from_secs(30));
    assert!(limiter.check("ssn-1", "submit_plan").is_err());

    // Past the window: the old entries fall out
    clock.advance(Duration::from_secs(31));
    assert!(limiter.check("ssn-1", "submit_plan").is_ok());
    assert_eq!(limiter.current("ssn-1", "submit_plan"), 1);
}

#[test]
fn failed_checks_do_not_consume_the_window() {
    let clock = FakeClock::new();
    let limiter = ActionRateLimiter::new(1, 60, clock.clone());
    limiter.check("ssn-1", "submit_plan").unwrap();
    for _ in 0..5 {
        assert!(limiter.check("ssn-1", "submit_plan").is_err());
    }
    clock.advance(Duration::from_secs(61));
    assert!(limiter.check("ssn-1", "submit_plan").is_ok());
}
