// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_epoch_advances() {
    let clock = SystemClock;
    let a = clock.epoch_ms();
    let b = clock.epoch_ms();
    assert!(b >= a);
}

#[test]
fn fake_clock_advance_moves_both_views() {
    let clock = FakeClock::new();
    let start_instant = clock.now();
    let start_ms = clock.epoch_ms();

    clock.advance(Duration::from_secs(90));

    assert_eq!(clock.now().duration_since(start_instant), Duration::from_secs(90));
    assert_eq!(clock.epoch_ms(), start_ms + 90_000);
}

#[test]
fn fake_clock_set_epoch_ms() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42_000);
    assert_eq!(clock.epoch_ms(), 42_000);
    assert_eq!(clock.epoch_secs(), 42);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock = FakeClock::new();
    let other = clock.clone();
    clock.advance(Duration::from_millis(500));
    assert_eq!(other.epoch_ms(), clock.epoch_ms());
}
